use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use mempool_models::worker::{PeerInfo, WorkerId};

/// Static configuration of one pool worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// id of this worker
    pub self_id: WorkerId,
    /// externally reachable IPv4 of this worker
    pub self_ip: Ipv4Addr,
    /// worker serving topology queries and the read registry
    pub coordinator: WorkerId,
    /// full cluster peer table; only consulted on the coordinator
    pub peers: Vec<PeerInfo>,
    /// directory under which the `.mempool` session tree is created
    pub base_dir: PathBuf,
    /// advisory cap on resident payload bytes; `None` disables eviction
    pub max_memsize: Option<u64>,
    /// whether refs without the destroy-on-evict policy spill to disk
    /// under memory pressure instead of staying resident
    pub spill_to_disk: bool,
    /// whether file reads are reported to the coordinator registry
    pub enable_who_has_read: bool,
    /// whether file fetches may be served by any co-located worker,
    /// instead of deterministically by the lowest worker id per host
    pub enable_random_fref_serve: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            self_id: WorkerId(1),
            self_ip: Ipv4Addr::LOCALHOST,
            coordinator: WorkerId(1),
            peers: Vec::new(),
            base_dir: PathBuf::from("."),
            max_memsize: None,
            spill_to_disk: false,
            enable_who_has_read: true,
            enable_random_fref_serve: true,
        }
    }
}
