//! Locality resolution: which workers sit on which host. The coordinator
//! builds the `ip -> workers` map from its configured peer table; every
//! other worker fetches it once and caches it. Used to route file-backed
//! reads to a worker sharing the file's disk.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use rand::seq::SliceRandom;
use tracing::warn;

use mempool_exports::PoolError;
use mempool_models::worker::WorkerId;

use crate::worker::PoolInner;

impl PoolInner {
    /// The workers co-located with `ip`, from the cached topology.
    /// The cache is lazily filled from the coordinator on first use.
    pub(crate) fn workers_at(&self, ip: Ipv4Addr) -> Result<Vec<WorkerId>, PoolError> {
        {
            let state = self.state.lock();
            if let Some(map) = &state.wrkrips {
                return Ok(map.get(&ip).cloned().unwrap_or_default());
            }
        }
        let map = if self.cfg.self_id == self.cfg.coordinator {
            self.build_wrkrips()?
        } else {
            self.rpc.get_wrkrips(self.cfg.coordinator)?
        };
        let workers = map.get(&ip).cloned().unwrap_or_default();
        let mut state = self.state.lock();
        state.wrkrips = Some(map);
        Ok(workers)
    }

    /// One worker co-located with `ip`, picked uniformly at random.
    pub(crate) fn worker_at(&self, ip: Ipv4Addr) -> Result<WorkerId, PoolError> {
        let workers = self.workers_at(ip)?;
        workers
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or(PoolError::NoWorkerAt(ip))
    }

    /// Coordinator endpoint: the reconciled topology map. Non-coordinator
    /// workers only answer from their cache.
    pub(crate) fn get_wrkrips(&self) -> Result<HashMap<Ipv4Addr, Vec<WorkerId>>, PoolError> {
        {
            let state = self.state.lock();
            if let Some(map) = &state.wrkrips {
                return Ok(map.clone());
            }
        }
        if self.cfg.self_id != self.cfg.coordinator {
            return Err(PoolError::Transport(format!(
                "topology queries are served by the coordinator {}",
                self.cfg.coordinator
            )));
        }
        let map = self.build_wrkrips()?;
        let mut state = self.state.lock();
        state.wrkrips = Some(map.clone());
        Ok(map)
    }

    /// Build the `ip -> workers` map from the configured peer table.
    ///
    /// Peers are grouped by IPv4. Without randomized file serving only the
    /// lowest worker id per host is kept. Workers that bound loopback are
    /// then merged into the bucket of their real external IP, so that
    /// co-located workers do not appear unreachable just because of their
    /// bind address.
    pub(crate) fn build_wrkrips(&self) -> Result<HashMap<Ipv4Addr, Vec<WorkerId>>, PoolError> {
        let mut map: HashMap<Ipv4Addr, Vec<WorkerId>> = HashMap::new();
        for peer in &self.cfg.peers {
            match peer.addr {
                IpAddr::V4(ip) => map.entry(ip).or_default().push(peer.worker),
                IpAddr::V6(addr) => {
                    warn!(
                        "ignoring non-IPv4 address {} configured for {}",
                        addr, peer.worker
                    );
                }
            }
        }
        for workers in map.values_mut() {
            workers.sort();
            workers.dedup();
        }
        if !self.cfg.enable_random_fref_serve {
            // deterministic selection: lowest worker id per host
            for workers in map.values_mut() {
                workers.truncate(1);
            }
        }
        if map.len() > 1 {
            if let Some(loopback_workers) = map.remove(&Ipv4Addr::LOCALHOST) {
                if let Some(&probe) = loopback_workers.first() {
                    let real_ip = if probe == self.cfg.self_id {
                        self.cfg.self_ip
                    } else {
                        self.rpc.external_ip(probe)?
                    };
                    let bucket = map.entry(real_ip).or_default();
                    bucket.extend(loopback_workers);
                    bucket.sort();
                    bucket.dedup();
                }
            }
        }
        Ok(map)
    }
}
