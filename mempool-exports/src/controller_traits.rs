use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use mempool_models::payload::FetchReply;
use mempool_models::reference::{DRef, FRef};
use mempool_models::worker::{LocalId, WorkerId};

use crate::error::PoolError;
use crate::refs::PoolRef;

/// Options accepted by `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// byte footprint to record; defaults to the payload length
    pub size: Option<u64>,
    /// destroy the object under memory pressure instead of spilling it
    pub destroy_on_evict: bool,
    /// a file already holding the canonical on-disk copy of the payload
    pub file: Option<PathBuf>,
}

/// Public interface of one pool worker.
///
/// The first group of methods is the user-facing API. The second group is
/// the peer-facing endpoints a transport server dispatches incoming calls
/// to; user code has no reason to call those directly.
pub trait PoolController: Send + Sync {
    /// Store a payload in this worker's pool and return a counted handle.
    fn put(&self, payload: Vec<u8>, opts: PutOptions) -> Result<PoolRef, PoolError>;

    /// Store a payload on `owner`'s pool; this worker holds the handle.
    fn put_on(
        &self,
        owner: WorkerId,
        payload: Vec<u8>,
        opts: PutOptions,
    ) -> Result<PoolRef, PoolError>;

    /// Dereference a handle, fetching from the owner or disk as needed.
    fn get(&self, r: &PoolRef) -> Result<Arc<Vec<u8>>, PoolError>;

    /// Dereference a file-backed reference, routing the read to a worker
    /// sharing the file's disk and caching the result locally.
    fn get_file(&self, fref: &FRef) -> Result<Arc<Vec<u8>>, PoolError>;

    /// Destroy the referenced object on its owner, regardless of counters.
    fn delete(&self, r: &PoolRef) -> Result<(), PoolError>;

    /// Remove a file-backed value: delete the file and evict the local
    /// read cache entry for it.
    fn delete_file(&self, fref: &FRef) -> Result<(), PoolError>;

    /// Write the payload to disk on the owner and drop the in-memory copy.
    fn move_to_disk(&self, r: &PoolRef, path: Option<PathBuf>) -> Result<FRef, PoolError>;

    /// Write the payload to disk on the owner, keeping the in-memory copy.
    fn copy_to_disk(&self, r: &PoolRef, path: PathBuf) -> Result<FRef, PoolError>;

    /// Write a serialized copy to `path` without touching the ref state.
    fn save_to_disk(&self, r: &PoolRef, path: PathBuf) -> Result<FRef, PoolError>;

    /// Remove an on-disk copy created by one of the spill operations.
    fn delete_from_disk(&self, r: &PoolRef, path: PathBuf) -> Result<(), PoolError>;

    /// Update the eviction policy bit of the referenced object.
    fn set_destroy_on_evict(&self, r: &PoolRef, flag: bool) -> Result<(), PoolError>;

    /// Register a `DRef` decoded from the wire as a local materialization.
    /// Transports must route every decoded `DRef` through this.
    fn adopt(&self, dref: DRef) -> PoolRef;

    /// Destroy every object owned by this worker and remove its session
    /// directory.
    fn cleanup(&self) -> Result<(), PoolError>;

    // ---- peer-facing endpoints ----

    /// Peer endpoint: a worker now holds at least one materialization of `dref`.
    fn ref_at_owner(&self, dref: DRef);

    /// Peer endpoint: a worker dropped its last materialization of `dref`.
    fn unref_at_owner(&self, dref: DRef);

    /// Peer endpoint: dereference `id` for a remote caller.
    fn fetch_local(&self, id: LocalId) -> Result<FetchReply, PoolError>;

    /// Peer endpoint: read and decode the payload file at `file`.
    fn read_file(&self, file: PathBuf) -> Result<Vec<u8>, PoolError>;

    /// Peer endpoint: remove the file at `file` from this worker's disk.
    fn remove_path(&self, file: PathBuf) -> Result<(), PoolError>;

    /// Peer endpoint: store a payload here on behalf of `requester`.
    fn handle_put(
        &self,
        requester: WorkerId,
        payload: Vec<u8>,
        size: u64,
        destroy_on_evict: bool,
    ) -> Result<DRef, PoolError>;

    /// Peer endpoint: destroy `dref` regardless of counters.
    fn handle_delete(&self, dref: DRef) -> Result<(), PoolError>;

    /// Peer endpoint: `move_to_disk` forwarded by a non-owner.
    fn handle_move_to_disk(
        &self,
        dref: DRef,
        path: Option<PathBuf>,
        keep_in_memory: bool,
    ) -> Result<FRef, PoolError>;

    /// Peer endpoint: `save_to_disk` forwarded by a non-owner.
    fn handle_save_to_disk(&self, dref: DRef, path: PathBuf) -> Result<FRef, PoolError>;

    /// Peer endpoint: `delete_from_disk` forwarded by a non-owner.
    fn handle_delete_from_disk(&self, dref: DRef, path: PathBuf) -> Result<(), PoolError>;

    /// Peer endpoint: `set_destroy_on_evict` forwarded by a non-owner.
    fn handle_set_destroy_on_evict(&self, dref: DRef, flag: bool) -> Result<(), PoolError>;

    /// Peer endpoint: the reconciled `ip -> workers` map; coordinator only.
    fn get_wrkrips(&self) -> Result<HashMap<Ipv4Addr, Vec<WorkerId>>, PoolError>;

    /// Peer endpoint: this worker's externally reachable IPv4.
    fn external_ip(&self) -> Ipv4Addr;

    /// Peer endpoint: record that `dref` was created from reading `file`;
    /// coordinator only, advisory.
    fn record_read(&self, file: PathBuf, dref: DRef);

    /// Returns a boxed clone of this controller.
    fn clone_box(&self) -> Box<dyn PoolController>;
}

impl Clone for Box<dyn PoolController> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Handle allowing to stop the pool worker cleanly.
pub trait PoolManager: Send {
    /// Stops the notifier worker; pending notifications are flushed first.
    fn stop(&mut self);
}
