use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use mempool_models::payload::FetchReply;
use mempool_models::reference::{DRef, FRef};
use mempool_models::worker::{LocalId, WorkerId};

use crate::error::PoolError;

/// Typed remote invocation into a peer worker's pool.
///
/// The wire transport behind this trait is a deployment concern; the pool
/// only assumes blocking call-and-reply semantics. Implementations must
/// propagate a peer-side `PoolError::MissingRef` as that same variant so
/// callers cannot tell a remote miss from a local one. The notification
/// methods (`ref_at_owner`, `unref_at_owner`, `record_read`) are invoked
/// from the pool's notifier thread and their errors are logged and
/// dropped, never retried.
#[cfg_attr(any(test, feature = "test-exports"), mockall::automock)]
pub trait PoolRpc: Send + Sync {
    /// Tell `target` that this worker now holds a materialization of `dref`.
    fn ref_at_owner(&self, target: WorkerId, dref: DRef) -> Result<(), PoolError>;

    /// Tell `target` that this worker dropped its last materialization of `dref`.
    fn unref_at_owner(&self, target: WorkerId, dref: DRef) -> Result<(), PoolError>;

    /// Record on the coordinator that a dref was created from reading `file`.
    fn record_read(&self, target: WorkerId, file: PathBuf, dref: DRef) -> Result<(), PoolError>;

    /// Dereference `id` on its owner `target`; blocking.
    fn fetch_local(&self, target: WorkerId, id: LocalId) -> Result<FetchReply, PoolError>;

    /// Have `target` read and decode the payload file at `file`; blocking.
    fn read_file(&self, target: WorkerId, file: PathBuf) -> Result<Vec<u8>, PoolError>;

    /// Have `target` remove the file at `file` from its disk.
    fn remove_path(&self, target: WorkerId, file: PathBuf) -> Result<(), PoolError>;

    /// Store `payload` on `target`, which becomes the owner. The returned
    /// dref's owner population is attributed to `requester`.
    fn put_at(
        &self,
        target: WorkerId,
        requester: WorkerId,
        payload: Vec<u8>,
        size: u64,
        destroy_on_evict: bool,
    ) -> Result<DRef, PoolError>;

    /// Destroy `dref` on its owner `target`, regardless of its counters.
    fn delete(&self, target: WorkerId, dref: DRef) -> Result<(), PoolError>;

    /// Forward a `move_to_disk` to the owner `target`.
    fn move_to_disk(
        &self,
        target: WorkerId,
        dref: DRef,
        path: Option<PathBuf>,
        keep_in_memory: bool,
    ) -> Result<FRef, PoolError>;

    /// Forward a `save_to_disk` to the owner `target`.
    fn save_to_disk(&self, target: WorkerId, dref: DRef, path: PathBuf)
        -> Result<FRef, PoolError>;

    /// Forward a `delete_from_disk` to the owner `target`.
    fn delete_from_disk(
        &self,
        target: WorkerId,
        dref: DRef,
        path: PathBuf,
    ) -> Result<(), PoolError>;

    /// Forward a `set_destroy_on_evict` to the owner `target`.
    fn set_destroy_on_evict(
        &self,
        target: WorkerId,
        dref: DRef,
        flag: bool,
    ) -> Result<(), PoolError>;

    /// Fetch the reconciled `ip -> workers` topology from the coordinator.
    fn get_wrkrips(
        &self,
        coordinator: WorkerId,
    ) -> Result<HashMap<Ipv4Addr, Vec<WorkerId>>, PoolError>;

    /// Ask `target` for its externally reachable IPv4.
    fn external_ip(&self, target: WorkerId) -> Result<Ipv4Addr, PoolError>;
}
