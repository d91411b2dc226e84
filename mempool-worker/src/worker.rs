//! Pool worker assembly: the shared inner state, the reference registrar
//! wired into every `PoolRef`, and the start/stop entry points.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use mempool_exports::{
    PoolConfig, PoolController, PoolError, PoolManager, PoolRef, PoolRpc, RefRegistrar,
};
use mempool_models::reference::DRef;
use mempool_models::worker::{LocalId, WorkerId};

use crate::controller_impl::PoolControllerImpl;
use crate::datastore::DataStore;
use crate::notifier::{NotifierCommand, NotifierWorker};
use crate::policy::EvictionPolicy;
use crate::ref_counter::RefCounters;

/// Everything guarded by the single per-worker lock.
pub(crate) struct PoolState {
    pub(crate) store: DataStore,
    pub(crate) counters: RefCounters,
    /// files already loaded locally, mapped to the handle keeping the
    /// loaded payload alive
    pub(crate) file_to_dref: HashMap<PathBuf, PoolRef>,
    /// advisory registry of drefs created from file reads; coordinator only
    pub(crate) who_has_read: HashMap<PathBuf, Vec<DRef>>,
    /// cached `ip -> workers` topology
    pub(crate) wrkrips: Option<HashMap<Ipv4Addr, Vec<WorkerId>>>,
    pub(crate) policy: EvictionPolicy,
    next_id: u64,
}

impl PoolState {
    fn new(max_memsize: Option<u64>) -> Self {
        Self {
            store: DataStore::default(),
            counters: RefCounters::default(),
            file_to_dref: HashMap::new(),
            who_has_read: HashMap::new(),
            wrkrips: None,
            policy: EvictionPolicy::new(max_memsize),
            next_id: 1,
        }
    }

    /// Allocate the next owner-local id.
    pub(crate) fn allocate_id(&mut self) -> LocalId {
        let id = LocalId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Shared core of one pool worker. The lock in `state` is held only for
/// map operations, never across RPC, file I/O or payload encoding.
pub(crate) struct PoolInner {
    pub(crate) cfg: PoolConfig,
    /// process-stable identifier mixed into on-disk paths
    pub(crate) session: String,
    pub(crate) rpc: Arc<dyn PoolRpc>,
    pub(crate) registrar: Arc<Registrar>,
    pub(crate) notifier_tx: Sender<NotifierCommand>,
    pub(crate) state: Mutex<PoolState>,
}

impl PoolInner {
    /// The error reported when an owned id is absent from the store.
    pub(crate) fn missing_ref(&self, id: LocalId) -> PoolError {
        PoolError::MissingRef(DRef {
            owner: self.cfg.self_id,
            id,
            size: 0,
        })
    }
}

/// The registrar handed to every `PoolRef` minted by this worker. Holds a
/// weak pointer so late handle drops after teardown degrade to no-ops
/// instead of keeping the pool alive.
pub(crate) struct Registrar {
    pool: Weak<PoolInner>,
}

impl RefRegistrar for Registrar {
    fn on_materialize(&self, dref: &DRef) {
        if let Some(pool) = self.pool.upgrade() {
            pool.register_materialization(dref);
        }
    }

    fn on_drop(&self, dref: &DRef) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release_materialization(dref);
        }
    }
}

pub(crate) fn launch(
    config: PoolConfig,
    rpc: Arc<dyn PoolRpc>,
) -> (Arc<PoolInner>, PoolManagerImpl) {
    let (notifier_tx, notifier_handle) = NotifierWorker::spawn(rpc.clone());
    let session: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let max_memsize = config.max_memsize;
    let inner = Arc::new_cyclic(|weak: &Weak<PoolInner>| PoolInner {
        registrar: Arc::new(Registrar { pool: weak.clone() }),
        session,
        rpc,
        notifier_tx: notifier_tx.clone(),
        state: Mutex::new(PoolState::new(max_memsize)),
        cfg: config,
    });
    info!(
        "pool worker {} started (session {})",
        inner.cfg.self_id, inner.session
    );
    let manager = PoolManagerImpl {
        notifier_tx,
        notifier_handle: Some(notifier_handle),
    };
    (inner, manager)
}

/// Start a pool worker.
///
/// # Arguments
/// * `config`: static worker configuration
/// * `rpc`: transport used to reach peer workers
///
/// # Return value
/// A manager allowing to stop the worker cleanly, and the controller
/// exposing the pool API. The transport server should dispatch incoming
/// peer calls to a clone of the controller.
pub fn start_pool_worker(
    config: PoolConfig,
    rpc: Arc<dyn PoolRpc>,
) -> (Box<dyn PoolManager>, Box<dyn PoolController>) {
    let (inner, manager) = launch(config, rpc);
    (Box::new(manager), Box::new(PoolControllerImpl::new(inner)))
}

/// Stops the notifier thread; queued notifications are drained first.
pub(crate) struct PoolManagerImpl {
    notifier_tx: Sender<NotifierCommand>,
    notifier_handle: Option<JoinHandle<()>>,
}

impl PoolManager for PoolManagerImpl {
    fn stop(&mut self) {
        if let Some(handle) = self.notifier_handle.take() {
            let _ = self.notifier_tx.send(NotifierCommand::Stop);
            if handle.join().is_err() {
                warn!("pool notifier thread panicked");
            }
            info!("pool notifier stopped");
        }
    }
}
