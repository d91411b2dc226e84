//! Test assembly: an in-process cluster whose transport dispatches calls
//! directly into the target worker's controller, with call counters for
//! observing cross-worker traffic.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;

use mempool_exports::{PoolConfig, PoolController, PoolError, PoolManager, PoolRpc};
use mempool_models::payload::FetchReply;
use mempool_models::reference::{DRef, DRefDeserializer, DRefSerializer, FRef};
use mempool_models::worker::{LocalId, PeerInfo, WorkerId};
use mempool_serialization::{DeserializeError, Deserializer, Serializer};

use crate::controller_impl::PoolControllerImpl;
use crate::worker::{launch, PoolInner, PoolManagerImpl};

/// Transport connecting the workers of a test cluster in-process.
#[derive(Default)]
pub struct ClusterRpc {
    controllers: RwLock<HashMap<WorkerId, Box<dyn PoolController>>>,
    /// every `ref_at_owner` delivered, with its target
    pub ref_notifications: Mutex<Vec<(WorkerId, DRef)>>,
    /// number of `read_file` calls that went over the wire
    pub read_file_calls: AtomicUsize,
}

impl ClusterRpc {
    pub fn register(&self, worker: WorkerId, controller: Box<dyn PoolController>) {
        self.controllers.write().insert(worker, controller);
    }

    fn target(&self, worker: WorkerId) -> Result<Box<dyn PoolController>, PoolError> {
        self.controllers
            .read()
            .get(&worker)
            .map(|c| c.clone_box())
            .ok_or_else(|| PoolError::Transport(format!("no route to {}", worker)))
    }

    /// Number of delivered first-sight notifications for `dref`.
    pub fn ref_notifications_for(&self, dref: &DRef) -> usize {
        self.ref_notifications
            .lock()
            .iter()
            .filter(|(_, d)| d.key() == dref.key())
            .count()
    }
}

impl PoolRpc for ClusterRpc {
    fn ref_at_owner(&self, target: WorkerId, dref: DRef) -> Result<(), PoolError> {
        self.ref_notifications.lock().push((target, dref));
        self.target(target)?.ref_at_owner(dref);
        Ok(())
    }

    fn unref_at_owner(&self, target: WorkerId, dref: DRef) -> Result<(), PoolError> {
        self.target(target)?.unref_at_owner(dref);
        Ok(())
    }

    fn record_read(&self, target: WorkerId, file: PathBuf, dref: DRef) -> Result<(), PoolError> {
        self.target(target)?.record_read(file, dref);
        Ok(())
    }

    fn fetch_local(&self, target: WorkerId, id: LocalId) -> Result<FetchReply, PoolError> {
        self.target(target)?.fetch_local(id)
    }

    fn read_file(&self, target: WorkerId, file: PathBuf) -> Result<Vec<u8>, PoolError> {
        self.read_file_calls.fetch_add(1, Ordering::SeqCst);
        self.target(target)?.read_file(file)
    }

    fn remove_path(&self, target: WorkerId, file: PathBuf) -> Result<(), PoolError> {
        self.target(target)?.remove_path(file)
    }

    fn put_at(
        &self,
        target: WorkerId,
        requester: WorkerId,
        payload: Vec<u8>,
        size: u64,
        destroy_on_evict: bool,
    ) -> Result<DRef, PoolError> {
        self.target(target)?
            .handle_put(requester, payload, size, destroy_on_evict)
    }

    fn delete(&self, target: WorkerId, dref: DRef) -> Result<(), PoolError> {
        self.target(target)?.handle_delete(dref)
    }

    fn move_to_disk(
        &self,
        target: WorkerId,
        dref: DRef,
        path: Option<PathBuf>,
        keep_in_memory: bool,
    ) -> Result<FRef, PoolError> {
        self.target(target)?
            .handle_move_to_disk(dref, path, keep_in_memory)
    }

    fn save_to_disk(
        &self,
        target: WorkerId,
        dref: DRef,
        path: PathBuf,
    ) -> Result<FRef, PoolError> {
        self.target(target)?.handle_save_to_disk(dref, path)
    }

    fn delete_from_disk(
        &self,
        target: WorkerId,
        dref: DRef,
        path: PathBuf,
    ) -> Result<(), PoolError> {
        self.target(target)?.handle_delete_from_disk(dref, path)
    }

    fn set_destroy_on_evict(
        &self,
        target: WorkerId,
        dref: DRef,
        flag: bool,
    ) -> Result<(), PoolError> {
        self.target(target)?.handle_set_destroy_on_evict(dref, flag)
    }

    fn get_wrkrips(
        &self,
        coordinator: WorkerId,
    ) -> Result<HashMap<Ipv4Addr, Vec<WorkerId>>, PoolError> {
        self.target(coordinator)?.get_wrkrips()
    }

    fn external_ip(&self, target: WorkerId) -> Result<Ipv4Addr, PoolError> {
        Ok(self.target(target)?.external_ip())
    }
}

pub struct TestWorker {
    pub inner: Arc<PoolInner>,
    pub controller: PoolControllerImpl,
    pub manager: PoolManagerImpl,
}

pub struct TestCluster {
    pub rpc: Arc<ClusterRpc>,
    pub workers: Vec<TestWorker>,
    _base: TempDir,
}

impl TestCluster {
    pub fn worker(&self, id: u64) -> &TestWorker {
        &self.workers[(id - 1) as usize]
    }

    pub fn stop(mut self) {
        for worker in &mut self.workers {
            worker.manager.stop();
        }
    }
}

pub fn test_ip(worker: u64) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, worker as u8)
}

pub fn build_cluster(count: u64) -> TestCluster {
    build_cluster_with(count, |_, _| {})
}

/// Builds a cluster of `count` workers wired through a `ClusterRpc`,
/// each on its own host by default. `tweak` adjusts each worker's config
/// before launch.
pub fn build_cluster_with(count: u64, tweak: impl Fn(u64, &mut PoolConfig)) -> TestCluster {
    let base = TempDir::new().unwrap();
    let rpc = Arc::new(ClusterRpc::default());
    let peers: Vec<PeerInfo> = (1..=count)
        .map(|i| PeerInfo {
            worker: WorkerId(i),
            addr: IpAddr::V4(test_ip(i)),
        })
        .collect();
    let mut workers = Vec::new();
    for i in 1..=count {
        let mut config = PoolConfig {
            self_id: WorkerId(i),
            self_ip: test_ip(i),
            coordinator: WorkerId(1),
            peers: peers.clone(),
            base_dir: base.path().join(format!("w{}", i)),
            ..Default::default()
        };
        tweak(i, &mut config);
        let (inner, manager) = launch(config, rpc.clone() as Arc<dyn PoolRpc>);
        let controller = PoolControllerImpl::new(inner.clone());
        rpc.register(WorkerId(i), Box::new(controller.clone()));
        workers.push(TestWorker {
            inner,
            controller,
            manager,
        });
    }
    TestCluster {
        rpc,
        workers,
        _base: base,
    }
}

/// Polls `cond` until it holds, panicking after a couple of seconds.
pub fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached in time");
}

pub fn population(worker: &TestWorker, dref: &DRef) -> Option<usize> {
    worker
        .inner
        .state
        .lock()
        .counters
        .owner_populations
        .get(&dref.key())
        .copied()
}

pub fn local_count(worker: &TestWorker, dref: &DRef) -> Option<usize> {
    worker
        .inner
        .state
        .lock()
        .counters
        .local_holders
        .get(&dref.key())
        .copied()
}

pub fn has_state(worker: &TestWorker, id: LocalId) -> bool {
    worker.inner.state.lock().store.contains(&id)
}

/// Whether the payload is resident, and the recorded canonical disk path.
pub fn state_snapshot(worker: &TestWorker, id: LocalId) -> Option<(bool, Option<PathBuf>)> {
    let state = worker.inner.state.lock();
    state
        .store
        .lookup(&id)
        .map(|st| (st.data().is_some(), st.file().cloned()))
}

/// Ship a dref through its wire encoding, as a transport would.
pub fn roundtrip_dref(dref: &DRef) -> DRef {
    let mut buffer = Vec::new();
    DRefSerializer::new().serialize(dref, &mut buffer).unwrap();
    let (rest, out) = DRefDeserializer::new()
        .deserialize::<DeserializeError>(&buffer)
        .unwrap();
    assert!(rest.is_empty());
    out
}
