//! Reference lifecycle scenarios across one and several workers.

use std::sync::Arc;

use mempool_exports::{
    PoolConfig, PoolController, PoolError, PoolManager, PoolRef, PoolRpc, PutOptions,
};
use mempool_models::reference::DRef;
use mempool_models::worker::{LocalId, WorkerId};

use super::tools::*;
use crate::start_pool_worker;

#[test]
fn test_local_put_get() {
    let cluster = build_cluster(1);
    let w1 = cluster.worker(1);

    let handle = w1
        .controller
        .put(b"hello".to_vec(), PutOptions::default())
        .unwrap();
    let dref = handle.dref();
    assert_eq!(dref.owner, WorkerId(1));
    assert_eq!(dref.size, 5);

    let payload = w1.controller.get(&handle).unwrap();
    assert_eq!(*payload, b"hello".to_vec());
    assert_eq!(local_count(w1, &dref), Some(1));
    assert_eq!(population(w1, &dref), Some(1));
}

#[test]
fn test_cross_worker_fan_out() {
    let cluster = build_cluster(3);
    let w1 = cluster.worker(1);

    let handle = w1
        .controller
        .put(b"shared".to_vec(), PutOptions::default())
        .unwrap();
    let dref = handle.dref();

    let on_2 = cluster.worker(2).controller.adopt(roundtrip_dref(&dref));
    let on_3 = cluster.worker(3).controller.adopt(roundtrip_dref(&dref));
    wait_until(|| population(w1, &dref) == Some(3));

    drop(on_2);
    wait_until(|| population(w1, &dref) == Some(2));

    drop(on_3);
    wait_until(|| population(w1, &dref) == Some(1));

    drop(handle);
    wait_until(|| population(w1, &dref).is_none());
    assert!(!has_state(w1, dref.id));
}

#[test]
fn test_local_duplication_does_not_fan_out() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);

    let handle = w1
        .controller
        .put(b"cloned a lot".to_vec(), PutOptions::default())
        .unwrap();
    let dref = handle.dref();

    let on_2 = w2.controller.adopt(roundtrip_dref(&dref));
    wait_until(|| population(w1, &dref) == Some(2));

    let clones: Vec<PoolRef> = (0..100).map(|_| on_2.clone()).collect();
    assert_eq!(local_count(w2, &dref), Some(101));
    assert_eq!(population(w1, &dref), Some(2));
    // only one first-sight notification ever crossed the wire
    assert_eq!(cluster.rpc.ref_notifications_for(&dref), 1);

    drop(clones);
    drop(on_2);
    wait_until(|| population(w1, &dref) == Some(1));
    assert_eq!(local_count(w2, &dref), None);
}

#[test]
fn test_reacquire_after_drop_notifies_again() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);

    let handle = w1
        .controller
        .put(b"again".to_vec(), PutOptions::default())
        .unwrap();
    let dref = handle.dref();

    let first = w2.controller.adopt(roundtrip_dref(&dref));
    wait_until(|| population(w1, &dref) == Some(2));
    drop(first);
    wait_until(|| population(w1, &dref) == Some(1));

    let second = w2.controller.adopt(roundtrip_dref(&dref));
    wait_until(|| population(w1, &dref) == Some(2));
    assert_eq!(cluster.rpc.ref_notifications_for(&dref), 2);
    drop(second);
}

#[test]
fn test_remote_get_returns_payload() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);

    let handle = w1
        .controller
        .put(b"over the wire".to_vec(), PutOptions::default())
        .unwrap();
    let on_2 = w2.controller.adopt(roundtrip_dref(&handle.dref()));

    let payload = w2.controller.get(&on_2).unwrap();
    assert_eq!(*payload, b"over the wire".to_vec());
}

#[test]
fn test_missing_ref_same_kind_local_and_remote() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);

    let handle = w1
        .controller
        .put(b"short-lived".to_vec(), PutOptions::default())
        .unwrap();
    let on_2 = w2.controller.adopt(roundtrip_dref(&handle.dref()));
    wait_until(|| population(w1, &handle.dref()) == Some(2));

    // destroyed regardless of the two remaining holders
    w1.controller.delete(&handle).unwrap();

    let local_err = w1.controller.get(&handle).unwrap_err();
    assert!(matches!(local_err, PoolError::MissingRef(_)));
    let remote_err = w2.controller.get(&on_2).unwrap_err();
    assert!(matches!(remote_err, PoolError::MissingRef(_)));
}

#[test]
fn test_double_delete_is_idempotent() {
    let cluster = build_cluster(1);
    let w1 = cluster.worker(1);

    let handle = w1
        .controller
        .put(b"deleted twice".to_vec(), PutOptions::default())
        .unwrap();
    w1.controller.delete(&handle).unwrap();
    w1.controller.delete(&handle).unwrap();
    // the late unref from the still-live handle is also a no-op
    drop(handle);
}

#[test]
fn test_put_on_remote_owner() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);

    let handle = w2
        .controller
        .put_on(WorkerId(1), b"stored remotely".to_vec(), PutOptions::default())
        .unwrap();
    let dref = handle.dref();
    assert_eq!(dref.owner, WorkerId(1));
    assert!(has_state(w1, dref.id));
    // the owner attributed the population to worker 2 without an extra
    // notification round-trip
    assert_eq!(population(w1, &dref), Some(1));
    assert_eq!(local_count(w2, &dref), Some(1));
    assert_eq!(cluster.rpc.ref_notifications_for(&dref), 0);

    let payload = w2.controller.get(&handle).unwrap();
    assert_eq!(*payload, b"stored remotely".to_vec());

    drop(handle);
    wait_until(|| !has_state(w1, dref.id));
}

#[test]
fn test_owner_endpoint_rejects_misrouted_dref() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);

    let handle = w1
        .controller
        .put(b"owned by worker 1".to_vec(), PutOptions::default())
        .unwrap();
    // an owner endpoint reached with a dref it does not own
    let err = w2.controller.handle_delete(handle.dref()).unwrap_err();
    assert!(matches!(err, PoolError::PreconditionViolation(_)));
    assert!(has_state(w1, handle.id()));
}

#[test]
#[should_panic(expected = "unref without a prior ref")]
fn test_unref_without_ref_panics() {
    let cluster = build_cluster(1);
    let w1 = cluster.worker(1);
    let dref = DRef {
        owner: WorkerId(1),
        id: LocalId(99),
        size: 0,
    };
    // bypasses registration: the drop must trip the precondition check
    let bogus = PoolRef::from_registered(dref, w1.inner.registrar.clone());
    drop(bogus);
}

#[test]
fn test_start_and_stop_public_api() {
    let rpc = Arc::new(ClusterRpc::default());
    let base = tempfile::TempDir::new().unwrap();
    let config = PoolConfig {
        base_dir: base.path().to_path_buf(),
        ..Default::default()
    };
    let (mut manager, controller) = start_pool_worker(config, rpc as Arc<dyn PoolRpc>);

    let handle = controller
        .put(b"through the boxed api".to_vec(), PutOptions::default())
        .unwrap();
    let payload = controller.get(&handle).unwrap();
    assert_eq!(*payload, b"through the boxed api".to_vec());

    drop(handle);
    controller.cleanup().unwrap();
    manager.stop();
}

#[test]
fn test_cleanup_purges_worker() {
    let cluster = build_cluster(1);
    let w1 = cluster.worker(1);

    let a = w1
        .controller
        .put(b"first".to_vec(), PutOptions::default())
        .unwrap();
    let b = w1
        .controller
        .put(b"second".to_vec(), PutOptions::default())
        .unwrap();
    w1.controller.move_to_disk(&a, None).unwrap();
    let session_dir = w1.inner.session_dir();
    assert!(session_dir.exists());

    w1.controller.cleanup().unwrap();
    assert!(!has_state(w1, a.id()));
    assert!(!has_state(w1, b.id()));
    assert!(!session_dir.exists());
    cluster.stop();
}
