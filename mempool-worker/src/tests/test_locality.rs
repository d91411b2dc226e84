//! Topology resolution and file-backed reference routing.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;

use mempool_exports::{PoolController, PutOptions};
use mempool_models::worker::{PeerInfo, WorkerId};

use super::tools::*;

#[test]
fn test_fref_locality_and_read_cache() {
    let cluster = build_cluster(3);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);
    let payload = b"read from a peer's disk".to_vec();

    let handle = w1
        .controller
        .put(payload.clone(), PutOptions::default())
        .unwrap();
    let fref = w1.controller.move_to_disk(&handle, None).unwrap();
    assert_eq!(fref.host, test_ip(1));

    // routed to the only worker on the file's host
    let fetched = w2.controller.get_file(&fref).unwrap();
    assert_eq!(*fetched, payload);
    assert_eq!(cluster.rpc.read_file_calls.load(Ordering::SeqCst), 1);

    // second read hits file_to_dref, no wire traffic
    let again = w2.controller.get_file(&fref).unwrap();
    assert_eq!(*again, payload);
    assert_eq!(cluster.rpc.read_file_calls.load(Ordering::SeqCst), 1);

    // the read was recorded on the coordinator
    wait_until(|| {
        w1.inner
            .state
            .lock()
            .who_has_read
            .get(&fref.file)
            .map(|drefs| drefs.len())
            == Some(1)
    });
}

#[test]
fn test_get_file_on_own_host_reads_locally() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);

    let handle = w1
        .controller
        .put(b"local file".to_vec(), PutOptions::default())
        .unwrap();
    let id = handle.id();
    let target = w1.inner.session_dir().join("kept");
    let fref = w1.controller.save_to_disk(&handle, target).unwrap();
    drop(handle);
    wait_until(|| !has_state(w1, id));

    // the object is gone but its saved file remains readable
    let fetched = w1.controller.get_file(&fref).unwrap();
    assert_eq!(*fetched, b"local file".to_vec());
    assert_eq!(cluster.rpc.read_file_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_delete_file_evicts_cache_and_removes_file() {
    let cluster = build_cluster(2);
    let w1 = cluster.worker(1);
    let w2 = cluster.worker(2);

    let handle = w1
        .controller
        .put(b"doomed file".to_vec(), PutOptions::default())
        .unwrap();
    let target = w1.inner.session_dir().join("shared");
    let fref = w1.controller.save_to_disk(&handle, target).unwrap();

    let fetched = w2.controller.get_file(&fref).unwrap();
    assert_eq!(*fetched, b"doomed file".to_vec());
    assert!(!w2.inner.state.lock().file_to_dref.is_empty());

    w2.controller.delete_file(&fref).unwrap();
    assert!(w2.inner.state.lock().file_to_dref.is_empty());
    assert!(!fref.file.exists());
}

#[test]
fn test_loopback_reconciliation() {
    let master_ip = Ipv4Addr::new(10, 0, 0, 5);
    let cluster = build_cluster_with(3, |i, config| {
        config.peers = vec![
            PeerInfo {
                worker: WorkerId(1),
                addr: IpAddr::V4(master_ip),
            },
            PeerInfo {
                worker: WorkerId(2),
                addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            },
            PeerInfo {
                worker: WorkerId(3),
                addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            },
        ];
        // everyone actually sits on the master's host
        let _ = i;
        config.self_ip = master_ip;
    });

    // a non-coordinator triggers the lazy topology fetch
    let workers = cluster.worker(2).inner.workers_at(master_ip).unwrap();
    assert_eq!(workers, vec![WorkerId(1), WorkerId(2), WorkerId(3)]);

    // loopback is no longer a key anywhere
    let map = cluster.worker(1).controller.get_wrkrips().unwrap();
    assert!(!map.contains_key(&Ipv4Addr::LOCALHOST));
    assert_eq!(map.len(), 1);
    assert!(cluster
        .worker(2)
        .inner
        .workers_at(Ipv4Addr::LOCALHOST)
        .unwrap()
        .is_empty());
}

#[test]
fn test_deterministic_serve_keeps_lowest_worker_per_host() {
    let shared_ip = Ipv4Addr::new(10, 0, 0, 2);
    let cluster = build_cluster_with(3, |_, config| {
        config.enable_random_fref_serve = false;
        config.peers = vec![
            PeerInfo {
                worker: WorkerId(1),
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            },
            PeerInfo {
                worker: WorkerId(2),
                addr: IpAddr::V4(shared_ip),
            },
            PeerInfo {
                worker: WorkerId(3),
                addr: IpAddr::V4(shared_ip),
            },
        ];
    });

    let workers = cluster.worker(1).inner.workers_at(shared_ip).unwrap();
    assert_eq!(workers, vec![WorkerId(2)]);
}

#[test]
fn test_worker_at_unknown_host_fails() {
    let cluster = build_cluster(2);
    let err = cluster
        .worker(2)
        .inner
        .worker_at(Ipv4Addr::new(192, 168, 1, 1))
        .unwrap_err();
    assert!(matches!(err, mempool_exports::PoolError::NoWorkerAt(_)));
}
