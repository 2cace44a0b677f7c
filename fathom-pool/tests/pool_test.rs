//! Pool behaviour under concurrency.

use fathom_core::{Endpoint, Endpoints, Error, MemoryBackendFactory};
use fathom_pool::{DatabasePool, OpenFlags, ReplicaState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn pool() -> Arc<DatabasePool> {
    Arc::new(DatabasePool::new(
        Arc::new(MemoryBackendFactory::new()),
        8,
        4,
    ))
}

fn eps(name: &str) -> Endpoints {
    Endpoints::single(Endpoint::new(name))
}

const WRITE: Duration = Duration::from_millis(200);

#[test]
fn test_checkout_checkin_round_trip() {
    let pool = pool();
    let handle = pool
        .checkout(&eps("idx"), OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
        .unwrap();
    assert!(handle.is_writable());
    let queue = handle.queue().clone();
    assert_eq!(queue.state(), ReplicaState::Lock);
    drop(handle);
    assert_eq!(queue.state(), ReplicaState::Free);
    assert_eq!(queue.size(), queue.count());
}

#[test]
fn test_writable_is_exclusive_readers_are_not() {
    let pool = pool();
    let w = pool
        .checkout(&eps("idx"), OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
        .unwrap();

    // Second writer times out
    let err = pool
        .checkout(&eps("idx"), OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    // Readers run concurrently with the writer and with each other
    let r1 = pool.checkout(&eps("idx"), OpenFlags::SPAWN, WRITE).unwrap();
    let r2 = pool.checkout(&eps("idx"), OpenFlags::SPAWN, WRITE).unwrap();
    drop((r1, r2, w));
}

#[test]
fn test_writers_serialise_across_threads() {
    let pool = pool();
    let in_section = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        let in_section = in_section.clone();
        let max_seen = max_seen.clone();
        threads.push(std::thread::spawn(move || {
            for _ in 0..20 {
                let handle = pool
                    .checkout(
                        &eps("idx"),
                        OpenFlags::WRITABLE | OpenFlags::SPAWN,
                        Duration::from_secs(5),
                    )
                    .unwrap();
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::yield_now();
                in_section.fetch_sub(1, Ordering::SeqCst);
                drop(handle);
            }
        }));
    }
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1, "writers overlapped");
}

#[test]
fn test_switch_under_load() {
    let pool = pool();
    let endpoint = Endpoint::new("idx");
    let endpoints = eps("idx");

    let w1 = pool
        .checkout(&endpoints, OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
        .unwrap();
    // A reader is out too
    let r1 = pool.checkout(&endpoints, OpenFlags::SPAWN, WRITE).unwrap();

    let switch_pool = pool.clone();
    let switch_endpoint = endpoint.clone();
    let switcher = std::thread::spawn(move || {
        switch_pool.switch_db(&switch_endpoint, Duration::from_secs(5))
    });

    std::thread::sleep(Duration::from_millis(50));
    assert!(!switcher.is_finished(), "switch completed with handles out");

    // While the switch is pending, new checkouts block
    let err = pool
        .checkout(&endpoints, OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    drop(w1);
    drop(r1);
    switcher.join().unwrap().unwrap();

    // Both queues are usable after the swap
    let w = pool
        .checkout(&endpoints, OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
        .unwrap();
    drop(w);
}

#[test]
fn test_shared_data_across_views() {
    let pool = pool();
    {
        let w = pool
            .checkout(&eps("idx"), OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
            .unwrap();
        w.backend(0)
            .unwrap()
            .set_metadata("schema", b"{}")
            .unwrap();
    }
    let r = pool.checkout(&eps("idx"), OpenFlags::SPAWN, WRITE).unwrap();
    assert_eq!(
        r.backend(0).unwrap().get_metadata("schema").unwrap(),
        Some(b"{}".to_vec())
    );
}

#[test]
fn test_ref_counting() {
    let pool = pool();
    let endpoints = eps("idx");
    pool.init_ref(&endpoints).unwrap();
    assert_eq!(pool.get_ref(&endpoints).unwrap(), 1);
    assert_eq!(pool.inc_ref(&endpoints).unwrap(), 2);
    assert_eq!(pool.dec_ref(&endpoints).unwrap(), 1);
    assert_eq!(pool.dec_ref(&endpoints).unwrap(), 0);
    // init_ref does not resurrect an existing counter
    pool.init_ref(&endpoints).unwrap();
    assert_eq!(pool.get_ref(&endpoints).unwrap(), 0);
}

#[test]
fn test_finish_blocks_new_checkouts() {
    let pool = pool();
    let _seed = pool
        .checkout(&eps("idx"), OpenFlags::SPAWN, WRITE)
        .unwrap();
    pool.finish();
    let err = pool
        .checkout(&eps("idx"), OpenFlags::SPAWN, WRITE)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn test_sharded_endpoints_route_by_term() {
    let pool = pool();
    let endpoints = Endpoints::shards(&Endpoint::new("idx"), 3);
    let handle = pool
        .checkout(&endpoints, OpenFlags::WRITABLE | OpenFlags::SPAWN, WRITE)
        .unwrap();
    assert_eq!(handle.shard_count(), 3);

    // Routing is deterministic and within bounds
    for term in [b"Qaaa".as_slice(), b"Qbbb", b"Qccc", b"Qddd"] {
        let shard = handle.shard_for_term(term);
        assert!(shard < 3);
        assert_eq!(shard, handle.shard_for_term(term));
    }
}

#[test]
fn test_lru_drops_only_idle_queues() {
    let pool = Arc::new(DatabasePool::new(
        Arc::new(MemoryBackendFactory::new()),
        2, // tiny LRU
        4,
    ));

    // Keep a handle out on "busy" so its queue cannot be dropped
    let busy = pool
        .checkout(&eps("busy"), OpenFlags::SPAWN, WRITE)
        .unwrap();

    // Fill past capacity with idle queues
    for name in ["a", "b", "c", "d"] {
        let h = pool.checkout(&eps(name), OpenFlags::SPAWN, WRITE).unwrap();
        drop(h);
    }

    // The busy queue survived the pressure
    let queue = busy.queue().clone();
    drop(busy);
    assert_eq!(queue.size(), queue.count());
}
