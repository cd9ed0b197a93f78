//! Concurrent acquire/release tests.
//!
//! Blocked acquirers must wake on release, never receive a resource that is
//! still lent out, and leave nothing behind when they give up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use mantle_resource::{Error, Factory, Pool, Resource, Settings};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Resource that detects being handed to two holders at once.
#[derive(Debug)]
struct Exclusive {
    id: u64,
    held: Arc<AtomicBool>,
}

impl Exclusive {
    fn enter(&self) {
        assert!(
            !self.held.swap(true, Ordering::SeqCst),
            "resource {} handed out twice",
            self.id
        );
    }

    fn leave(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

impl Resource for Exclusive {
    fn dispose(&mut self) {}
}

fn exclusive_factory(create_delay: Duration) -> impl Factory<Resource = Exclusive> {
    let next = Arc::new(AtomicU64::new(0));
    move || {
        let id = next.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(create_delay).await;
            Ok::<_, std::io::Error>(Exclusive {
                id,
                held: Arc::new(AtomicBool::new(false)),
            })
        }
    }
}

fn settings(max_capacity: usize, timeout: Duration) -> Settings {
    Settings::named("concurrent")
        .with_capacity(1, max_capacity)
        .with_timeout(timeout)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_acquirer_wakes_on_release() {
    let pool = Pool::new(
        exclusive_factory(Duration::ZERO),
        settings(1, Duration::from_secs(5)),
    )
    .unwrap();

    let first = pool.acquire().await.unwrap();
    first.enter();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "second caller should be blocked");
    assert_eq!(pool.stats().waiting, 1);

    first.leave();
    pool.release(first).unwrap();

    let second = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should wake up after release")
        .unwrap()
        .expect("waiter should get the released resource");
    second.enter();
    assert_eq!(second.id, 0, "the released resource is reused");

    let stats = pool.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.waiting, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_no_double_handout() {
    let max_capacity = 5;
    let pool = Pool::new(
        exclusive_factory(Duration::from_micros(100)),
        settings(max_capacity, Duration::from_secs(10)),
    )
    .unwrap();

    let mut set = JoinSet::new();
    for _ in 0..50 {
        let pool = pool.clone();
        set.spawn(async move {
            for _ in 0..20 {
                let lease = pool.acquire().await.expect("task should acquire");
                lease.enter();
                assert!(pool.stats().active <= max_capacity);
                tokio::time::sleep(Duration::from_micros(200)).await;
                lease.leave();
                pool.release(lease).unwrap();
            }
        });
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while let Some(result) = tokio::time::timeout_at(deadline, set.join_next())
        .await
        .expect("stress test should not deadlock")
    {
        result.expect("task should not panic");
    }

    let stats = pool.stats();
    assert_eq!(stats.acquisitions, 1000);
    assert_eq!(stats.releases, 1000);
    assert_eq!(stats.in_use, 0);
    assert!(stats.created <= max_capacity as u64);
    assert!(stats.active <= max_capacity);
    assert_eq!(stats.active, stats.idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn aborted_waiter_does_not_leak_a_slot() {
    let pool = Pool::new(
        exclusive_factory(Duration::ZERO),
        settings(1, Duration::from_secs(30)),
    )
    .unwrap();

    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.id) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert_eq!(pool.stats().waiting, 0);

    drop(held);
    let again = pool
        .acquire_timeout(Duration::from_millis(100))
        .await
        .expect("pool should still work after an aborted acquire");
    assert_eq!(again.id, 0);
    assert_eq!(pool.stats().active, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn aborted_creation_frees_its_slot() {
    let pool = Pool::new(
        exclusive_factory(Duration::from_secs(10)),
        settings(1, Duration::from_secs(30)),
    )
    .unwrap();

    let creator = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|lease| lease.id) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.stats().active, 1, "slot reserved while creating");

    creator.abort();
    let _ = creator.await;

    let stats = pool.stats();
    assert_eq!(stats.active, 0, "abandoned creation gives the slot back");
    assert_eq!(stats.created, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_timeouts_never_lose_resources() {
    let pool = Pool::new(
        exclusive_factory(Duration::ZERO),
        settings(2, Duration::from_millis(5)),
    )
    .unwrap();

    let mut set = JoinSet::new();
    for _ in 0..16 {
        let pool = pool.clone();
        set.spawn(async move {
            let mut timeouts = 0u32;
            for _ in 0..25 {
                match pool.acquire().await {
                    Ok(lease) => {
                        lease.enter();
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        lease.leave();
                        drop(lease);
                    }
                    Err(Error::AcquireTimeout { .. }) => timeouts += 1,
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
            timeouts
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.acquisitions, stats.releases);
    assert_eq!(stats.acquisitions + stats.timeouts, 16 * 25);

    // Every slot is still usable.
    let a = pool.acquire_timeout(Duration::ZERO).await.unwrap();
    let b = pool.acquire_timeout(Duration::ZERO).await.unwrap();
    assert_ne!(a.id, b.id);
}
