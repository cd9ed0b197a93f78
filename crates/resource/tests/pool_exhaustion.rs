//! Pool exhaustion and timeout tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mantle_resource::{Error, Factory, Pool, Resource, Settings};

#[derive(Debug)]
struct Conn {
    id: u64,
}

impl Resource for Conn {
    fn dispose(&mut self) {}
}

fn counting_factory() -> impl Factory<Resource = Conn> {
    let next = Arc::new(AtomicU64::new(0));
    move || {
        let id = next.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, std::io::Error>(Conn { id }) }
    }
}

fn settings(capacity: usize, max_capacity: usize, timeout: Duration) -> Settings {
    Settings::named("exhaustion")
        .with_capacity(capacity, max_capacity)
        .with_timeout(timeout)
}

#[tokio::test(flavor = "multi_thread")]
async fn acquire_beyond_max_capacity_times_out() {
    let pool = Pool::new(
        counting_factory(),
        settings(2, 2, Duration::from_millis(100)),
    )
    .unwrap();

    let _r1 = pool.acquire().await.expect("first acquire should succeed");
    let _r2 = pool.acquire().await.expect("second acquire should succeed");

    let started = Instant::now();
    let err = pool.acquire().await.expect_err("third acquire should time out");
    let elapsed = started.elapsed();

    let expected = Duration::from_millis(100);
    assert!(
        matches!(err, Error::AcquireTimeout { timeout, .. } if timeout == expected),
        "expected AcquireTimeout, got: {err:?}"
    );
    assert!(elapsed >= Duration::from_millis(100), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned late: {elapsed:?}");

    let stats = pool.stats();
    assert_eq!(stats.active, 2);
    assert_eq!(stats.in_use, 2);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.waiting, 0, "timed-out caller is no longer waiting");
}

#[tokio::test]
async fn explicit_timeout_overrides_settings() {
    let pool = Pool::new(counting_factory(), settings(1, 1, Duration::from_secs(60))).unwrap();
    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let err = pool
        .acquire_timeout(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AcquireTimeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn zero_timeout_is_a_try_acquire() {
    let pool = Pool::new(counting_factory(), settings(1, 1, Duration::from_secs(1))).unwrap();

    let held = pool
        .acquire_timeout(Duration::ZERO)
        .await
        .expect("free slot should be taken without waiting");
    assert!(matches!(
        pool.acquire_timeout(Duration::ZERO).await,
        Err(Error::AcquireTimeout { .. })
    ));

    pool.release(held).unwrap();
    let again = pool.acquire_timeout(Duration::ZERO).await.unwrap();
    assert_eq!(again.id, 0);
}

#[tokio::test]
async fn timeout_is_retryable_and_pool_recovers() {
    let pool = Pool::new(
        counting_factory(),
        settings(1, 1, Duration::from_millis(50)),
    )
    .unwrap();

    let held = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(err.is_retryable(), "AcquireTimeout should be retryable");

    drop(held);
    let lease = pool.acquire().await.expect("should reuse after release");
    assert_eq!(lease.id, 0);
    assert_eq!(pool.stats().created, 1);
}
