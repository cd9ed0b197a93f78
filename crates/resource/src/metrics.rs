//! Metrics collection for pool events.
//!
//! Consumes a pool's event stream and translates events into counters and
//! histograms via the `metrics` crate.
//!
//! Gated behind the `metrics` feature.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::PoolEvent;

/// Background metrics collector fed by [`Pool::subscribe`](crate::Pool::subscribe).
///
/// # Usage
///
/// ```rust,ignore
/// let collector = MetricsCollector::new(pool.subscribe());
/// let cancel = CancellationToken::new();
/// tokio::spawn(collector.run(cancel));
/// ```
pub struct MetricsCollector {
    receiver: broadcast::Receiver<PoolEvent>,
}

impl MetricsCollector {
    /// Create a collector over an event receiver.
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<PoolEvent>) -> Self {
        Self { receiver }
    }

    /// Run the collector loop until the pool is dropped or `cancel` fires.
    ///
    /// Lagged events are skipped with a warning.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                result = self.receiver.recv() => {
                    match result {
                        Ok(event) => Self::record_event(&event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(
                                skipped = n,
                                "MetricsCollector lagged behind pool events"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    }

    fn record_event(event: &PoolEvent) {
        match event {
            PoolEvent::Created { pool, .. } => {
                metrics::counter!("pool.create.total", "pool" => pool.clone()).increment(1);
            }
            PoolEvent::Acquired {
                pool,
                reused,
                waited,
                ..
            } => {
                metrics::counter!(
                    "pool.acquire.total",
                    "pool" => pool.clone(),
                    "reused" => reused.to_string()
                )
                .increment(1);
                metrics::histogram!("pool.acquire.wait.duration", "pool" => pool.clone())
                    .record(waited.as_secs_f64());
            }
            PoolEvent::Released { pool, usage, .. } => {
                metrics::counter!("pool.release.total", "pool" => pool.clone()).increment(1);
                metrics::histogram!("pool.usage.duration", "pool" => pool.clone())
                    .record(usage.as_secs_f64());
            }
            PoolEvent::Disposed { pool, reason, .. } => {
                metrics::counter!(
                    "pool.dispose.total",
                    "pool" => pool.clone(),
                    "reason" => format!("{reason:?}")
                )
                .increment(1);
            }
            PoolEvent::AcquireTimedOut { pool, .. } => {
                metrics::counter!("pool.acquire.timeout.total", "pool" => pool.clone())
                    .increment(1);
            }
            PoolEvent::CreationFailed { pool, .. } => {
                metrics::counter!("pool.create.failure.total", "pool" => pool.clone())
                    .increment(1);
            }
            // Shutdown is logged; no dedicated metric.
            PoolEvent::ShutDown { .. } => {}
        }
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish()
    }
}

/// Create a [`MetricsCollector`] and spawn it as a background task.
pub fn spawn_metrics_collector(
    receiver: broadcast::Receiver<PoolEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(MetricsCollector::new(receiver).run(cancel))
}
