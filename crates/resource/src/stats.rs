//! Pool statistics snapshot

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Point-in-time view of a pool.
///
/// Read without blocking acquirers for longer than a counter copy; under
/// concurrent use the snapshot may already be stale when returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolStats {
    /// Live resources: idle + in use + being created.
    pub active: usize,
    /// Resources sitting in the idle set.
    pub idle: usize,
    /// Resources currently lent to callers.
    pub in_use: usize,
    /// Callers blocked in `acquire`.
    pub waiting: usize,
    /// Configured target size.
    pub capacity: usize,
    /// Configured ceiling on live resources.
    pub max_capacity: usize,
    /// Resources ever created by the factory.
    pub created: u64,
    /// Resources ever disposed.
    pub disposed: u64,
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Releases, healthy or not.
    pub releases: u64,
    /// Acquisitions that gave up after their timeout.
    pub timeouts: u64,
    /// Factory calls that returned an error.
    pub creation_failures: u64,
}

impl PoolStats {
    /// Fraction of the ceiling currently lent out (0.0 to 1.0).
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_capacity == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max_capacity as f64
        }
    }

    /// Whether every slot up to `max_capacity` is lent out.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.idle == 0 && self.active >= self.max_capacity
    }
}
