//! Error types for resource pooling
use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a [`Factory`](crate::Factory).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for pool construction, acquisition and release.
///
/// Every failure is returned to the immediate caller. The pool never retries
/// on the caller's behalf.
#[derive(Error, Debug)]
pub enum Error {
    /// Pool settings are invalid. A pool is never built from them.
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The factory failed to produce a resource. No slot was consumed.
    #[error("Failed to create resource for pool '{pool}': {source}")]
    Creation {
        /// Name of the pool
        pool: String,
        /// The error returned by the factory
        #[source]
        source: BoxError,
    },

    /// No resource became available within the allotted wait.
    #[error("Timed out after {}ms waiting for a resource from pool '{pool}'", .timeout.as_millis())]
    AcquireTimeout {
        /// Name of the pool
        pool: String,
        /// How long the caller was willing to wait
        timeout: Duration,
    },

    /// Caller misuse, such as releasing a lease into a pool it did not come from.
    #[error("Invalid use of pool '{pool}': {message}")]
    Logic {
        /// Name of the pool
        pool: String,
        /// What went wrong
        message: String,
    },

    /// The pool has been shut down and no longer hands out resources.
    #[error("Pool '{pool}' is shut down")]
    Closed {
        /// Name of the pool
        pool: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a creation error from the factory's error
    pub fn creation<S, E>(pool: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Creation {
            pool: pool.into(),
            source: source.into(),
        }
    }

    /// Create a logic error
    pub fn logic<S: Into<String>, M: Into<String>>(pool: S, message: M) -> Self {
        Self::Logic {
            pool: pool.into(),
            message: message.into(),
        }
    }

    /// Create a closed-pool error
    pub fn closed<S: Into<String>>(pool: S) -> Self {
        Self::Closed { pool: pool.into() }
    }

    /// Check if the caller may reasonably retry the operation
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. } | Self::Creation { .. })
    }

    /// Name of the pool that produced this error (if any)
    #[must_use]
    pub fn pool(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => None,
            Self::Creation { pool, .. }
            | Self::AcquireTimeout { pool, .. }
            | Self::Logic { pool, .. }
            | Self::Closed { pool } => Some(pool),
        }
    }
}
