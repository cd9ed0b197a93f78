//! Event broadcasting for pool observability.
//!
//! Provides [`PoolEvent`] variants emitted by [`Pool`](crate::Pool) and an
//! [`EventBus`] backed by `tokio::sync::broadcast`.

use std::time::Duration;

use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted while resources move through a pool.
///
/// All variants carry the `pool` name from its settings. `slot` identifies a
/// single resource for its whole life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// The factory produced a new resource.
    Created {
        /// Pool name.
        pool: String,
        /// Slot of the new resource.
        slot: u64,
    },
    /// A resource was lent to a caller.
    Acquired {
        /// Pool name.
        pool: String,
        /// Slot of the resource.
        slot: u64,
        /// True when the resource came from the idle set.
        reused: bool,
        /// Time spent inside `acquire`.
        waited: Duration,
    },
    /// A resource came back from a caller.
    Released {
        /// Pool name.
        pool: String,
        /// Slot of the resource.
        slot: u64,
        /// How long the caller held it.
        usage: Duration,
    },
    /// A resource was disposed and its slot freed.
    Disposed {
        /// Pool name.
        pool: String,
        /// Slot of the resource.
        slot: u64,
        /// Why it was removed.
        reason: DisposeReason,
    },
    /// A caller gave up waiting.
    AcquireTimedOut {
        /// Pool name.
        pool: String,
        /// How long the caller waited.
        waited: Duration,
    },
    /// The factory returned an error.
    CreationFailed {
        /// Pool name.
        pool: String,
        /// Rendered factory error.
        error: String,
    },
    /// The pool was shut down.
    ShutDown {
        /// Pool name.
        pool: String,
    },
}

// ---------------------------------------------------------------------------
// DisposeReason
// ---------------------------------------------------------------------------

/// Reason a resource was permanently removed from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
    /// The caller marked the lease unhealthy.
    Unhealthy,
    /// The resource sat idle longer than `idle_timeout`.
    IdleTimeout,
    /// Maintenance shrank the pool back toward `capacity`.
    Trimmed,
    /// The pool is shutting down.
    Shutdown,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are dropped without backpressure on the pool.
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PoolEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    ///
    /// A subscriber that falls behind by more than the buffer size gets a
    /// `Lagged` error and skips to the latest event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
