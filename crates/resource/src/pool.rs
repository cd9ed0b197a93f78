//! Resource pool: bounded, lazily filled, shared across tasks.
//!
//! `Pool<F>` hands out [`Lease`]s over `F::Resource`, creating resources with
//! the [`Factory`] only when the idle set is empty and the live count is
//! below `max_capacity`. Otherwise `acquire` waits for a release or for its
//! timeout, whichever comes first.
//!
//! Capacity is enforced by a semaphore with `max_capacity` permits. A permit
//! is held by every lent resource and every in-flight creation; idle
//! resources hold none. Idle set, live count and counters share one mutex
//! that is never held across an `.await`.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, TryAcquireError, broadcast};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{DisposeReason, EventBus, PoolEvent};
use crate::resource::{Factory, Resource};
use crate::settings::Settings;
use crate::stats::PoolStats;

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// An idle resource.
struct Entry<R> {
    resource: R,
    slot: u64,
    idle_since: Instant,
}

impl<R> Entry<R> {
    fn new(resource: R, slot: u64) -> Self {
        Self {
            resource,
            slot,
            idle_since: Instant::now(),
        }
    }

    fn is_expired(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|limit| self.idle_since.elapsed() > limit)
    }
}

#[derive(Default)]
struct Counters {
    created: u64,
    disposed: u64,
    acquisitions: u64,
    releases: u64,
    timeouts: u64,
    creation_failures: u64,
}

struct State<R> {
    /// Most recently released last.
    idle: Vec<Entry<R>>,
    /// Idle + lent + being created.
    active: usize,
    /// Slots currently lent to callers.
    lent: HashSet<u64>,
    next_slot: u64,
    closed: bool,
    counters: Counters,
}

/// State shared by the pool handle and every outstanding lease.
struct Shared<R> {
    id: Uuid,
    settings: Settings,
    state: Mutex<State<R>>,
    /// One permit per slot that may still be lent or created.
    semaphore: Semaphore,
    waiting: AtomicUsize,
    events: EventBus,
}

impl<R: Resource> Shared<R> {
    fn name(&self) -> &str {
        &self.settings.name
    }

    /// Return a lent resource. Never blocks.
    fn check_in(&self, slot: u64, resource: R, healthy: bool, usage: Duration) -> Result<()> {
        let mut discard = None;
        let reason = {
            let mut state = self.state.lock();
            if !state.lent.remove(&slot) {
                drop(state);
                let mut resource = resource;
                resource.dispose();
                return Err(Error::logic(
                    self.name(),
                    format!("slot {slot} is not lent out by this pool"),
                ));
            }
            state.counters.releases += 1;
            if state.closed || !healthy {
                state.active -= 1;
                state.counters.disposed += 1;
                discard = Some(resource);
                Some(if state.closed {
                    DisposeReason::Shutdown
                } else {
                    DisposeReason::Unhealthy
                })
            } else {
                state.idle.push(Entry::new(resource, slot));
                None
            }
        };

        // The resource is back in the idle set (or gone) before the permit
        // wakes a waiter.
        self.semaphore.add_permits(1);

        tracing::trace!(pool = %self.name(), slot, ?usage, "resource released");
        self.events.emit(PoolEvent::Released {
            pool: self.settings.name.clone(),
            slot,
            usage,
        });

        if let (Some(mut resource), Some(reason)) = (discard, reason) {
            resource.dispose();
            self.disposed(slot, reason);
        }
        Ok(())
    }

    fn disposed(&self, slot: u64, reason: DisposeReason) {
        tracing::debug!(pool = %self.name(), slot, ?reason, "resource disposed");
        self.events.emit(PoolEvent::Disposed {
            pool: self.settings.name.clone(),
            slot,
            reason,
        });
    }
}

/// A permit taken from the semaphore, and possibly a live-count slot,
/// that has not yet been turned into a lease or an idle entry.
///
/// Dropping it (early return, factory error, cancelled `acquire`) gives
/// both back.
struct Reservation<'a, R: Resource> {
    shared: &'a Shared<R>,
    holds_permit: bool,
    holds_slot: bool,
}

impl<'a, R: Resource> Reservation<'a, R> {
    fn new(shared: &'a Shared<R>) -> Self {
        Self {
            shared,
            holds_permit: true,
            holds_slot: false,
        }
    }

    /// The resource is lent out: the permit travels with the lease.
    fn lend(mut self) {
        self.holds_permit = false;
        self.holds_slot = false;
    }

    /// The resource went to the idle set: the slot stays counted, the
    /// permit goes back.
    fn park(mut self) {
        self.holds_slot = false;
    }
}

impl<R: Resource> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if self.holds_slot {
            self.shared.state.lock().active -= 1;
        }
        if self.holds_permit {
            self.shared.semaphore.add_permits(1);
        }
    }
}

/// Counts a caller as waiting for as long as it is alive.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Popped<R> {
    Ready(Entry<R>),
    Expired(Entry<R>),
    Empty,
}

// ---------------------------------------------------------------------------
// Pool<F>
// ---------------------------------------------------------------------------

/// Generic resource pool.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct Pool<F: Factory> {
    shared: Arc<Shared<F::Resource>>,
    factory: Arc<F>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<F: Factory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.shared.id)
            .field("name", &self.shared.settings.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: Factory> Pool<F> {
    /// Create a pool. No resource is created until the first `acquire`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `settings` is invalid.
    pub fn new(factory: F, settings: Settings) -> Result<Self> {
        settings.validate()?;
        let max = settings.max_capacity;
        tracing::debug!(
            pool = %settings.name,
            capacity = settings.capacity,
            max_capacity = max,
            "pool created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                state: Mutex::new(State {
                    idle: Vec::new(),
                    active: 0,
                    lent: HashSet::new(),
                    next_slot: 0,
                    closed: false,
                    counters: Counters::default(),
                }),
                semaphore: Semaphore::new(max),
                waiting: AtomicUsize::new(0),
                events: EventBus::default(),
                settings,
            }),
            factory: Arc::new(factory),
        })
    }

    /// Unique identifier of this pool instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// The settings the pool was built with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Acquire a resource, waiting at most `settings.timeout`.
    pub async fn acquire(&self) -> Result<Lease<F::Resource>> {
        self.acquire_timeout(self.shared.settings.timeout).await
    }

    /// Acquire a resource, waiting at most `timeout`.
    ///
    /// A zero timeout only succeeds if a resource is idle or a slot is free
    /// right now. If a release and the deadline coincide, the release wins
    /// when it is observed first; a caller that times out holds nothing.
    ///
    /// # Errors
    /// - [`Error::AcquireTimeout`] when nothing became available in time.
    /// - [`Error::Creation`] when the factory fails; the slot is not consumed.
    /// - [`Error::Closed`] after [`shutdown`](Pool::shutdown).
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Lease<F::Resource>> {
        let shared = &*self.shared;
        let started = Instant::now();

        if shared.state.lock().closed {
            return Err(Error::closed(shared.name()));
        }

        let permit = match shared.semaphore.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(Error::closed(shared.name())),
            Err(TryAcquireError::NoPermits) => {
                let _waiting = Waiting::enter(&shared.waiting);
                match tokio::time::timeout(timeout, shared.semaphore.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(Error::closed(shared.name())),
                    Err(_) => {
                        shared.state.lock().counters.timeouts += 1;
                        let waited = started.elapsed();
                        tracing::warn!(pool = %shared.name(), ?timeout, "acquire timed out");
                        shared.events.emit(PoolEvent::AcquireTimedOut {
                            pool: shared.settings.name.clone(),
                            waited,
                        });
                        return Err(Error::AcquireTimeout {
                            pool: shared.settings.name.clone(),
                            timeout,
                        });
                    }
                }
            }
        };
        // The permit now belongs to the reservation.
        permit.forget();
        let mut reservation = Reservation::new(shared);

        loop {
            let popped = {
                let mut state = shared.state.lock();
                if state.closed {
                    return Err(Error::closed(shared.name()));
                }
                match state.idle.pop() {
                    Some(entry) if entry.is_expired(shared.settings.idle_timeout) => {
                        state.active -= 1;
                        state.counters.disposed += 1;
                        Popped::Expired(entry)
                    }
                    Some(entry) => {
                        state.lent.insert(entry.slot);
                        state.counters.acquisitions += 1;
                        Popped::Ready(entry)
                    }
                    None => {
                        state.active += 1;
                        reservation.holds_slot = true;
                        Popped::Empty
                    }
                }
            };

            match popped {
                Popped::Expired(mut entry) => {
                    entry.resource.dispose();
                    shared.disposed(entry.slot, DisposeReason::IdleTimeout);
                }
                Popped::Ready(entry) => {
                    reservation.lend();
                    return Ok(self.lent(entry.resource, entry.slot, true, started));
                }
                Popped::Empty => break,
            }
        }

        let mut resource = match self.factory.create().await {
            Ok(resource) => resource,
            Err(err) => {
                shared.state.lock().counters.creation_failures += 1;
                tracing::warn!(pool = %shared.name(), error = %err, "resource creation failed");
                shared.events.emit(PoolEvent::CreationFailed {
                    pool: shared.settings.name.clone(),
                    error: err.to_string(),
                });
                return Err(Error::creation(shared.name(), err));
            }
        };

        let slot = {
            let mut state = shared.state.lock();
            if state.closed {
                drop(state);
                resource.dispose();
                return Err(Error::closed(shared.name()));
            }
            let slot = state.next_slot;
            state.next_slot += 1;
            state.counters.created += 1;
            state.counters.acquisitions += 1;
            state.lent.insert(slot);
            slot
        };
        reservation.lend();
        self.created(slot);
        Ok(self.lent(resource, slot, false, started))
    }

    /// Return a lease to the pool.
    ///
    /// The resource is disposed instead of parked if the lease was marked
    /// unhealthy or the pool is shut down. Dropping a lease has the same
    /// effect without reporting errors.
    ///
    /// # Errors
    /// [`Error::Logic`] if the lease came from a different pool. This pool
    /// is left untouched and the lease goes back to the pool it came from.
    pub fn release(&self, mut lease: Lease<F::Resource>) -> Result<()> {
        if !Arc::ptr_eq(&lease.shared, &self.shared) {
            return Err(Error::logic(
                self.shared.name(),
                format!(
                    "lease for slot {} belongs to pool '{}' ({})",
                    lease.slot,
                    lease.shared.name(),
                    lease.shared.id
                ),
            ));
        }
        match lease.resource.take() {
            Some(resource) => {
                let usage = lease.acquired_at.elapsed();
                self.shared.check_in(lease.slot, resource, lease.healthy, usage)
            }
            None => Err(Error::logic(self.shared.name(), "lease is empty")),
        }
    }

    /// Acquire, run `op`, release.
    ///
    /// `op` may call [`Lease::mark_unhealthy`] to have the resource disposed
    /// on the way back. An error from `op` is returned unchanged; the lease
    /// is released either way.
    pub async fn with<T, E, Op>(&self, op: Op) -> std::result::Result<T, E>
    where
        Op: AsyncFnOnce(&mut Lease<F::Resource>) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut lease = self.acquire().await?;
        let outcome = op(&mut lease).await;
        self.release(lease)?;
        outcome
    }

    /// Create idle resources until `capacity` are live.
    ///
    /// Stops early without error when every slot is taken. Returns the
    /// number of resources created.
    ///
    /// # Errors
    /// The first [`Error::Creation`], or [`Error::Closed`].
    pub async fn prewarm(&self) -> Result<usize> {
        let shared = &*self.shared;
        let mut created = 0;

        loop {
            let permit = match shared.semaphore.try_acquire() {
                Ok(permit) => permit,
                Err(TryAcquireError::Closed) => return Err(Error::closed(shared.name())),
                Err(TryAcquireError::NoPermits) => break,
            };
            permit.forget();
            let mut reservation = Reservation::new(shared);
            {
                let mut state = shared.state.lock();
                if state.closed {
                    return Err(Error::closed(shared.name()));
                }
                if state.active >= shared.settings.capacity {
                    break;
                }
                state.active += 1;
                reservation.holds_slot = true;
            }

            let mut resource = match self.factory.create().await {
                Ok(resource) => resource,
                Err(err) => {
                    shared.state.lock().counters.creation_failures += 1;
                    tracing::warn!(pool = %shared.name(), error = %err, "prewarm creation failed");
                    shared.events.emit(PoolEvent::CreationFailed {
                        pool: shared.settings.name.clone(),
                        error: err.to_string(),
                    });
                    return Err(Error::creation(shared.name(), err));
                }
            };

            let slot = {
                let mut state = shared.state.lock();
                if state.closed {
                    drop(state);
                    resource.dispose();
                    return Err(Error::closed(shared.name()));
                }
                let slot = state.next_slot;
                state.next_slot += 1;
                state.counters.created += 1;
                state.idle.push(Entry::new(resource, slot));
                slot
            };
            reservation.park();
            self.created(slot);
            created += 1;
        }

        Ok(created)
    }

    /// Dispose idle resources past `idle_timeout`, then trim the oldest idle
    /// resources while more than `capacity` are live.
    ///
    /// Returns the number of resources disposed.
    pub fn maintain(&self) -> usize {
        let shared = &*self.shared;
        let idle_timeout = shared.settings.idle_timeout;
        let capacity = shared.settings.capacity;

        let evicted: Vec<(Entry<F::Resource>, DisposeReason)> = {
            let mut state = shared.state.lock();
            let mut evicted = Vec::new();

            let mut kept = Vec::with_capacity(state.idle.len());
            for entry in state.idle.drain(..) {
                if entry.is_expired(idle_timeout) {
                    evicted.push((entry, DisposeReason::IdleTimeout));
                } else {
                    kept.push(entry);
                }
            }
            state.active -= evicted.len();

            // Oldest first.
            let mut kept = kept.into_iter();
            for entry in kept.by_ref() {
                if state.active <= capacity {
                    state.idle.push(entry);
                    break;
                }
                state.active -= 1;
                evicted.push((entry, DisposeReason::Trimmed));
            }
            state.idle.extend(kept);
            state.counters.disposed += evicted.len() as u64;
            evicted
        };

        let count = evicted.len();
        for (mut entry, reason) in evicted {
            entry.resource.dispose();
            shared.disposed(entry.slot, reason);
        }
        count
    }

    /// Shut the pool down.
    ///
    /// Wakes every waiter with [`Error::Closed`], disposes all idle
    /// resources, and makes every later release dispose its resource.
    /// Calling it again is a no-op. Returns the number of idle resources
    /// disposed.
    pub fn shutdown(&self) -> usize {
        let shared = &*self.shared;
        let drained: Vec<Entry<F::Resource>> = {
            let mut state = shared.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.active -= drained.len();
            state.counters.disposed += drained.len() as u64;
            drained
        };
        shared.semaphore.close();

        let count = drained.len();
        for mut entry in drained {
            entry.resource.dispose();
            shared.disposed(entry.slot, DisposeReason::Shutdown);
        }
        tracing::debug!(pool = %shared.name(), disposed = count, "pool shut down");
        shared.events.emit(PoolEvent::ShutDown {
            pool: shared.settings.name.clone(),
        });
        count
    }

    /// Whether [`shutdown`](Pool::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let shared = &*self.shared;
        let state = shared.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            in_use: state.lent.len(),
            waiting: shared.waiting.load(Ordering::SeqCst),
            capacity: shared.settings.capacity,
            max_capacity: shared.settings.max_capacity,
            created: state.counters.created,
            disposed: state.counters.disposed,
            acquisitions: state.counters.acquisitions,
            releases: state.counters.releases,
            timeouts: state.counters.timeouts,
            creation_failures: state.counters.creation_failures,
        }
    }

    /// Subscribe to pool events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events.subscribe()
    }

    fn created(&self, slot: u64) {
        tracing::debug!(pool = %self.shared.name(), slot, "resource created");
        self.shared.events.emit(PoolEvent::Created {
            pool: self.shared.settings.name.clone(),
            slot,
        });
    }

    fn lent(
        &self,
        resource: F::Resource,
        slot: u64,
        reused: bool,
        started: Instant,
    ) -> Lease<F::Resource> {
        let waited = started.elapsed();
        tracing::trace!(pool = %self.shared.name(), slot, reused, ?waited, "resource acquired");
        self.shared.events.emit(PoolEvent::Acquired {
            pool: self.shared.settings.name.clone(),
            slot,
            reused,
            waited,
        });
        Lease {
            resource: Some(resource),
            shared: Arc::clone(&self.shared),
            slot,
            healthy: true,
            acquired_at: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lease<R>
// ---------------------------------------------------------------------------

/// Exclusive handle to a pooled resource.
///
/// Dereferences to the resource. Pass it to [`Pool::release`] or drop it to
/// give the resource back.
pub struct Lease<R: Resource> {
    resource: Option<R>,
    shared: Arc<Shared<R>>,
    slot: u64,
    healthy: bool,
    acquired_at: Instant,
}

impl<R: Resource> Lease<R> {
    /// Have the resource disposed instead of reused when released.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// False once [`mark_unhealthy`](Lease::mark_unhealthy) was called.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Identifier of the resource within its pool. Stable across leases.
    #[must_use]
    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// Identifier of the pool this lease came from.
    #[must_use]
    pub fn pool_id(&self) -> Uuid {
        self.shared.id
    }

    /// Time since the lease was handed out.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl<R: Resource> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect("lease used after release")
    }
}

impl<R: Resource> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("lease used after release")
    }
}

impl<R: Resource> Drop for Lease<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            let usage = self.acquired_at.elapsed();
            if let Err(err) = self.shared.check_in(self.slot, resource, self.healthy, usage) {
                tracing::error!(pool = %self.shared.name(), error = %err, "lease drop failed");
            }
        }
    }
}

impl<R: Resource + std::fmt::Debug> std::fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.shared.settings.name)
            .field("slot", &self.slot)
            .field("healthy", &self.healthy)
            .field("resource", &self.resource)
            .finish()
    }
}
