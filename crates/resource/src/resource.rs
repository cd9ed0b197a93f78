//! Resource and factory traits
//!
//! A [`Resource`] is the pooled handle itself (a socket, a client session).
//! A [`Factory`] produces one new resource on demand. Backend adapters supply
//! both; the pool never looks inside either.

use std::future::Future;

/// A pooled, stateful handle with exclusive-ownership semantics.
///
/// The pool calls [`dispose`](Resource::dispose) when the handle is removed
/// permanently: on release of an unhealthy lease, on idle expiry, while
/// trimming, and on shutdown.
pub trait Resource: Send + 'static {
    /// Release any OS-level handle held by this resource.
    ///
    /// Must be idempotent: calling it twice is a no-op the second time.
    fn dispose(&mut self);

    /// Whether [`dispose`](Resource::dispose) has already run.
    fn is_disposed(&self) -> bool {
        false
    }
}

/// Creates one new [`Resource`] per call.
///
/// Implemented for every `Fn() -> impl Future<Output = Result<R, E>>`, so a
/// closure capturing its connection parameters is enough:
///
/// ```rust,ignore
/// let addr = settings.host_and_ports[0].clone();
/// let pool = Pool::new(move || Conn::dial(addr.clone()), settings)?;
/// ```
pub trait Factory: Send + Sync + 'static {
    /// The resource type produced.
    type Resource: Resource;

    /// The error returned when creation fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Dial or open exactly one new resource.
    fn create(&self) -> impl Future<Output = Result<Self::Resource, Self::Error>> + Send;
}

impl<F, Fut, R, E> Factory for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send,
    R: Resource,
    E: std::error::Error + Send + Sync + 'static,
{
    type Resource = R;
    type Error = E;

    fn create(&self) -> impl Future<Output = Result<R, E>> + Send {
        self()
    }
}
