//! # Mantle Resource Pool
//!
//! Bounded, lazily filled pool of expensive stateful resources (network
//! connections) shared across concurrent tasks. Backend adapters supply a
//! [`Factory`] and a [`Resource`]; the pool handles capacity, waiting with a
//! timeout, reuse, disposal and shutdown.
//!
//! ```rust,ignore
//! let settings = Settings::named("redis").resolve(&Driver::Redis.defaults())?;
//! let pool = Pool::new(TcpConnector::from_settings(&settings)?, settings)?;
//!
//! let mut conn = pool.acquire().await?;
//! conn.stream()?.write_all(b"PING\r\n").await?;
//! pool.release(conn)?;
//! ```

pub mod error;
pub mod events;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pool;
pub mod resource;
pub mod resources;
pub mod settings;
pub mod stats;

pub use error::{BoxError, Error, Result};
pub use events::{DisposeReason, EventBus, PoolEvent};
pub use pool::{Lease, Pool};
pub use resource::{Factory, Resource};
pub use settings::{Defaults, Driver, Settings};
pub use stats::PoolStats;
