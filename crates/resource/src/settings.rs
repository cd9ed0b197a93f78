//! Pool settings and per-backend defaults
//!
//! [`Settings`] is an immutable snapshot handed to [`Pool::new`](crate::Pool::new).
//! Defaulting happens once, in [`Settings::resolve`], against a [`Defaults`]
//! preset; there is no process-wide mutable default.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Default acquisition timeout shared by every preset.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fallback values applied by [`Settings::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
    /// Pool size used when `capacity` or `max_capacity` is unset.
    pub pool_size: usize,
    /// Endpoints used when `host_and_ports` is empty.
    pub endpoints: &'static [&'static str],
    /// Timeout used when `timeout` is zero.
    pub timeout: Duration,
}

impl Defaults {
    /// Redis: 10 connections to `localhost:6379`.
    pub const REDIS: Self = Self {
        pool_size: 10,
        endpoints: &["localhost:6379"],
        timeout: DEFAULT_TIMEOUT,
    };

    /// Memcache: 10 connections to `localhost:11211`.
    pub const MEMCACHE: Self = Self {
        pool_size: 10,
        endpoints: &["localhost:11211"],
        timeout: DEFAULT_TIMEOUT,
    };

    /// MySQL: 100 connections, no default endpoint (a DSN must be given).
    pub const MYSQL: Self = Self {
        pool_size: 100,
        endpoints: &[],
        timeout: DEFAULT_TIMEOUT,
    };
}

/// Backend kind, used to pick a [`Defaults`] preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Driver {
    /// Redis key-value store
    Redis,
    /// Memcache key-value store
    Memcache,
    /// MySQL database
    MySql,
}

impl Driver {
    /// The defaults preset for this driver.
    #[must_use]
    pub const fn defaults(self) -> Defaults {
        match self {
            Self::Redis => Defaults::REDIS,
            Self::Memcache => Defaults::MEMCACHE,
            Self::MySql => Defaults::MYSQL,
        }
    }

    /// Lowercase driver name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memcache => "memcache",
            Self::MySql => "mysql",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memcache" | "memcached" => Ok(Self::Memcache),
            "mysql" => Ok(Self::MySql),
            other => Err(Error::configuration(format!(
                "unknown driver '{other}', expected one of: redis, memcache, mysql"
            ))),
        }
    }
}

/// Configuration snapshot for one pool.
///
/// Zero sizes, a zero timeout and an empty endpoint list mean "unset" and are
/// filled in by [`resolve`](Settings::resolve).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Settings {
    /// Label used in logs, events and errors.
    pub name: String,
    /// Backend endpoints, e.g. `["localhost:6379"]` or a DSN.
    pub host_and_ports: Vec<String>,
    /// Target number of live resources.
    pub capacity: usize,
    /// Hard ceiling on live resources.
    pub max_capacity: usize,
    /// Maximum wait for `acquire`.
    #[cfg_attr(feature = "serde", serde(rename = "timeout_ms", with = "millis"))]
    pub timeout: Duration,
    /// Idle resources older than this are disposed instead of reused.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "idle_timeout_ms", with = "opt_millis")
    )]
    pub idle_timeout: Option<Duration>,
    /// Backend-specific options, e.g. `db = "2"`.
    pub options: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            host_and_ports: Vec::new(),
            capacity: 0,
            max_capacity: 0,
            timeout: Duration::ZERO,
            idle_timeout: None,
            options: HashMap::new(),
        }
    }
}

impl Settings {
    /// Start from unset settings with the given pool name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the endpoint list.
    pub fn with_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_and_ports = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Set `capacity` and `max_capacity`.
    pub fn with_capacity(mut self, capacity: usize, max_capacity: usize) -> Self {
        self.capacity = capacity;
        self.max_capacity = max_capacity;
        self
    }

    /// Set the acquisition timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Add a backend option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Fill unset fields from `defaults`, then validate.
    ///
    /// An unset `max_capacity` becomes the larger of `capacity` and the
    /// preset pool size, so an explicit capacity is never rejected merely
    /// because the preset is smaller.
    pub fn resolve(mut self, defaults: &Defaults) -> Result<Self> {
        if self.host_and_ports.is_empty() {
            self.host_and_ports = defaults.endpoints.iter().map(|e| (*e).to_string()).collect();
        }
        if self.capacity == 0 {
            self.capacity = defaults.pool_size;
        }
        if self.max_capacity == 0 {
            self.max_capacity = self.capacity.max(defaults.pool_size);
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.host_and_ports.is_empty() {
            return Err(Error::configuration("host_and_ports must not be empty"));
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the `0 < capacity <= max_capacity` invariant and the rest of the
    /// snapshot.
    ///
    /// An empty endpoint list is accepted here: a factory closure may carry
    /// its own address. Adapters that dial from the settings check it.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::configuration("capacity must be greater than 0"));
        }
        if self.capacity > self.max_capacity {
            return Err(Error::configuration(format!(
                "capacity ({}) must not exceed max_capacity ({})",
                self.capacity, self.max_capacity
            )));
        }
        if self.max_capacity > Semaphore::MAX_PERMITS {
            return Err(Error::configuration(format!(
                "max_capacity ({}) must not exceed {}",
                self.max_capacity,
                Semaphore::MAX_PERMITS
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout must be greater than zero"));
        }
        if self.host_and_ports.iter().any(|e| e.trim().is_empty()) {
            return Err(Error::configuration("host_and_ports contains a blank entry"));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration("idle_timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Look up an option and parse it.
    ///
    /// Returns `Ok(None)` when the key is absent and a configuration error
    /// naming the key when the value does not parse.
    pub fn option<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.options
            .get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    Error::configuration(format!("option '{key}' has invalid value '{raw}': {e}"))
                })
            })
            .transpose()
    }

    /// Like [`option`](Settings::option), falling back to `default` when absent.
    pub fn option_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.option(key)?.unwrap_or(default))
    }
}

#[cfg(feature = "serde")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(feature = "serde")]
mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
