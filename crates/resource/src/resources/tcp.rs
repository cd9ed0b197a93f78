//! Plain TCP connection adapter.
//!
//! Dials the single endpoint in [`Settings::host_and_ports`]. Protocol
//! framing is left to the caller, which works on the raw stream.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::resource::{Factory, Resource};
use crate::settings::Settings;

/// Option key: connect timeout in milliseconds.
pub const CONNECT_TIMEOUT_MS: &str = "connect_timeout_ms";

/// Option key: whether to disable Nagle's algorithm (default `true`).
pub const NODELAY: &str = "nodelay";

/// Factory dialing one TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Option<Duration>,
    nodelay: bool,
}

impl TcpConnector {
    /// Create a connector for `addr` with default options.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: None,
            nodelay: true,
        }
    }

    /// Read the endpoint and options from pool settings.
    ///
    /// # Errors
    /// [`Error::Configuration`] if there is not exactly one endpoint or an
    /// option does not parse.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let addr = match settings.host_and_ports.as_slice() {
            [addr] => addr.trim().to_string(),
            [] => return Err(Error::configuration("tcp adapter needs an endpoint")),
            many => {
                return Err(Error::configuration(format!(
                    "tcp adapter connects to a single endpoint, got {}",
                    many.len()
                )));
            }
        };
        Ok(Self {
            addr,
            connect_timeout: settings
                .option::<u64>(CONNECT_TIMEOUT_MS)?
                .map(Duration::from_millis),
            nodelay: settings.option_or(NODELAY, true)?,
        })
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The endpoint this connector dials.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> io::Result<TcpConnection> {
        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {timeout:?}", self.addr),
                    )
                })??,
            None => TcpStream::connect(&self.addr).await?,
        };
        // Small request/response payloads; latency over throughput.
        stream.set_nodelay(self.nodelay)?;
        let peer = stream.peer_addr()?;
        tracing::debug!(%peer, "tcp connection established");
        Ok(TcpConnection {
            stream: Some(stream),
            peer,
        })
    }
}

impl Factory for TcpConnector {
    type Resource = TcpConnection;
    type Error = io::Error;

    async fn create(&self) -> io::Result<TcpConnection> {
        self.connect().await
    }
}

/// A pooled TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl TcpConnection {
    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The underlying stream.
    ///
    /// # Errors
    /// `NotConnected` after the connection was disposed.
    pub fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection disposed"))
    }
}

impl Resource for TcpConnection {
    fn dispose(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(peer = %self.peer, "tcp connection closed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.stream.is_none()
    }
}
