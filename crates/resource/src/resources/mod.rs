//! Built-in backend adapters.
//!
//! Each adapter pairs a [`Factory`](crate::Factory) built from
//! [`Settings`](crate::Settings) with the [`Resource`](crate::Resource) it
//! produces.

pub mod tcp;

pub use tcp::{TcpConnection, TcpConnector};
