//! TCP transport for the mwhost session host.
//!
//! Implements [`mwhost_domain::Connector`] over blocking `std::net` sockets.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mwhost_tcp::{TcpConfig, TcpConnector};
//!
//! let connector = Arc::new(TcpConnector::new(TcpConfig::default()));
//! let session   = TransportSession::new(endpoint, identity, engine, connector, config);
//! ```

mod config;
mod connection;
mod error;

pub use config::TcpConfig;
pub use connection::{TcpConnection, TcpConnector};
pub use error::TcpError;
