//! Error types for `mwhost-tcp`.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TcpError {
    // ---
    #[error("cannot resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} resolved to no addresses")]
    NoAddress(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("socket option error: {0}")]
    Socket(#[from] io::Error),
}

// ---

impl TcpError {
    // ---
    fn kind(&self) -> io::ErrorKind {
        match self {
            Self::Resolve { source, .. } | Self::Connect { source, .. } | Self::Socket(source) => {
                source.kind()
            }
            Self::NoAddress(_) => io::ErrorKind::NotFound,
        }
    }
}

// ---------------------------------------------------------------------------
// Bridges
// ---------------------------------------------------------------------------

impl From<TcpError> for io::Error {
    // ---
    fn from(e: TcpError) -> Self {
        io::Error::new(e.kind(), e)
    }
}

// ---

impl From<TcpError> for mwhost_domain::HostError {
    // ---
    fn from(e: TcpError) -> Self {
        mwhost_domain::HostError::Io(e.into())
    }
}
