use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---

use mwhost_domain::{Connection, ConnectionPtr, Connector, Endpoint};

// ---

use super::{TcpConfig, TcpError};

// ---------------------------------------------------------------------------
// TcpConnector
// ---------------------------------------------------------------------------

/// [`Connector`] over plain `std::net` TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    // ---
    config: TcpConfig,
}

// ---

impl TcpConnector {
    // ---
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    // ---

    /// Resolve `endpoint` and try each address in turn until one accepts.
    pub fn dial(&self, endpoint: &Endpoint) -> Result<TcpConnection, TcpError> {
        // ---
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|source| TcpError::Resolve {
                endpoint: endpoint.to_string(),
                source,
            })?
            .collect();

        let mut last = None;
        for addr in addrs {
            let attempt = match self.config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return self.configure(stream, addr),
                Err(source) => {
                    tracing::debug!(%addr, "connect attempt failed: {source}");
                    last = Some(TcpError::Connect { addr, source });
                }
            }
        }

        Err(last.unwrap_or_else(|| TcpError::NoAddress(endpoint.to_string())))
    }

    // ---

    fn configure(&self, stream: TcpStream, addr: SocketAddr) -> Result<TcpConnection, TcpError> {
        // ---
        stream.set_nodelay(self.config.nodelay)?;
        stream.set_read_timeout(self.config.read_timeout)?;
        stream.set_write_timeout(self.config.write_timeout)?;
        tracing::info!(%addr, "tcp connected");

        Ok(TcpConnection {
            stream,
            peer: addr,
            closed: AtomicBool::new(false),
        })
    }
}

// ---

impl Connector for TcpConnector {
    // ---
    fn connect(&self, endpoint: &Endpoint) -> io::Result<ConnectionPtr> {
        let conn = self.dial(endpoint)?;
        Ok(Arc::new(conn))
    }
}

// ---------------------------------------------------------------------------
// TcpConnection
// ---------------------------------------------------------------------------

/// One TCP stream. `&TcpStream` implements both `Read` and `Write`, so the
/// pump loop can block in `read` while the engine writes from another
/// thread.
#[derive(Debug)]
pub struct TcpConnection {
    // ---
    stream: TcpStream,
    peer: SocketAddr,
    closed: AtomicBool,
}

// ---

impl TcpConnection {
    // ---
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

// ---

impl Connection for TcpConnection {
    // ---
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(bytes)
    }

    fn shutdown(&self) {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            tracing::debug!(peer = %self.peer, "tcp shutdown: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
