use std::io;
use std::sync::Arc;

use super::ids::Endpoint;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A connected byte stream.
///
/// All methods take `&self` so the pump loop can block in [`read`] while
/// other threads write or shut the connection down.
///
/// [`read`]: Connection::read
pub trait Connection: Send + Sync {
    // ---
    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed its side.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer or fail.
    fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    /// Shut both directions down, unblocking any pending `read`.
    /// Idempotent.
    fn shutdown(&self);
}

// ---

/// Convenience type alias for a shared [`Connection`].
pub type ConnectionPtr = Arc<dyn Connection>;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Factory for connections. Implementations: `mwhost_tcp::TcpConnector`,
/// `mwhost_link_sim::SimConnector`.
pub trait Connector: Send + Sync {
    // ---
    /// Open a connection to `endpoint`. Connection and read/write timeouts
    /// are the implementation's configuration.
    fn connect(&self, endpoint: &Endpoint) -> io::Result<ConnectionPtr>;
}
