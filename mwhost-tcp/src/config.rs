use std::time::Duration;

// ---------------------------------------------------------------------------
// TcpConfig
// ---------------------------------------------------------------------------

/// Socket options applied by [`crate::TcpConnector`] to every connection.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    // ---
    /// Per-address connect timeout. `None` = OS default.
    pub connect_timeout: Option<Duration>,

    /// A read that waits longer than this fails, which the pump loop treats
    /// as a lost connection. `None` = block indefinitely.
    pub read_timeout: Option<Duration>,

    pub write_timeout: Option<Duration>,

    /// Set `TCP_NODELAY` so each protocol frame goes out without Nagle delay.
    pub nodelay: bool,
}

// ---

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            read_timeout: None,
            write_timeout: Some(Duration::from_secs(30)),
            nodelay: true,
        }
    }
}
