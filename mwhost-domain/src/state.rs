// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Protocol-level session state as reported by the engine.
///
/// The host never drives these transitions itself; it only relays them to
/// services through [`crate::EngineEvent::StateChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    // ---
    Starting,
    Handshake,
    HandshakeAck,
    Login,
    LoginRedirect,
    LoginAck,
    Started,
    Stopping,
    Stopped,
    Unknown,
}

// ---

impl SessionState {
    // ---
    pub fn is_started(self) -> bool {
        self == Self::Started
    }

    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

// ---------------------------------------------------------------------------
// TransportState
// ---------------------------------------------------------------------------

/// Observable state of the transport session.
///
/// `Running → Connecting` happens only through a login redirect. `Stopped`
/// is terminal for one connection instance; the session then settles back to
/// `Idle` and may be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    // ---
    /// No connection, no pump loop.
    Idle,

    /// Opening a socket (initial start or redirect).
    Connecting,

    /// Connected; the pump loop owns the read side.
    Running,

    /// The connection was torn down.
    Stopped,
}

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

/// Per-peer conversation state, authoritative in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationState {
    // ---
    Closed,
    Pending,
    Open,
    Unknown,
}
