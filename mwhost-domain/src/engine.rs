use super::codes::{ReasonCode, ServiceType};
use super::error::Result;
use super::ids::{Identity, PeerId};
use super::message::ImMessage;
use super::state::{ConversationState, SessionState};

// ---------------------------------------------------------------------------
// WriteStatus
// ---------------------------------------------------------------------------

/// Outcome of [`EngineHost::write`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    // ---
    /// The whole buffer was handed to the connection.
    Sent,

    /// The connection failed mid-send. Fatal to the current connection; the
    /// host does not retry.
    Retryable,

    /// There is no live connection.
    NotConnected,
}

// ---

impl WriteStatus {
    // ---
    /// Integer form expected by engines that speak in status codes:
    /// `0` sent, `-1` failed, `1` not connected.
    pub fn code(self) -> i32 {
        match self {
            Self::Sent => 0,
            Self::Retryable => -1,
            Self::NotConnected => 1,
        }
    }

    pub fn is_sent(self) -> bool {
        self == Self::Sent
    }
}

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Notification raised by the engine while it runs on behalf of the host.
///
/// Events are collected during an engine call and dispatched once the call
/// returns, on the same thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    // ---
    /// Protocol session state changed. `info` carries the stop reason for
    /// `Stopping` / `Stopped`.
    StateChanged {
        state: SessionState,
        info: ReasonCode,
    },

    /// The server asked the client to log in through a different host.
    Redirect { host: String },

    /// Administrator broadcast.
    Admin { text: String },

    /// A conversation with `peer` reached OPEN.
    ConversationOpened { peer: PeerId },

    /// A conversation with `peer` closed, or failed to open.
    ConversationClosed { peer: PeerId, reason: ReasonCode },

    /// An inbound message on an open conversation.
    Received { peer: PeerId, message: ImMessage },
}

// ---

impl EngineEvent {
    // ---
    /// The feature module this event belongs to, or `None` for session-wide
    /// events that every service sees.
    pub fn service_type(&self) -> Option<ServiceType> {
        // ---
        match self {
            Self::ConversationOpened { .. }
            | Self::ConversationClosed { .. }
            | Self::Received { .. } => Some(ServiceType::IM),
            Self::StateChanged { .. } | Self::Redirect { .. } | Self::Admin { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineHost
// ---------------------------------------------------------------------------

/// Capabilities the host lends the engine for the duration of one call.
///
/// Passed explicitly into every [`ProtocolEngine`] method instead of being
/// stored in the engine, so there is no ownership cycle between the engine
/// and the session that drives it.
pub trait EngineHost {
    // ---
    /// Place `bytes` on the wire. Blocks until the full buffer is written or
    /// the write fails. Never reconnects.
    fn write(&mut self, bytes: &[u8]) -> WriteStatus;

    /// Tear the connection down. Idempotent.
    fn close(&mut self);

    /// Queue a notification for dispatch after the current engine call.
    fn notify(&mut self, event: EngineEvent);
}

// ---------------------------------------------------------------------------
// ProtocolEngine
// ---------------------------------------------------------------------------

/// Stateful protocol codec driven by the transport session.
///
/// The engine parses inbound bytes, tracks handshake/login and per-peer
/// conversation state, and decides what must be written next. It never
/// touches a socket: all I/O goes through the [`EngineHost`] it is handed.
pub trait ProtocolEngine: Send {
    // ---
    /// Begin handshake and login as `identity`. Typically writes the
    /// handshake before returning.
    fn start(&mut self, identity: &Identity, host: &mut dyn EngineHost);

    /// Consume bytes read from the connection.
    fn feed(&mut self, bytes: &[u8], host: &mut dyn EngineHost);

    /// Stop the protocol session with `reason`. Expected to request
    /// [`EngineHost::close`]; must tolerate being called while already
    /// stopped.
    fn stop(&mut self, reason: ReasonCode, host: &mut dyn EngineHost);

    /// Current conversation state with `peer`.
    fn conversation_state(&self, peer: &PeerId) -> ConversationState;

    /// Ask the server to open a conversation with `peer`. The outcome is
    /// reported later as `ConversationOpened` / `ConversationClosed`.
    fn open_conversation(&mut self, peer: &PeerId, host: &mut dyn EngineHost);

    /// Send `message` over an OPEN conversation with `peer`.
    fn send(&mut self, peer: &PeerId, message: &ImMessage, host: &mut dyn EngineHost)
        -> Result<()>;
}
