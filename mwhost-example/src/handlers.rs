//! Logging handlers shared by the demos.

use mwhost_domain::{EngineEvent, PeerId, ReasonCode, Service, ServiceType, SessionState};
use mwhost_session::{ImHandler, ReplayFailure};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// LogHandler
// ---------------------------------------------------------------------------

/// Logs every inbound IM callback.
pub struct LogHandler;

impl ImHandler for LogHandler {
    // ---
    fn on_text(&self, peer: &PeerId, text: &str) {
        tracing::info!(%peer, text, "im text");
    }

    fn on_html(&self, peer: &PeerId, html: &str) {
        tracing::info!(%peer, html, "im html");
    }

    fn on_typing(&self, peer: &PeerId, typing: bool) {
        tracing::info!(%peer, typing, "im typing");
    }

    fn on_opened(&self, peer: &PeerId) {
        tracing::info!(%peer, "conversation open");
    }

    fn on_closed(&self, peer: &PeerId, reason: ReasonCode, dropped: usize) {
        tracing::info!(%peer, %reason, dropped, "conversation closed");
    }

    fn on_send_failed(&self, failure: &ReplayFailure) {
        tracing::warn!(peer = %failure.peer, kind = ?failure.message.kind(), "queued send failed: {}", failure.error);
    }
}

// ---------------------------------------------------------------------------
// StatusLog
// ---------------------------------------------------------------------------

/// Session-wide observer: logs protocol state changes and admin broadcasts
/// and publishes the latest [`SessionState`].
pub struct StatusLog {
    // ---
    state_tx: watch::Sender<Option<SessionState>>,
}

// ---

impl StatusLog {
    // ---
    /// Not a real server service; only used to register the observer.
    pub const SERVICE_TYPE: ServiceType = ServiceType(0x0000_7000);

    pub fn new() -> (Self, watch::Receiver<Option<SessionState>>) {
        let (state_tx, state_rx) = watch::channel(None);
        (Self { state_tx }, state_rx)
    }
}

// ---

impl Service for StatusLog {
    // ---
    fn service_type(&self) -> ServiceType {
        Self::SERVICE_TYPE
    }

    fn name(&self) -> &str {
        "status-log"
    }

    fn on_event(&self, event: &EngineEvent) {
        // ---
        match event {
            EngineEvent::StateChanged { state, info } => {
                tracing::info!(?state, %info, "protocol state");
                self.state_tx.send_replace(Some(*state));
            }
            EngineEvent::Admin { text } => tracing::info!(text, "admin broadcast"),
            EngineEvent::Redirect { host } => tracing::info!(host, "server requested redirect"),
            _ => {}
        }
    }
}
