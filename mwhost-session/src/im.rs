//! [`ImService`] — instant messaging on top of a [`ConversationGate`].

use std::sync::Arc;

// ---

use mwhost_domain::{
    // ---
    Conversations,
    EngineEvent,
    ImMessage,
    PeerId,
    ReasonCode,
    Result,
    Service,
    ServiceType,
    SessionState,
};

// ---

use super::{ConversationGate, Delivery, ReplayFailure, TransportSession, WeakSession};

// ---------------------------------------------------------------------------
// ImHandler
// ---------------------------------------------------------------------------

/// Application callbacks for IM traffic. Every method defaults to a no-op.
pub trait ImHandler: Send + Sync {
    // ---
    fn on_text(&self, peer: &PeerId, text: &str) {
        let _ = (peer, text);
    }

    fn on_html(&self, peer: &PeerId, html: &str) {
        let _ = (peer, html);
    }

    fn on_subject(&self, peer: &PeerId, subject: &str) {
        let _ = (peer, subject);
    }

    fn on_typing(&self, peer: &PeerId, typing: bool) {
        let _ = (peer, typing);
    }

    fn on_mime(&self, peer: &PeerId, data: &str) {
        let _ = (peer, data);
    }

    /// The conversation with `peer` is OPEN and its queue has been replayed.
    fn on_opened(&self, peer: &PeerId) {
        let _ = peer;
    }

    /// The conversation with `peer` closed; `dropped` queued messages were
    /// discarded.
    fn on_closed(&self, peer: &PeerId, reason: ReasonCode, dropped: usize) {
        let _ = (peer, reason, dropped);
    }

    /// A queued message was refused during replay.
    fn on_send_failed(&self, failure: &ReplayFailure) {
        let _ = failure;
    }
}

// ---

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopImHandler;

impl ImHandler for NoopImHandler {}

// ---------------------------------------------------------------------------
// ImService
// ---------------------------------------------------------------------------

pub struct ImService<C = WeakSession> {
    // ---
    gate: ConversationGate<C>,
    handler: Arc<dyn ImHandler>,
}

// ---

impl ImService<WeakSession> {
    // ---
    /// Create an IM service bound to `session` and register it there.
    pub fn attach(session: &TransportSession, handler: Arc<dyn ImHandler>) -> Result<Arc<Self>> {
        // ---
        let service = Arc::new(Self::new(session.downgrade(), handler));
        session.registry().add(service.clone())?;
        Ok(service)
    }
}

// ---

impl<C: Conversations> ImService<C> {
    // ---
    pub fn new(conversations: C, handler: Arc<dyn ImHandler>) -> Self {
        Self {
            gate: ConversationGate::new(conversations),
            handler,
        }
    }

    pub fn gate(&self) -> &ConversationGate<C> {
        &self.gate
    }

    // ---

    pub fn send(&self, peer: &PeerId, message: ImMessage) -> Result<Delivery> {
        self.gate.send(peer, message)
    }

    pub fn send_text(&self, peer: &PeerId, text: impl Into<String>) -> Result<Delivery> {
        self.send(peer, ImMessage::Text(text.into()))
    }

    pub fn send_html(&self, peer: &PeerId, html: impl Into<String>) -> Result<Delivery> {
        self.send(peer, ImMessage::Html(html.into()))
    }

    pub fn send_subject(&self, peer: &PeerId, subject: impl Into<String>) -> Result<Delivery> {
        self.send(peer, ImMessage::Subject(subject.into()))
    }

    pub fn send_typing(&self, peer: &PeerId, typing: bool) -> Result<Delivery> {
        self.send(peer, ImMessage::Typing(typing))
    }

    pub fn send_mime(&self, peer: &PeerId, data: impl Into<String>) -> Result<Delivery> {
        self.send(peer, ImMessage::Mime(data.into()))
    }

    // ---

    fn on_received(&self, peer: &PeerId, message: &ImMessage) {
        // ---
        match message {
            ImMessage::Text(text) => self.handler.on_text(peer, text),
            ImMessage::Html(html) => self.handler.on_html(peer, html),
            ImMessage::Subject(subject) => self.handler.on_subject(peer, subject),
            ImMessage::Typing(typing) => self.handler.on_typing(peer, *typing),
            ImMessage::Mime(data) => self.handler.on_mime(peer, data),
        }
    }
}

// ---

impl<C: Conversations> Service for ImService<C> {
    // ---
    fn service_type(&self) -> ServiceType {
        ServiceType::IM
    }

    fn name(&self) -> &str {
        "im"
    }

    // ---

    fn on_event(&self, event: &EngineEvent) {
        // ---
        match event {
            EngineEvent::ConversationOpened { peer } => {
                for failure in self.gate.on_opened(peer) {
                    self.handler.on_send_failed(&failure);
                }
                self.handler.on_opened(peer);
            }
            EngineEvent::ConversationClosed { peer, reason } => {
                let dropped = self.gate.on_closed(peer, *reason);
                self.handler.on_closed(peer, *reason, dropped);
            }
            EngineEvent::Received { peer, message } => self.on_received(peer, message),
            EngineEvent::StateChanged {
                state: SessionState::Stopped,
                info,
            } => {
                // Conversations the engine never reported cannot open now.
                // A login redirect lands here too: the engine restarts with
                // no conversations, so nothing queued survives it.
                for peer in self.gate.pending_peers() {
                    let dropped = self.gate.on_closed(&peer, *info);
                    self.handler.on_closed(&peer, *info, dropped);
                }
            }
            _ => {}
        }
    }
}
