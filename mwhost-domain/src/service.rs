use std::sync::Arc;

use super::codes::ServiceType;
use super::engine::EngineEvent;
use super::error::Result;
use super::ids::PeerId;
use super::message::ImMessage;
use super::state::ConversationState;

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A feature module attached to a session (awareness, IM, storage, ...).
///
/// Services are registered by [`ServiceType`]; the session routes engine
/// events to them after each engine call.
pub trait Service: Send + Sync {
    // ---
    fn service_type(&self) -> ServiceType;

    /// Short human-readable name used in logs.
    fn name(&self) -> &str;

    /// Handle one engine event addressed to this service (or broadcast to
    /// all services).
    fn on_event(&self, event: &EngineEvent) {
        let _ = event;
    }
}

// ---

/// Convenience type alias for a shared [`Service`].
pub type ServicePtr = Arc<dyn Service>;

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// The slice of the engine the conversation delivery gate needs.
///
/// Implemented by the transport session (each call locks the engine for the
/// duration of that call only) and by test doubles.
pub trait Conversations: Send + Sync {
    // ---
    fn conversation_state(&self, peer: &PeerId) -> ConversationState;

    fn open_conversation(&self, peer: &PeerId) -> Result<()>;

    /// Forward `message` to an OPEN conversation right away.
    fn send_now(&self, peer: &PeerId, message: &ImMessage) -> Result<()>;
}
