use mwhost_domain::{EngineEvent, EngineHost, WriteStatus};

// ---

use super::TransportSession;

// ---------------------------------------------------------------------------
// SessionHost
// ---------------------------------------------------------------------------

/// [`EngineHost`] handed to the engine for the duration of one call.
///
/// Writes and closes go straight to the session's connection. Notifications
/// are only collected here; the session dispatches them once the engine lock
/// has been released.
pub(crate) struct SessionHost<'a> {
    // ---
    pub session: &'a TransportSession,
    pub events: &'a mut Vec<EngineEvent>,
}

// ---

impl EngineHost for SessionHost<'_> {
    // ---
    fn write(&mut self, bytes: &[u8]) -> WriteStatus {
        self.session.write(bytes)
    }

    fn close(&mut self) {
        self.session.close();
    }

    fn notify(&mut self, event: EngineEvent) {
        self.events.push(event);
    }
}
