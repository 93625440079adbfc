use std::sync::{Mutex, PoisonError};

// ---

use uuid::Uuid;

// ---

use mwhost_domain::{ConnectionPtr, Endpoint};

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// One live connection. The id distinguishes it from the connection a
/// redirect replaced, so the pump loop can tell a deliberate release from
/// an abrupt close.
#[derive(Clone)]
pub(crate) struct Link {
    // ---
    pub id: Uuid,
    pub endpoint: Endpoint,
    pub conn: ConnectionPtr,
}

// ---------------------------------------------------------------------------
// LinkSlot
// ---------------------------------------------------------------------------

/// Holder of the session's current [`Link`], if any.
///
/// The lock is only held to swap the handle; reads and writes happen on a
/// cloned `Arc` outside it so `release` never waits on a blocked socket.
#[derive(Default)]
pub(crate) struct LinkSlot {
    // ---
    link: Mutex<Option<Link>>,
}

// ---

impl LinkSlot {
    // ---
    pub fn current(&self) -> Option<Link> {
        self.lock().clone()
    }

    // ---

    pub fn is_attached(&self, id: Uuid) -> bool {
        self.lock().as_ref().is_some_and(|l| l.id == id)
    }

    // ---

    pub fn install(&self, endpoint: Endpoint, conn: ConnectionPtr) -> Uuid {
        // ---
        let id = Uuid::new_v4();
        let old = self.lock().replace(Link { id, endpoint, conn });
        if let Some(old) = old {
            old.conn.shutdown();
        }
        id
    }

    // ---

    /// Detach and shut down the current link. Returns the released link id.
    pub fn release(&self) -> Option<Uuid> {
        // ---
        let link = self.lock().take()?;
        link.conn.shutdown();
        tracing::debug!(link_id = %link.id, endpoint = %link.endpoint, "connection released");
        Some(link.id)
    }

    // ---

    /// Like [`release`](Self::release), but only if `id` is still current.
    pub fn release_if(&self, id: Uuid) -> bool {
        // ---
        let link = {
            let mut slot = self.lock();
            match slot.as_ref() {
                Some(l) if l.id == id => slot.take(),
                _ => None,
            }
        };
        match link {
            Some(link) => {
                link.conn.shutdown();
                true
            }
            None => false,
        }
    }

    // ---

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
