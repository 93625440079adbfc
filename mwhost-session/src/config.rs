// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Tunables for a [`crate::TransportSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    // ---
    /// Upper bound on bytes read from the connection per pump iteration.
    pub read_chunk: usize,

    /// Name given to the background pump thread.
    pub worker_name: String,

    /// Drop the background worker's join handle as soon as it is spawned.
    /// A detached worker cannot be joined by [`crate::TransportSession::join_worker`].
    pub detach_worker: bool,
}

// ---

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_chunk: 1024,
            worker_name: "mwhost-pump".into(),
            detach_worker: false,
        }
    }
}

// ---

impl SessionConfig {
    // ---
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    pub fn detached(mut self) -> Self {
        self.detach_worker = true;
        self
    }
}
