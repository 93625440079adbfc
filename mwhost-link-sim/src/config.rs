// ---------------------------------------------------------------------------
// LinkSimConfig
// ---------------------------------------------------------------------------

/// Configuration for the in-process link simulator.
///
/// All fields default to a perfect link: every host accepts, writes never
/// fail, reads hand back whole chunks as they were sent.
#[derive(Debug, Clone, Default)]
pub struct LinkSimConfig {
    // ---
    /// Upper bound on bytes returned by a single client-side read. Chunks
    /// larger than this are split at random points. `None` = no splitting.
    pub max_chunk: Option<usize>,

    /// Hosts whose connection attempts are refused.
    pub refuse_hosts: Vec<String>,

    /// Number of client writes that succeed before every further write fails
    /// with `ConnectionReset`. `None` = writes never fail.
    pub fail_writes_after: Option<usize>,

    /// RNG seed for reproducible chunk splitting. `None` = random.
    pub seed: Option<u64>,
}

// ---

impl LinkSimConfig {
    // ---
    /// Perfect link. Useful as a baseline.
    pub fn perfect() -> Self {
        Self::default()
    }

    // ---

    /// Reads come back in small random fragments, exercising engines that
    /// must reassemble frames across chunk boundaries.
    pub fn fragmented(max_chunk: usize, seed: u64) -> Self {
        // ---
        Self {
            max_chunk: Some(max_chunk.max(1)),
            seed: Some(seed),
            ..Default::default()
        }
    }

    // ---

    /// Refuse connections to `host`.
    pub fn refusing(mut self, host: impl Into<String>) -> Self {
        self.refuse_hosts.push(host.into());
        self
    }

    // ---

    /// Fail every write after the first `n`.
    pub fn failing_writes_after(mut self, n: usize) -> Self {
        self.fail_writes_after = Some(n);
        self
    }
}
