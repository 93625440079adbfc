use std::fmt;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Remote host and port a session connects to.
///
/// Only `host` changes over a session's lifetime (login redirect); the port
/// is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    // ---
    pub host: String,
    pub port: u16,
}

// ---

impl Endpoint {
    // ---
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    // ---

    /// Same port, different host.
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        // ---
        Self {
            host: host.into(),
            port: self.port,
        }
    }
}

// ---

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Local login credentials. Opaque to the transport; handed to the engine on
/// every `start`.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    // ---
    pub user_id: String,
    pub password: String,
}

// ---

impl Identity {
    // ---
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

// ---

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Remote user a conversation is held with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    // ---
    pub user: String,

    /// `None` for the local community.
    pub community: Option<String>,
}

// ---

impl PeerId {
    // ---
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            community: None,
        }
    }

    // ---

    pub fn in_community(user: impl Into<String>, community: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            community: Some(community.into()),
        }
    }
}

// ---

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.community {
            Some(community) => write!(f, "{}@{}", self.user, community),
            None => f.write_str(&self.user),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
