use thiserror::Error;

use super::codes::ServiceType;

// ---

#[derive(Debug, Error)]
pub enum HostError {
    // ---
    #[error("session already started")]
    AlreadyStarted,

    #[error("not connected")]
    NotConnected,

    #[error("connection to {endpoint} failed: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("redirect to {host} failed: {source}")]
    RedirectFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service {0} already registered")]
    ServiceExists(ServiceType),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("session has been dropped")]
    SessionGone,

    #[error("pump worker panicked")]
    WorkerPanicked,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---

pub type Result<T> = std::result::Result<T, HostError>;
