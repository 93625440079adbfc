//! Core traits and types for the mwhost session host.
//!
//! This crate defines the vocabulary of the system. All other crates depend
//! on `mwhost-domain` and speak its types. No implementations live here.
//!
//! # Structure
//!
//! - [`error`]      — [`HostError`] and [`Result<T>`] alias
//! - [`codes`]      — [`ReasonCode`] and [`ServiceType`] wire constants
//! - [`ids`]        — [`Endpoint`], [`Identity`], [`PeerId`]
//! - [`state`]      — [`SessionState`], [`TransportState`], [`ConversationState`]
//! - [`message`]    — [`ImMessage`] per-peer send operations
//! - [`engine`]     — [`ProtocolEngine`] / [`EngineHost`] contract and [`EngineEvent`]
//! - [`connection`] — [`Connection`] and [`Connector`] byte-stream traits
//! - [`service`]    — [`Service`] feature-module and [`Conversations`] gate seams

mod codes;
mod connection;
mod engine;
mod error;
mod ids;
mod message;
mod service;
mod state;

// --- error
pub use error::{HostError, Result};

// --- codes
pub use codes::{ReasonCode, ServiceType};

// --- ids
pub use ids::{Endpoint, Identity, PeerId};

// --- state
pub use state::{ConversationState, SessionState, TransportState};

// --- message
pub use message::{ImKind, ImMessage};

// --- engine
pub use engine::{
    // ---
    EngineEvent,
    EngineHost,
    ProtocolEngine,
    WriteStatus,
};

// --- connection
pub use connection::{Connection, ConnectionPtr, Connector};

// --- service
pub use service::{Conversations, Service, ServicePtr};
