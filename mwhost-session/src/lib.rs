//! Client-side session host.
//!
//! # Structure
//!
//! - [`TransportSession`] — connection lifecycle, pump loop, login redirect
//! - [`ConversationGate`] — per-peer pending queue in front of the engine
//! - [`ImService`]        — IM feature module built on the gate
//! - [`ServiceRegistry`]  — feature modules by [`mwhost_domain::ServiceType`]
//! - [`SessionConfig`]    — pump and worker tunables

mod config;
mod gate;
mod host;
mod im;
mod link;
mod registry;
mod session;

// --- config
pub use config::SessionConfig;

// --- session
pub use session::{TransportSession, WeakSession};

// --- gate
pub use gate::{ConversationGate, Delivery, ReplayFailure};

// --- services
pub use im::{ImHandler, ImService, NoopImHandler};
pub use registry::ServiceRegistry;
