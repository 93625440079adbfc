//! In-process link simulator for mwhost unit and integration testing.
//!
//! [`SimConnector`] implements [`mwhost_domain::Connector`] using std
//! channels instead of real sockets, and hands the server end of each link
//! to a [`SimListener`]. [`LinkSimConfig`] controls injected impairments:
//!
//! - Refused hosts (connect and redirect failures)
//! - Write failure after N successful writes
//! - Random read fragmentation, with a deterministic RNG seed
//!
//! [`ScriptedEngine`] is a line-oriented protocol engine double that the
//! server end can drive with plain strings.
//!
//! # Quick start
//!
//! ```rust
//! use mwhost_link_sim::{LinkSimConfig, ScriptedEngine, SimConnector};
//!
//! let (connector, listener) = SimConnector::new(LinkSimConfig::perfect());
//! let (engine, probe) = ScriptedEngine::new();
//! ```

mod config;
mod connection;
mod connector;
mod engine;

// --- public API
pub use config::LinkSimConfig;
pub use connection::{SimConnection, SimPeer};
pub use connector::{LinkEvent, SimConnector, SimListener};
pub use engine::{EngineCall, EngineProbe, ScriptedEngine};
