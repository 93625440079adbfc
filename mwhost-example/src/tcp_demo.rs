//! Real-socket run: dial the configured server over TCP and keep the session
//! up until Ctrl-C or the server goes away.
//!
//! The engine is the line-oriented scripted engine, so the far end must
//! speak that protocol (e.g. `nc -l 1533` typed by hand).

use std::sync::Arc;

// ---

use mwhost_domain::TransportState;
use mwhost_link_sim::ScriptedEngine;
use mwhost_session::{ImService, TransportSession};
use mwhost_tcp::{TcpConfig, TcpConnector};

// ---

use super::handlers::{LogHandler, StatusLog};
use super::sim_demo::spawn_state_watcher;
use super::Config;

// ---

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let connector = TcpConnector::new(TcpConfig::default());
    let (engine, _probe) = ScriptedEngine::new();
    let session = TransportSession::new(
        cfg.endpoint(),
        cfg.identity(),
        engine,
        Arc::new(connector),
        cfg.session_config(),
    );

    ImService::attach(&session, Arc::new(LogHandler))?;
    let (status, _protocol_rx) = StatusLog::new();
    session.registry().add(Arc::new(status))?;
    let watcher = spawn_state_watcher(session.state_rx());
    let mut state_rx = session.state_rx();

    // Background either way; the async side waits on the watch channel.
    let s = session.clone();
    tokio::task::spawn_blocking(move || s.start(true)).await??;
    tracing::info!(endpoint = %session.endpoint(), "tcp session started; Ctrl-C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
        _ = state_rx.wait_for(|s| *s == TransportState::Idle) => {
            tracing::info!("server closed the session");
        }
    }

    let s = session.clone();
    tokio::task::spawn_blocking(move || s.shutdown()).await??;
    watcher.abort();
    Ok(())
}
