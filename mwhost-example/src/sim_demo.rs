//! In-process demo: a scripted server on the link simulator, an IM service
//! sending through the delivery gate, and (optionally) a login redirect.

use std::sync::Arc;
use std::time::Duration;

// ---

use mwhost_domain::{PeerId, ReasonCode, SessionState, TransportState};
use mwhost_link_sim::{LinkSimConfig, ScriptedEngine, SimConnector, SimListener};
use mwhost_session::{ImService, TransportSession};
use tokio::sync::watch;

// ---

use super::handlers::{LogHandler, StatusLog};
use super::Config;

// ---

const STEP: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let (connector, listener) = SimConnector::new(LinkSimConfig::fragmented(7, 42));
    let server = spawn_server(listener, cfg.redirect_to.clone())?;

    let (engine, probe) = ScriptedEngine::new();
    let session = TransportSession::new(
        cfg.endpoint(),
        cfg.identity(),
        engine,
        Arc::new(connector),
        cfg.session_config(),
    );

    let im = ImService::attach(&session, Arc::new(LogHandler))?;
    let (status, mut protocol_rx) = StatusLog::new();
    session.registry().add(Arc::new(status))?;
    let watcher = spawn_state_watcher(session.state_rx());

    // --- start
    let foreground = if cfg.background() {
        session.start(true)?;
        None
    } else {
        let s = session.clone();
        Some(tokio::task::spawn_blocking(move || s.start(false)))
    };

    tokio::time::timeout(
        STEP,
        protocol_rx.wait_for(|s| s.is_some_and(SessionState::is_started)),
    )
    .await??;
    tracing::info!(endpoint = %session.endpoint(), "logged in");

    // --- chat
    let bob = PeerId::new("bob");
    for text in ["hello bob", "are you there?"] {
        let delivery = im.send_text(&bob, text)?;
        tracing::info!(%bob, text, ?delivery, "submitted");
    }
    im.send_typing(&bob, false)?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // --- stop
    let s = session.clone();
    tokio::task::spawn_blocking(move || s.stop(ReasonCode::SUCCESS)).await??;
    match foreground {
        Some(handle) => handle.await??,
        None => {
            let s = session.clone();
            tokio::task::spawn_blocking(move || s.join_worker()).await??;
        }
    }

    watcher.abort();
    if server.join().is_err() {
        anyhow::bail!("demo server thread panicked");
    }

    println!(
        "engine calls: {} starts, {} sends, stop reasons {:?}",
        probe.starts().len(),
        probe.sends().len(),
        probe.stops(),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Demo server
// ---------------------------------------------------------------------------

/// Serve every link the connector opens until none arrives for a while.
/// The first login is redirected when `redirect_to` is set.
fn spawn_server(
    listener: SimListener,
    redirect_to: Option<String>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    // ---
    std::thread::Builder::new()
        .name("demo-server".into())
        .spawn(move || {
            let mut redirect = redirect_to;
            while let Some(mut peer) = listener.accept_timeout(STEP) {
                tracing::info!(link = peer.link(), endpoint = %peer.endpoint(), "demo server accepted");

                while let Some(line) = peer.recv_line(STEP) {
                    let (verb, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
                    let ok = match verb {
                        "hello" => match redirect.take() {
                            Some(host) => peer.send_line(&format!("redirect {host}")),
                            None => {
                                peer.send_line("welcome")
                                    && peer.send_line("admin maintenance window at 02:00")
                            }
                        },
                        "open" => peer.send_line(&format!("opened {rest}")),
                        "text" => {
                            let (who, payload) = rest.split_once(' ').unwrap_or((rest, ""));
                            peer.send_line(&format!("text {who} echo: {payload}"))
                        }
                        "bye" => break,
                        _ => true,
                    };
                    if !ok {
                        break;
                    }
                }
                tracing::info!(link = peer.link(), "demo server link done");
            }
        })
}

// ---------------------------------------------------------------------------
// State watcher
// ---------------------------------------------------------------------------

pub fn spawn_state_watcher(
    mut rx: watch::Receiver<TransportState>,
) -> tokio::task::JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        loop {
            let state = *rx.borrow_and_update();
            tracing::info!(?state, "transport state");
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
