//! [`ScriptedEngine`] — a line-oriented stand-in for a real protocol engine.
//!
//! Not the Sametime wire format. Each frame is one `\n`-terminated line so
//! tests can drive the "server" side of a session with plain strings.
//!
//! Client → server:
//!
//! ```text
//! hello <user>               start(identity)
//! open <peer>                open_conversation(peer)
//! <kind> <peer> <payload>    send(peer, message); kind = text|html|subject|typing|mime
//! bye <code-hex>             stop(reason)
//! ```
//!
//! Server → client:
//!
//! ```text
//! welcome                    login accepted → Started
//! redirect <host>            login redirect
//! opened <peer>              conversation OPEN
//! closed <peer> <code-hex>   conversation CLOSED
//! <kind> <peer> <payload>    inbound message
//! admin <text>               administrator broadcast
//! stop <code-hex>            server-initiated stop
//! ```
//!
//! Peers are written `user` or `user@community`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

// ---

use mwhost_domain::{
    // ---
    ConversationState,
    EngineEvent,
    EngineHost,
    HostError,
    Identity,
    ImMessage,
    PeerId,
    ProtocolEngine,
    ReasonCode,
    Result,
    SessionState,
};

// ---------------------------------------------------------------------------
// EngineCall / EngineProbe
// ---------------------------------------------------------------------------

/// One call the host made into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    // ---
    Start { user: String },
    Feed { len: usize },
    Stop { reason: ReasonCode },
    Open { peer: PeerId },
    Send { peer: PeerId, message: ImMessage },
}

// ---

/// Cheap-clone view of the calls a [`ScriptedEngine`] has received. Stays
/// usable after the engine has been moved into a session.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    // ---
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

// ---

impl EngineProbe {
    // ---
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // ---

    /// Reasons passed to every `stop`, in order.
    pub fn stops(&self) -> Vec<ReasonCode> {
        // ---
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Stop { reason } => Some(reason),
                _ => None,
            })
            .collect()
    }

    // ---

    /// Users passed to every `start`, in order.
    pub fn starts(&self) -> Vec<String> {
        // ---
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Start { user } => Some(user),
                _ => None,
            })
            .collect()
    }

    // ---

    /// Every `open_conversation` target, in order.
    pub fn opens(&self) -> Vec<PeerId> {
        // ---
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Open { peer } => Some(peer),
                _ => None,
            })
            .collect()
    }

    // ---

    /// Every message handed to `send`, in order.
    pub fn sends(&self) -> Vec<(PeerId, ImMessage)> {
        // ---
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Send { peer, message } => Some((peer, message)),
                _ => None,
            })
            .collect()
    }

    // ---

    fn record(&self, call: EngineCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

// ---------------------------------------------------------------------------
// ScriptedEngine
// ---------------------------------------------------------------------------

pub struct ScriptedEngine {
    // ---
    state: SessionState,
    conversations: HashMap<PeerId, ConversationState>,

    /// Bytes of an inbound line not yet terminated.
    line_buf: Vec<u8>,

    /// Payloads `send` rejects, to exercise per-entry failure handling.
    rejected: Vec<String>,
    probe: EngineProbe,
}

// ---

impl ScriptedEngine {
    // ---
    pub fn new() -> (Self, EngineProbe) {
        // ---
        let probe = EngineProbe::default();
        let engine = Self {
            state: SessionState::Stopped,
            conversations: HashMap::new(),
            line_buf: Vec::new(),
            rejected: Vec::new(),
            probe: probe.clone(),
        };
        (engine, probe)
    }

    // ---

    /// Make `send` fail for any message whose payload equals `payload`.
    pub fn reject_payload(mut self, payload: impl Into<String>) -> Self {
        self.rejected.push(payload.into());
        self
    }

    // ---

    pub fn session_state(&self) -> SessionState {
        self.state
    }

    // ---

    fn set_state(&mut self, state: SessionState, info: ReasonCode, host: &mut dyn EngineHost) {
        // ---
        self.state = state;
        host.notify(EngineEvent::StateChanged { state, info });
    }

    // ---

    fn handle_line(&mut self, line: &str, host: &mut dyn EngineHost) {
        // ---
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        match verb {
            "welcome" => {
                self.set_state(SessionState::LoginAck, ReasonCode::SUCCESS, host);
                self.set_state(SessionState::Started, ReasonCode::SUCCESS, host);
            }
            "redirect" => {
                self.set_state(SessionState::LoginRedirect, ReasonCode::SUCCESS, host);
                host.notify(EngineEvent::Redirect {
                    host: rest.to_string(),
                });
            }
            "opened" => {
                let peer = parse_peer(rest);
                self.conversations
                    .insert(peer.clone(), ConversationState::Open);
                host.notify(EngineEvent::ConversationOpened { peer });
            }
            "closed" => {
                let (who, code) = rest.split_once(' ').unwrap_or((rest, ""));
                let peer = parse_peer(who);
                self.conversations.remove(&peer);
                host.notify(EngineEvent::ConversationClosed {
                    peer,
                    reason: parse_code(code),
                });
            }
            "admin" => host.notify(EngineEvent::Admin {
                text: rest.to_string(),
            }),
            "stop" => self.stop(parse_code(rest), host),
            kind => match parse_message(kind, rest) {
                Some((peer, message)) => host.notify(EngineEvent::Received { peer, message }),
                None => tracing::debug!(line, "scripted engine ignoring unknown line"),
            },
        }
    }
}

// ---

impl ProtocolEngine for ScriptedEngine {
    // ---
    fn start(&mut self, identity: &Identity, host: &mut dyn EngineHost) {
        // ---
        self.probe.record(EngineCall::Start {
            user: identity.user_id.clone(),
        });
        self.line_buf.clear();
        self.set_state(SessionState::Starting, ReasonCode::SUCCESS, host);

        let hello = format!("hello {}\n", identity.user_id);
        if host.write(hello.as_bytes()).is_sent() {
            self.set_state(SessionState::Handshake, ReasonCode::SUCCESS, host);
        } else {
            self.stop(ReasonCode::CONNECTION_BROKEN, host);
        }
    }

    // ---

    fn feed(&mut self, bytes: &[u8], host: &mut dyn EngineHost) {
        // ---
        self.probe.record(EngineCall::Feed { len: bytes.len() });
        self.line_buf.extend_from_slice(bytes);

        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            let before = self.state;
            self.handle_line(line.trim_end_matches('\r'), host);
            if self.state.is_stopped() && !before.is_stopped() {
                self.line_buf.clear();
                break;
            }
        }
    }

    // ---

    fn stop(&mut self, reason: ReasonCode, host: &mut dyn EngineHost) {
        // ---
        self.probe.record(EngineCall::Stop { reason });
        if matches!(self.state, SessionState::Stopping | SessionState::Stopped) {
            return;
        }

        self.set_state(SessionState::Stopping, reason, host);
        for (peer, _) in self.conversations.drain() {
            host.notify(EngineEvent::ConversationClosed { peer, reason });
        }

        // Best effort; the connection is going away regardless.
        let _ = host.write(format!("bye {:08x}\n", reason.0).as_bytes());
        host.close();
        self.set_state(SessionState::Stopped, reason, host);
    }

    // ---

    fn conversation_state(&self, peer: &PeerId) -> ConversationState {
        // ---
        self.conversations
            .get(peer)
            .copied()
            .unwrap_or(ConversationState::Closed)
    }

    // ---

    fn open_conversation(&mut self, peer: &PeerId, host: &mut dyn EngineHost) {
        // ---
        self.probe.record(EngineCall::Open { peer: peer.clone() });
        if self.conversation_state(peer) != ConversationState::Closed {
            return;
        }

        if host.write(format!("open {peer}\n").as_bytes()).is_sent() {
            self.conversations
                .insert(peer.clone(), ConversationState::Pending);
        } else {
            host.notify(EngineEvent::ConversationClosed {
                peer: peer.clone(),
                reason: ReasonCode::CONNECTION_BROKEN,
            });
        }
    }

    // ---

    fn send(&mut self, peer: &PeerId, message: &ImMessage, host: &mut dyn EngineHost) -> Result<()> {
        // ---
        self.probe.record(EngineCall::Send {
            peer: peer.clone(),
            message: message.clone(),
        });

        if self.conversation_state(peer) != ConversationState::Open {
            return Err(HostError::Engine(format!("conversation with {peer} is not open")));
        }

        let payload = payload_of(message);
        if self.rejected.iter().any(|p| *p == payload) {
            return Err(HostError::Engine(format!("{} rejected", message.kind())));
        }

        let line = format!("{} {peer} {payload}\n", message.kind());
        match host.write(line.as_bytes()) {
            status if status.is_sent() => Ok(()),
            status => Err(HostError::Engine(format!(
                "write failed with status {}",
                status.code()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Line helpers
// ---------------------------------------------------------------------------

fn parse_peer(text: &str) -> PeerId {
    // ---
    match text.split_once('@') {
        Some((user, community)) => PeerId::in_community(user, community),
        None => PeerId::new(text),
    }
}

// ---

fn parse_code(text: &str) -> ReasonCode {
    ReasonCode(u32::from_str_radix(text.trim(), 16).unwrap_or(ReasonCode::FAILURE.0))
}

// ---

fn parse_message(kind: &str, rest: &str) -> Option<(PeerId, ImMessage)> {
    // ---
    let (who, payload) = rest.split_once(' ').unwrap_or((rest, ""));
    if who.is_empty() {
        return None;
    }
    let payload = payload.to_string();
    let message = match kind {
        "text" => ImMessage::Text(payload),
        "html" => ImMessage::Html(payload),
        "subject" => ImMessage::Subject(payload),
        "typing" => ImMessage::Typing(payload == "1"),
        "mime" => ImMessage::Mime(payload),
        _ => return None,
    };
    Some((parse_peer(who), message))
}

// ---

fn payload_of(message: &ImMessage) -> String {
    // ---
    match message {
        ImMessage::Text(s) | ImMessage::Html(s) | ImMessage::Subject(s) | ImMessage::Mime(s) => {
            s.clone()
        }
        ImMessage::Typing(on) => String::from(if *on { "1" } else { "0" }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
