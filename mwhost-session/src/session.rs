//! [`TransportSession`] — owns the connection, drives the pump loop and
//! follows login redirects.
//!
//! # Threads
//!
//! The pump loop runs either on the thread that called
//! [`start(false)`](TransportSession::start) or on a dedicated named
//! `std::thread` (`start(true)`). Every other operation may be called from
//! any thread.
//!
//! # Engine calls
//!
//! The engine sits behind a mutex. Each call receives a host handle whose
//! `write`/`close` act on the connection immediately and whose `notify`
//! only records the event. Recorded events are dispatched after the engine
//! lock is released, on the calling thread: redirects are followed there
//! and everything else is routed through the [`ServiceRegistry`]. Services
//! may therefore call back into the session from `on_event`.
//!
//! # Connection end
//!
//! | cause                              | pump loop reaction                     |
//! |------------------------------------|----------------------------------------|
//! | peer closed / read error           | `engine.stop(CONNECTION_BROKEN)`, exit |
//! | write failure                      | socket shut down, same as above        |
//! | `close()` / `stop()` / engine close| exit quietly                           |
//! | redirect                           | continue on the new connection         |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{JoinHandle, Thread};

// ---

use tokio::sync::watch;
use uuid::Uuid;

// ---

use mwhost_domain::{
    // ---
    ConnectionPtr,
    Connector,
    ConversationState,
    Conversations,
    Endpoint,
    EngineEvent,
    EngineHost,
    HostError,
    Identity,
    ImMessage,
    PeerId,
    ProtocolEngine,
    ReasonCode,
    Result,
    TransportState,
    WriteStatus,
};

// ---

use super::host::SessionHost;
use super::link::LinkSlot;
use super::{ServiceRegistry, SessionConfig};

// ---------------------------------------------------------------------------
// PumpSlot
// ---------------------------------------------------------------------------

/// Marks a running (or starting) pump loop. Reserved by `start` before the
/// connection is opened so two concurrent starts cannot both succeed.
struct PumpSlot {
    // ---
    token: Uuid,

    /// Thread running the loop. `None` while `start` is still connecting.
    thread: Option<Thread>,
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

struct Inner {
    // ---
    endpoint: Mutex<Endpoint>,
    identity: Identity,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    engine: Mutex<Box<dyn ProtocolEngine>>,
    link: LinkSlot,
    pump: Mutex<Option<PumpSlot>>,

    /// Bumped by every `stop`. A redirect begun under an older value is
    /// abandoned instead of attaching its new connection.
    stops: Mutex<u64>,

    /// Join handle of the last non-detached background worker.
    worker: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<TransportState>,
    registry: ServiceRegistry,
}

// ---------------------------------------------------------------------------
// TransportSession
// ---------------------------------------------------------------------------

/// Cheap-clone handle on one client session.
#[derive(Clone)]
pub struct TransportSession {
    // ---
    inner: Arc<Inner>,
}

// ---

impl TransportSession {
    // ---
    pub fn new(
        endpoint: Endpoint,
        identity: Identity,
        engine: impl ProtocolEngine + 'static,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
    ) -> Self {
        // ---
        let (state_tx, _) = watch::channel(TransportState::Idle);
        let inner = Inner {
            endpoint: Mutex::new(endpoint),
            identity,
            config,
            connector,
            engine: Mutex::new(Box::new(engine)),
            link: LinkSlot::default(),
            pump: Mutex::new(None),
            stops: Mutex::new(0),
            worker: Mutex::new(None),
            state_tx,
            registry: ServiceRegistry::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // ---

    /// Non-owning handle, for services that must not keep the session alive.
    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // --- accessors ----------------------------------------------------------

    /// Current endpoint. The host changes after a redirect; the port never
    /// does.
    pub fn endpoint(&self) -> Endpoint {
        lock(&self.inner.endpoint).clone()
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.current().is_some()
    }

    pub fn transport_state(&self) -> TransportState {
        *self.inner.state_tx.borrow()
    }

    /// Use [`watch::Receiver::changed()`] to await each transition.
    pub fn state_rx(&self) -> watch::Receiver<TransportState> {
        self.inner.state_tx.subscribe()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    /// Thread currently running the pump loop, if any.
    pub fn current_worker(&self) -> Option<Thread> {
        lock(&self.inner.pump).as_ref().and_then(|p| p.thread.clone())
    }

    // --- lifecycle ----------------------------------------------------------

    /// Connect, start the engine and run the pump loop.
    ///
    /// With `background = false` the loop runs on the calling thread and
    /// this returns when it exits. With `background = true` the loop runs on
    /// a new thread named after [`SessionConfig::worker_name`] and this
    /// returns once the engine has been started.
    pub fn start(&self, background: bool) -> Result<()> {
        // ---
        let token = self.reserve_pump()?;

        let endpoint = self.endpoint();
        self.set_state(TransportState::Connecting);
        let conn = match self.inner.connector.connect(&endpoint) {
            Ok(conn) => conn,
            Err(source) => {
                tracing::warn!(%endpoint, "connect failed: {source}");
                self.release_pump(token);
                self.set_state(TransportState::Idle);
                return Err(HostError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    source,
                });
            }
        };

        let link_id = self.attach(endpoint.clone(), conn);
        tracing::info!(%endpoint, %link_id, user = %self.inner.identity.user_id, "session connected");

        let identity = self.inner.identity.clone();
        if let Err(e) = self.engine_call(|engine, host| engine.start(&identity, host)) {
            self.close();
            self.release_pump(token);
            self.set_state(TransportState::Idle);
            return Err(e);
        }

        if !background {
            self.claim_pump(token, std::thread::current());
            self.pump_loop(token);
            return Ok(());
        }

        let session = self.clone();
        let spawned = std::thread::Builder::new()
            .name(self.inner.config.worker_name.clone())
            .spawn(move || session.pump_loop(token));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("pump worker spawn failed: {e}");
                let _ = self.engine_call(|engine, host| engine.stop(ReasonCode::FAILURE, host));
                self.close();
                self.release_pump(token);
                self.set_state(TransportState::Idle);
                return Err(HostError::Io(e));
            }
        };

        self.claim_pump(token, handle.thread().clone());
        if self.inner.config.detach_worker {
            tracing::debug!(worker = %self.inner.config.worker_name, "pump worker detached");
        } else {
            *lock(&self.inner.worker) = Some(handle);
        }
        Ok(())
    }

    // ---

    /// Session-initiated stop: stop the engine with `reason`, then release
    /// the connection. A pump loop blocked in `read` wakes and exits quietly.
    pub fn stop(&self, reason: ReasonCode) -> Result<()> {
        // ---
        tracing::info!(endpoint = %self.endpoint(), %reason, "stopping session");
        *lock(&self.inner.stops) += 1;
        let result = self.engine_call(|engine, host| engine.stop(reason, host));
        self.close();
        result
    }

    // ---

    /// `stop(SUCCESS)`, then wait for a background worker to finish.
    pub fn shutdown(&self) -> Result<()> {
        // ---
        self.stop(ReasonCode::SUCCESS)?;
        self.join_worker()?;
        Ok(())
    }

    // ---

    /// Join the background worker, if one was spawned and not detached.
    /// Returns `false` when there was nothing to join.
    pub fn join_worker(&self) -> Result<bool> {
        // ---
        let Some(handle) = lock(&self.inner.worker).take() else {
            return Ok(false);
        };

        if handle.thread().id() == std::thread::current().id() {
            // Joining ourselves would never return.
            *lock(&self.inner.worker) = Some(handle);
            return Ok(false);
        }

        handle.join().map_err(|_| HostError::WorkerPanicked)?;
        Ok(true)
    }

    // --- connection ---------------------------------------------------------

    /// Send `bytes` in full over the active connection.
    ///
    /// Never reconnects. A failed write shuts the socket down so the pump
    /// loop observes the loss and stops the engine.
    pub fn write(&self, bytes: &[u8]) -> WriteStatus {
        // ---
        let Some(link) = self.inner.link.current() else {
            return WriteStatus::NotConnected;
        };

        match link.conn.write_all(bytes) {
            Ok(()) => WriteStatus::Sent,
            Err(e) => {
                tracing::warn!(link_id = %link.id, endpoint = %link.endpoint, "write failed: {e}");
                link.conn.shutdown();
                WriteStatus::Retryable
            }
        }
    }

    // ---

    /// Release the connection. Idempotent; callable from any thread.
    pub fn close(&self) {
        self.inner.link.release();
    }

    // --- internals ----------------------------------------------------------

    /// Run `f` against the engine with a fresh host, then dispatch whatever
    /// the engine notified. Fails only if a redirect raised during the call
    /// could not be followed.
    fn engine_call<R>(
        &self,
        f: impl FnOnce(&mut dyn ProtocolEngine, &mut dyn EngineHost) -> R,
    ) -> Result<R> {
        // ---
        let epoch = self.stop_epoch();
        let mut events = Vec::new();
        let out = {
            let mut engine = lock(&self.inner.engine);
            let mut host = SessionHost {
                session: self,
                events: &mut events,
            };
            f(&mut **engine, &mut host)
        };
        self.dispatch(events, epoch)?;
        Ok(out)
    }

    // ---

    fn dispatch(&self, events: Vec<EngineEvent>, epoch: u64) -> Result<()> {
        // ---
        let mut result = Ok(());
        for event in events {
            self.inner.registry.dispatch(&event);

            if let EngineEvent::Redirect { host } = &event {
                if result.is_ok() {
                    result = self.redirect(host, epoch);
                }
            }
        }
        result
    }

    // ---

    /// Follow a login redirect: stop the engine, drop the connection, dial
    /// `new_host` on the same port and start the engine again with the same
    /// identity.
    ///
    /// `epoch` is the stop count seen when the engine raised the redirect. A
    /// `stop` since then wins: the redirect is dropped, or its new connection
    /// is shut down before it is attached.
    fn redirect(&self, new_host: &str, epoch: u64) -> Result<()> {
        // ---
        let old = self.endpoint();
        if self.stop_epoch() != epoch {
            tracing::info!(from = %old, to = new_host, "session stopped, redirect dropped");
            return Ok(());
        }
        tracing::info!(from = %old, to = new_host, "following login redirect");

        self.engine_call(|engine, host| engine.stop(ReasonCode::SUCCESS, host))?;
        self.close();

        let endpoint = {
            let mut ep = lock(&self.inner.endpoint);
            *ep = ep.with_host(new_host);
            ep.clone()
        };

        self.set_state(TransportState::Connecting);
        let conn = match self.inner.connector.connect(&endpoint) {
            Ok(conn) => conn,
            Err(source) => {
                tracing::error!(%endpoint, "redirect connect failed: {source}");
                self.set_state(TransportState::Stopped);
                return Err(HostError::RedirectFailed {
                    host: new_host.to_string(),
                    source,
                });
            }
        };

        let link_id = {
            let stops = lock(&self.inner.stops);
            if *stops != epoch {
                drop(stops);
                tracing::info!(%endpoint, "session stopped during redirect, new connection dropped");
                conn.shutdown();
                self.set_state(TransportState::Stopped);
                return Ok(());
            }
            self.attach(endpoint.clone(), conn)
        };
        tracing::info!(%endpoint, %link_id, "redirected session connected");

        // Checked under the engine lock: a later `stop` queues behind this
        // start and undoes it.
        let identity = self.inner.identity.clone();
        self.engine_call(|engine, host| {
            if self.stop_epoch() == epoch {
                engine.start(&identity, host);
            }
        })
    }

    // ---

    fn pump_loop(&self, token: Uuid) {
        // ---
        let mut buf = vec![0u8; self.inner.config.read_chunk.max(1)];
        tracing::debug!(chunk = buf.len(), "pump loop running");

        loop {
            // ---
            let Some(link) = self.inner.link.current() else {
                tracing::debug!("connection released, pump loop exiting");
                break;
            };

            let n = match link.conn.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(link_id = %link.id, "read failed: {e}");
                    0
                }
            };

            if n == 0 {
                if self.inner.link.is_attached(link.id) {
                    tracing::warn!(link_id = %link.id, endpoint = %link.endpoint, "connection closed by peer");
                    let stopped = self.engine_call(|engine, host| {
                        engine.stop(ReasonCode::CONNECTION_BROKEN, host)
                    });
                    if let Err(e) = stopped {
                        tracing::warn!("engine stop after connection loss: {e}");
                    }
                    self.inner.link.release_if(link.id);
                } else {
                    tracing::debug!(link_id = %link.id, "pump loop saw deliberate close");
                    // A redirect may already have attached a replacement.
                    if self.inner.link.current().is_some() {
                        continue;
                    }
                }
                break;
            }

            tracing::trace!(link_id = %link.id, bytes = n, "chunk read");
            if let Err(e) = self.engine_call(|engine, host| engine.feed(&buf[..n], host)) {
                tracing::error!("pump loop ending: {e}");
                break;
            }
        }

        self.set_state(TransportState::Stopped);
        self.release_pump(token);
        self.set_state(TransportState::Idle);
        tracing::debug!("pump loop exited");
    }

    // ---

    fn reserve_pump(&self) -> Result<Uuid> {
        // ---
        let mut pump = lock(&self.inner.pump);
        if pump.is_some() || self.inner.link.current().is_some() {
            return Err(HostError::AlreadyStarted);
        }
        let token = Uuid::new_v4();
        *pump = Some(PumpSlot {
            token,
            thread: None,
        });
        Ok(token)
    }

    // ---

    fn claim_pump(&self, token: Uuid, thread: Thread) {
        // ---
        if let Some(slot) = lock(&self.inner.pump).as_mut() {
            if slot.token == token {
                slot.thread = Some(thread);
            }
        }
    }

    // ---

    fn release_pump(&self, token: Uuid) {
        // ---
        let mut pump = lock(&self.inner.pump);
        if pump.as_ref().is_some_and(|p| p.token == token) {
            *pump = None;
        }
    }

    // ---

    fn attach(&self, endpoint: Endpoint, conn: ConnectionPtr) -> Uuid {
        // ---
        let id = self.inner.link.install(endpoint, conn);
        self.set_state(TransportState::Running);
        id
    }

    // ---

    fn stop_epoch(&self) -> u64 {
        *lock(&self.inner.stops)
    }

    // ---

    fn set_state(&self, state: TransportState) {
        // ---
        let old = self.inner.state_tx.send_replace(state);
        if old != state {
            tracing::debug!(?old, new = ?state, "transport state");
        }
    }
}

// ---

impl Conversations for TransportSession {
    // ---
    fn conversation_state(&self, peer: &PeerId) -> ConversationState {
        lock(&self.inner.engine).conversation_state(peer)
    }

    fn open_conversation(&self, peer: &PeerId) -> Result<()> {
        self.engine_call(|engine, host| engine.open_conversation(peer, host))
    }

    fn send_now(&self, peer: &PeerId, message: &ImMessage) -> Result<()> {
        self.engine_call(|engine, host| engine.send(peer, message, host))?
    }
}

// ---------------------------------------------------------------------------
// WeakSession
// ---------------------------------------------------------------------------

/// Non-owning [`TransportSession`] handle held by services the session
/// itself owns through its registry.
#[derive(Clone)]
pub struct WeakSession {
    // ---
    inner: Weak<Inner>,
}

// ---

impl WeakSession {
    // ---
    pub fn upgrade(&self) -> Option<TransportSession> {
        self.inner.upgrade().map(|inner| TransportSession { inner })
    }
}

// ---

impl Conversations for WeakSession {
    // ---
    fn conversation_state(&self, peer: &PeerId) -> ConversationState {
        self.upgrade()
            .map_or(ConversationState::Unknown, |s| s.conversation_state(peer))
    }

    fn open_conversation(&self, peer: &PeerId) -> Result<()> {
        self.upgrade()
            .ok_or(HostError::SessionGone)?
            .open_conversation(peer)
    }

    fn send_now(&self, peer: &PeerId, message: &ImMessage) -> Result<()> {
        self.upgrade()
            .ok_or(HostError::SessionGone)?
            .send_now(peer, message)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::io;
    use std::sync::{mpsc, Mutex};
    use std::time::{Duration, Instant};

    use mwhost_link_sim::{
        // ---
        EngineCall,
        EngineProbe,
        LinkEvent,
        LinkSimConfig,
        ScriptedEngine,
        SimConnector,
        SimListener,
    };

    use super::*;
    use crate::{Delivery, ImHandler, ImService, ReplayFailure};

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        session: TransportSession,
        listener: SimListener,
        probe: EngineProbe,
        links: Arc<Mutex<Vec<LinkEvent>>>,
    }

    fn harness(config: LinkSimConfig) -> Harness {
        harness_with(config, |engine| engine)
    }

    fn harness_with(
        config: LinkSimConfig,
        tweak: impl FnOnce(ScriptedEngine) -> ScriptedEngine,
    ) -> Harness {
        // ---
        let (connector, listener) = SimConnector::new(config);
        let links = connector.event_log();
        let (engine, probe) = ScriptedEngine::new();
        let session = TransportSession::new(
            Endpoint::new("primary", 1533),
            Identity::new("alice", "secret"),
            tweak(engine),
            Arc::new(connector),
            SessionConfig::default(),
        );
        Harness {
            session,
            listener,
            probe,
            links,
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        // ---
        let deadline = Instant::now() + WAIT;
        while !cond() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    /// Holds every dial to `host` until the test releases it.
    struct HeldConnector {
        inner: SimConnector,
        host: &'static str,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Connector for HeldConnector {
        fn connect(&self, endpoint: &Endpoint) -> io::Result<ConnectionPtr> {
            if endpoint.host == self.host {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv_timeout(WAIT).unwrap();
            }
            self.inner.connect(endpoint)
        }
    }

    /// Handler that records every callback as a line of text.
    #[derive(Default)]
    struct Inbox {
        lines: Mutex<Vec<String>>,
    }

    impl Inbox {
        fn push(&self, line: String) {
            self.lines.lock().unwrap().push(line);
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        fn has(&self, line: &str) -> bool {
            self.lines().iter().any(|l| l == line)
        }
    }

    impl ImHandler for Inbox {
        fn on_text(&self, peer: &PeerId, text: &str) {
            self.push(format!("text {peer} {text}"));
        }

        fn on_opened(&self, peer: &PeerId) {
            self.push(format!("opened {peer}"));
        }

        fn on_closed(&self, peer: &PeerId, _reason: ReasonCode, dropped: usize) {
            self.push(format!("closed {peer} {dropped}"));
        }

        fn on_send_failed(&self, failure: &ReplayFailure) {
            self.push(format!("failed {} {}", failure.peer, failure.message.kind()));
        }
    }

    // --- lifecycle ----------------------------------------------------------

    #[test]
    fn background_start_runs_named_worker() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        h.session.start(true).unwrap();

        let mut peer = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("hello alice"));
        assert_eq!(h.session.transport_state(), TransportState::Running);

        let worker = h.session.current_worker().unwrap();
        assert_eq!(worker.name(), Some("mwhost-pump"));

        h.session.shutdown().unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("bye 00000000"));
        assert!(peer.wait_closed(WAIT));
        assert_eq!(h.probe.stops(), vec![ReasonCode::SUCCESS]);
        assert!(h.session.current_worker().is_none());
        assert_eq!(h.session.transport_state(), TransportState::Idle);
    }

    #[test]
    fn second_start_is_refused_and_changes_nothing() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        h.session.start(true).unwrap();
        let peer = h.listener.accept_timeout(WAIT).unwrap();

        assert!(matches!(h.session.start(true), Err(HostError::AlreadyStarted)));
        assert!(matches!(h.session.start(false), Err(HostError::AlreadyStarted)));

        assert!(h.session.is_connected());
        assert_eq!(h.probe.starts(), vec!["alice".to_string()]);
        assert!(h.listener.accept_timeout(Duration::from_millis(50)).is_none());

        // The original loop still feeds the engine.
        assert!(peer.send_line("welcome"));
        assert!(wait_until(|| h
            .probe
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::Feed { .. }))));

        h.session.shutdown().unwrap();
    }

    #[test]
    fn connect_failure_leaves_session_restartable() {
        // ---
        let h = harness(LinkSimConfig::perfect().refusing("primary"));

        for _ in 0..2 {
            let err = h.session.start(true).unwrap_err();
            assert!(matches!(err, HostError::ConnectionFailed { .. }), "{err}");
        }
        assert_eq!(h.session.transport_state(), TransportState::Idle);
        assert!(h.probe.starts().is_empty());
    }

    #[test]
    fn peer_close_stops_engine_once_and_clears_worker() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        h.session.start(true).unwrap();
        let mut peer = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("hello alice"));

        peer.hang_up();
        assert!(h.session.join_worker().unwrap());

        assert_eq!(h.probe.stops(), vec![ReasonCode::CONNECTION_BROKEN]);
        assert!(h.probe.stops()[0].is_error());
        assert!(h.session.current_worker().is_none());
        assert!(!h.session.is_connected());
        assert_eq!(h.session.transport_state(), TransportState::Idle);

        // Restartable on a fresh link.
        h.session.start(true).unwrap();
        let peer2 = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer2.link(), 2);
        h.session.shutdown().unwrap();
    }

    #[test]
    fn write_failure_is_fatal_to_connection() {
        // ---
        // `hello` goes through, the next write fails.
        let h = harness(LinkSimConfig::perfect().failing_writes_after(1));
        h.session.start(true).unwrap();
        let _peer = h.listener.accept_timeout(WAIT).unwrap();

        h.session.open_conversation(&PeerId::new("carol")).unwrap();
        assert!(h.session.join_worker().unwrap());

        assert_eq!(h.probe.stops(), vec![ReasonCode::CONNECTION_BROKEN]);
        assert_eq!(h.session.write(b"late"), WriteStatus::NotConnected);
        assert_eq!(h.session.write(b"late").code(), 1);
    }

    #[test]
    fn foreground_start_runs_on_caller_thread() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        let session = h.session.clone();
        let caller = std::thread::Builder::new()
            .name("caller".into())
            .spawn(move || session.start(false))
            .unwrap();

        let mut peer = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("hello alice"));
        assert!(wait_until(|| h
            .session
            .current_worker()
            .is_some_and(|t| t.name() == Some("caller"))));

        peer.hang_up();
        caller.join().unwrap().unwrap();

        assert_eq!(h.probe.stops(), vec![ReasonCode::CONNECTION_BROKEN]);
        assert!(h.session.current_worker().is_none());
        assert!(!h.session.join_worker().unwrap(), "foreground has no worker handle");
    }

    #[test]
    fn deliberate_stop_is_quiet() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        h.session.start(true).unwrap();
        let peer = h.listener.accept_timeout(WAIT).unwrap();

        h.session.stop(ReasonCode::CLIENT_USER_GONE).unwrap();
        assert!(h.session.join_worker().unwrap());
        assert!(peer.is_closed());

        // Only the requested stop, no CONNECTION_BROKEN from the pump loop.
        assert_eq!(h.probe.stops(), vec![ReasonCode::CLIENT_USER_GONE]);
    }

    #[test]
    fn detached_worker_cannot_be_joined() {
        // ---
        let (connector, listener) = SimConnector::new(LinkSimConfig::perfect());
        let (engine, _probe) = ScriptedEngine::new();
        let session = TransportSession::new(
            Endpoint::new("primary", 1533),
            Identity::new("alice", "secret"),
            engine,
            Arc::new(connector),
            SessionConfig::default().detached(),
        );

        session.start(true).unwrap();
        let _peer = listener.accept_timeout(WAIT).unwrap();
        assert!(session.current_worker().is_some());

        session.stop(ReasonCode::SUCCESS).unwrap();
        assert!(!session.join_worker().unwrap());
        assert!(wait_until(|| session.current_worker().is_none()));
    }

    // --- redirect -----------------------------------------------------------

    #[test]
    fn redirect_reconnects_with_same_identity_and_port() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        h.session.start(true).unwrap();
        let mut first = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(first.recv_line(WAIT).as_deref(), Some("hello alice"));

        assert!(first.send_line("redirect backup"));

        let mut second = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(second.recv_line(WAIT).as_deref(), Some("hello alice"));
        assert_eq!(second.endpoint(), &Endpoint::new("backup", 1533));
        assert_eq!(h.session.endpoint(), Endpoint::new("backup", 1533));
        assert_eq!(h.session.identity().user_id, "alice");

        assert_eq!(first.recv_line(WAIT).as_deref(), Some("bye 00000000"));
        assert!(first.is_closed());

        let links = h.links.lock().unwrap().clone();
        assert_eq!(
            links,
            vec![
                LinkEvent::Opened {
                    link: 1,
                    endpoint: Endpoint::new("primary", 1533),
                },
                LinkEvent::Closed {
                    link: 1,
                    endpoint: Endpoint::new("primary", 1533),
                },
                LinkEvent::Opened {
                    link: 2,
                    endpoint: Endpoint::new("backup", 1533),
                },
            ]
        );
        assert_eq!(h.probe.starts(), vec!["alice".to_string(), "alice".to_string()]);
        assert_eq!(h.probe.stops(), vec![ReasonCode::SUCCESS]);

        // The pump loop carried on over the new connection.
        assert!(second.send_line("welcome"));
        assert_eq!(h.session.transport_state(), TransportState::Running);
        h.session.shutdown().unwrap();
        assert!(second.wait_closed(WAIT));
    }

    #[test]
    fn failed_redirect_ends_pump_loop() {
        // ---
        let h = harness(LinkSimConfig::perfect().refusing("backup"));
        h.session.start(true).unwrap();
        let mut peer = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("hello alice"));

        assert!(peer.send_line("redirect backup"));
        assert!(h.session.join_worker().unwrap());

        assert!(!h.session.is_connected());
        assert_eq!(h.session.transport_state(), TransportState::Idle);
        assert!(h.links.lock().unwrap().contains(&LinkEvent::Refused {
            endpoint: Endpoint::new("backup", 1533),
        }));
        assert_eq!(h.probe.starts().len(), 1);
    }

    #[test]
    fn stop_during_redirect_is_not_undone() {
        // ---
        let (sim, listener) = SimConnector::new(LinkSimConfig::perfect());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let connector = HeldConnector {
            inner: sim,
            host: "backup",
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let (engine, probe) = ScriptedEngine::new();
        let session = TransportSession::new(
            Endpoint::new("primary", 1533),
            Identity::new("alice", "secret"),
            engine,
            Arc::new(connector),
            SessionConfig::default(),
        );

        session.start(true).unwrap();
        let mut first = listener.accept_timeout(WAIT).unwrap();
        assert_eq!(first.recv_line(WAIT).as_deref(), Some("hello alice"));
        assert!(first.send_line("redirect backup"));

        // Old link released, new one still dialling.
        entered_rx.recv_timeout(WAIT).unwrap();
        assert!(!session.is_connected());
        session.stop(ReasonCode::CLIENT_USER_GONE).unwrap();
        release_tx.send(()).unwrap();

        assert!(session.join_worker().unwrap());
        let second = listener.accept_timeout(WAIT).unwrap();
        assert!(second.wait_closed(WAIT));

        assert!(!session.is_connected());
        assert_eq!(session.transport_state(), TransportState::Idle);
        assert_eq!(probe.starts(), vec!["alice".to_string()]);
    }

    #[test]
    fn redirect_discards_queued_sends() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        let inbox = Arc::new(Inbox::default());
        let im = ImService::attach(&h.session, inbox.clone()).unwrap();
        let bob = PeerId::new("bob");

        h.session.start(true).unwrap();
        let mut first = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(first.recv_line(WAIT).as_deref(), Some("hello alice"));

        assert_eq!(im.send_text(&bob, "early").unwrap(), Delivery::Queued);
        assert_eq!(first.recv_line(WAIT).as_deref(), Some("open bob"));

        assert!(first.send_line("redirect backup"));
        let mut second = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(second.recv_line(WAIT).as_deref(), Some("hello alice"));

        assert!(wait_until(|| inbox.has("closed bob 1")));
        assert!(im.gate().pending_peers().is_empty());

        // The new connection starts from scratch.
        assert_eq!(im.send_text(&bob, "again").unwrap(), Delivery::Queued);
        assert_eq!(second.recv_line(WAIT).as_deref(), Some("open bob"));
        assert_eq!(h.probe.opens(), vec![bob.clone(), bob]);

        h.session.shutdown().unwrap();
    }

    // --- IM through the session ---------------------------------------------

    #[test]
    fn queued_messages_replay_after_open() {
        // ---
        let h = harness(LinkSimConfig::fragmented(3, 7));
        let inbox = Arc::new(Inbox::default());
        let im = ImService::attach(&h.session, inbox.clone()).unwrap();
        let bob = PeerId::new("bob");

        h.session.start(true).unwrap();
        let mut peer = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("hello alice"));
        assert!(peer.send_line("welcome"));

        assert_eq!(im.send_text(&bob, "one").unwrap(), Delivery::Queued);
        assert_eq!(im.send_subject(&bob, "two").unwrap(), Delivery::Queued);
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("open bob"));
        assert_eq!(h.probe.opens(), vec![bob.clone()]);

        assert!(peer.send_line("opened bob"));
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("text bob one"));
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("subject bob two"));
        assert!(wait_until(|| inbox.has("opened bob")));

        assert_eq!(im.send_text(&bob, "three").unwrap(), Delivery::Sent);
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("text bob three"));

        assert!(peer.send_line("text bob hey there"));
        assert!(wait_until(|| inbox.has("text bob hey there")));

        h.session.shutdown().unwrap();
    }

    #[test]
    fn replay_failure_is_reported_and_drain_continues() {
        // ---
        let h = harness_with(LinkSimConfig::perfect(), |e| e.reject_payload("bad"));
        let inbox = Arc::new(Inbox::default());
        let im = ImService::attach(&h.session, inbox.clone()).unwrap();
        let bob = PeerId::new("bob");

        h.session.start(true).unwrap();
        let mut peer = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("hello alice"));

        for text in ["a", "bad", "c"] {
            assert_eq!(im.send_text(&bob, text).unwrap(), Delivery::Queued);
        }
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("open bob"));

        assert!(peer.send_line("opened bob"));
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("text bob a"));
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("text bob c"));
        assert!(wait_until(|| inbox.has("opened bob")));
        assert!(inbox.has("failed bob text"));
        assert_eq!(im.gate().pending_len(&bob), 0);

        h.session.shutdown().unwrap();
    }

    #[test]
    fn conversation_close_discards_queue() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        let inbox = Arc::new(Inbox::default());
        let im = ImService::attach(&h.session, inbox.clone()).unwrap();
        let carol = PeerId::in_community("carol", "acme");

        h.session.start(true).unwrap();
        let mut peer = h.listener.accept_timeout(WAIT).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("hello alice"));

        im.send_text(&carol, "x").unwrap();
        im.send_typing(&carol, true).unwrap();
        assert_eq!(peer.recv_line(WAIT).as_deref(), Some("open carol@acme"));

        assert!(peer.send_line("closed carol@acme 80002000"));
        assert!(wait_until(|| inbox.has("closed carol@acme 2")));
        assert!(im.gate().pending_peers().is_empty());

        // A late open notification replays nothing.
        assert!(peer.send_line("opened carol@acme"));
        assert!(wait_until(|| inbox.has("opened carol@acme")));
        assert!(h.probe.sends().is_empty());

        h.session.shutdown().unwrap();
    }

    #[test]
    fn service_outliving_session_reports_gone() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        let im = ImService::attach(&h.session, Arc::new(crate::NoopImHandler)).unwrap();
        drop(h);

        let err = im.send_text(&PeerId::new("bob"), "hi").unwrap_err();
        assert!(matches!(err, HostError::SessionGone));
    }

    // --- state watch --------------------------------------------------------

    #[tokio::test]
    async fn state_watch_follows_lifecycle() {
        // ---
        let h = harness(LinkSimConfig::perfect());
        let mut rx = h.session.state_rx();
        assert_eq!(*rx.borrow_and_update(), TransportState::Idle);

        h.session.start(true).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), TransportState::Running);
        let _peer = h.listener.accept_timeout(WAIT).unwrap();

        let session = h.session.clone();
        tokio::task::spawn_blocking(move || session.shutdown())
            .await
            .unwrap()
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), TransportState::Idle);
    }
}
