use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ---

use rand::rngs::StdRng;
use rand::SeedableRng;

// ---

use mwhost_domain::{ConnectionPtr, Connector, Endpoint};

// ---

use super::{LinkSimConfig, SimConnection, SimPeer};

// ---------------------------------------------------------------------------
// LinkEvent
// ---------------------------------------------------------------------------

/// Connection lifecycle record kept by [`SimConnector`], in the order the
/// events happened. Lets tests assert "old link closed before new link
/// opened".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    // ---
    Opened { link: u64, endpoint: Endpoint },
    Closed { link: u64, endpoint: Endpoint },
    Refused { endpoint: Endpoint },
}

// ---------------------------------------------------------------------------
// SimConnector
// ---------------------------------------------------------------------------

/// In-process [`Connector`]. Does not use real sockets.
///
/// Every successful `connect` hands the server end of the new link to the
/// paired [`SimListener`].
pub struct SimConnector {
    // ---
    config: LinkSimConfig,
    next_link: AtomicU64,
    accept_tx: Mutex<mpsc::Sender<SimPeer>>,
    log: Arc<Mutex<Vec<LinkEvent>>>,
}

// ---

impl SimConnector {
    // ---
    /// Create a connector and the listener that receives its peers.
    pub fn new(config: LinkSimConfig) -> (Self, SimListener) {
        // ---
        let (accept_tx, accept_rx) = mpsc::channel();
        let connector = Self {
            config,
            next_link: AtomicU64::new(1),
            accept_tx: Mutex::new(accept_tx),
            log: Arc::new(Mutex::new(Vec::new())),
        };
        (connector, SimListener { rx: accept_rx })
    }

    // ---

    /// Snapshot of every connect / close / refusal so far.
    pub fn events(&self) -> Vec<LinkEvent> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // ---

    /// Shared handle on the event log, for assertions after the connector
    /// has been moved into a session.
    pub fn event_log(&self) -> Arc<Mutex<Vec<LinkEvent>>> {
        Arc::clone(&self.log)
    }

    // ---

    fn record(&self, event: LinkEvent) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

// ---

impl Connector for SimConnector {
    // ---
    fn connect(&self, endpoint: &Endpoint) -> io::Result<ConnectionPtr> {
        // ---
        if self.config.refuse_hosts.iter().any(|h| *h == endpoint.host) {
            tracing::debug!(%endpoint, "sim connect refused");
            self.record(LinkEvent::Refused {
                endpoint: endpoint.clone(),
            });
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{endpoint} refused by link simulator"),
            ));
        }

        let link = self.next_link.fetch_add(1, Ordering::SeqCst);
        let (client_tx, peer_rx) = mpsc::channel();
        let (peer_tx, client_rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));

        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(link)),
            None => StdRng::from_entropy(),
        };

        let conn = SimConnection::new(
            link,
            endpoint.clone(),
            client_tx,
            client_rx,
            peer_tx.clone(),
            Arc::clone(&closed),
            self.config.fail_writes_after,
            self.config.max_chunk,
            rng,
            Arc::clone(&self.log),
        );
        let peer = SimPeer::new(link, endpoint.clone(), peer_tx, peer_rx, closed);

        self.record(LinkEvent::Opened {
            link,
            endpoint: endpoint.clone(),
        });

        // A test that never accepts simply leaves the peer unread.
        self.accept_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(peer)
            .ok();

        tracing::debug!(link, %endpoint, "sim connection opened");
        Ok(Arc::new(conn))
    }
}

// ---------------------------------------------------------------------------
// SimListener
// ---------------------------------------------------------------------------

/// Receives the server end of every link a [`SimConnector`] opens.
pub struct SimListener {
    // ---
    rx: mpsc::Receiver<SimPeer>,
}

// ---

impl SimListener {
    // ---
    /// Wait up to `timeout` for the next connection.
    pub fn accept_timeout(&self, timeout: Duration) -> Option<SimPeer> {
        self.rx.recv_timeout(timeout).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
