use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

// ---

use rand::rngs::StdRng;
use rand::Rng;

// ---

use mwhost_domain::{Connection, Endpoint};

// ---

use super::LinkEvent;

// ---------------------------------------------------------------------------
// SimConnection
// ---------------------------------------------------------------------------

/// Client end of an in-process connection backed by mpsc channels.
///
/// Created in connected pairs with a [`SimPeer`] by
/// [`super::SimConnector`]. An empty chunk on the inbound channel marks EOF;
/// [`Connection::shutdown`] injects one so a blocked `read` returns `Ok(0)`.
pub struct SimConnection {
    // ---
    link: u64,
    endpoint: Endpoint,

    /// Client → peer.
    tx: mpsc::Sender<Vec<u8>>,

    /// Peer → client.
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,

    /// Clone of the peer → client sender, used to wake a blocked reader.
    wake_tx: mpsc::Sender<Vec<u8>>,

    /// Leftover bytes from a partially consumed chunk.
    read_buf: Mutex<Vec<u8>>,
    eof: AtomicBool,
    closed: Arc<AtomicBool>,

    /// `None` = unlimited.
    writes_left: Option<AtomicUsize>,
    max_chunk: Option<usize>,
    rng: Mutex<StdRng>,
    log: Arc<Mutex<Vec<LinkEvent>>>,
}

// ---

impl SimConnection {
    // ---
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        link: u64,
        endpoint: Endpoint,
        tx: mpsc::Sender<Vec<u8>>,
        rx: mpsc::Receiver<Vec<u8>>,
        wake_tx: mpsc::Sender<Vec<u8>>,
        closed: Arc<AtomicBool>,
        fail_writes_after: Option<usize>,
        max_chunk: Option<usize>,
        rng: StdRng,
        log: Arc<Mutex<Vec<LinkEvent>>>,
    ) -> Self {
        // ---
        Self {
            link,
            endpoint,
            tx,
            rx: Mutex::new(rx),
            wake_tx,
            read_buf: Mutex::new(Vec::new()),
            eof: AtomicBool::new(false),
            closed,
            writes_left: fail_writes_after.map(AtomicUsize::new),
            max_chunk,
            rng: Mutex::new(rng),
            log,
        }
    }

    // ---

    /// Copy at most `buf.len()` (and at most `max_chunk`) bytes out of
    /// `pending`, keeping the remainder for the next read.
    fn drain_into(&self, pending: &mut Vec<u8>, buf: &mut [u8]) -> usize {
        // ---
        let mut n = pending.len().min(buf.len());
        if let Some(max) = self.max_chunk {
            let cap = n.min(max);
            if cap > 1 {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                n = rng.gen_range(1..=cap);
            } else {
                n = cap;
            }
        }
        buf[..n].copy_from_slice(&pending[..n]);
        pending.drain(..n);
        n
    }
}

// ---

impl Connection for SimConnection {
    // ---
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        // ---
        if buf.is_empty() {
            return Ok(0);
        }

        let mut pending = self.read_buf.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.is_empty() {
            return Ok(self.drain_into(&mut pending, buf));
        }

        if self.eof.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let chunk = {
            let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };

        match chunk {
            // Data that raced a local shutdown is discarded.
            Ok(chunk) if chunk.is_empty() || self.closed.load(Ordering::SeqCst) => {
                self.eof.store(true, Ordering::SeqCst);
                Ok(0)
            }
            Ok(chunk) => {
                *pending = chunk;
                Ok(self.drain_into(&mut pending, buf))
            }
            Err(mpsc::RecvError) => {
                self.eof.store(true, Ordering::SeqCst);
                Ok(0)
            }
        }
    }

    // ---

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        // ---
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection shut down"));
        }

        if let Some(left) = &self.writes_left {
            let allowed = left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "simulated write failure",
                ));
            }
        }

        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }

    // ---

    fn shutdown(&self) {
        // ---
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(link = self.link, endpoint = %self.endpoint, "sim connection shut down");

        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LinkEvent::Closed {
                link: self.link,
                endpoint: self.endpoint.clone(),
            });

        // Wake a reader blocked in `recv`; tell the peer we are gone.
        self.wake_tx.send(Vec::new()).ok();
        self.tx.send(Vec::new()).ok();
    }
}

// ---------------------------------------------------------------------------
// SimPeer
// ---------------------------------------------------------------------------

/// Server end of a [`SimConnection`], handed out by
/// [`super::SimListener::accept_timeout`].
///
/// Tests drive the "server" side of a session through this handle: read
/// what the client wrote, push bytes back, or hang up.
pub struct SimPeer {
    // ---
    link: u64,
    endpoint: Endpoint,
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
    line_buf: Vec<u8>,
}

// ---

impl SimPeer {
    // ---
    pub(crate) fn new(
        link: u64,
        endpoint: Endpoint,
        tx: mpsc::Sender<Vec<u8>>,
        rx: mpsc::Receiver<Vec<u8>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        // ---
        Self {
            link,
            endpoint,
            tx,
            rx,
            closed,
            line_buf: Vec::new(),
        }
    }

    // ---

    /// Sequence number of this link within its connector.
    pub fn link(&self) -> u64 {
        self.link
    }

    /// Endpoint the client dialled.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `true` once the client shut its end down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ---

    /// Push raw bytes to the client. Returns `false` if the client end has
    /// been dropped.
    pub fn send(&self, bytes: &[u8]) -> bool {
        // ---
        if bytes.is_empty() {
            return true;
        }
        self.tx.send(bytes.to_vec()).is_ok()
    }

    // ---

    /// Push one `\n`-terminated line.
    pub fn send_line(&self, line: &str) -> bool {
        // ---
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.send(&bytes)
    }

    // ---

    /// Half-close: the client's next read returns zero bytes.
    pub fn hang_up(&self) {
        self.tx.send(Vec::new()).ok();
    }

    // ---

    /// Wait up to `timeout` for the next complete line the client wrote.
    ///
    /// Returns `None` on timeout or when the client closed the connection
    /// before finishing a line.
    pub fn recv_line(&mut self, timeout: Duration) -> Option<String> {
        // ---
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                return Some(text);
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.rx.recv_timeout(remaining) {
                Ok(chunk) if chunk.is_empty() => return None,
                Ok(chunk) => self.line_buf.extend_from_slice(&chunk),
                Err(_) => return None,
            }
        }
    }

    // ---

    /// Wait up to `timeout` for the client to shut its end down.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        // ---
        let deadline = Instant::now() + timeout;
        while !self.is_closed() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }
}
