//! [`ConversationGate`] — per-peer pending queue in front of the engine.
//!
//! A message for a peer whose conversation is not yet OPEN is queued, and
//! the first such message asks the engine to open the conversation. When
//! the open completes the queue is replayed in submission order; when the
//! conversation closes instead, the queue is discarded.
//!
//! # Ordering
//!
//! Per peer, messages reach the engine in the order they were submitted. A
//! send that finds an OPEN conversation but a non-empty (or draining) queue
//! is appended rather than forwarded, so it never overtakes queued entries.
//! Nothing is ordered across peers.
//!
//! # Locking
//!
//! One coarse lock covers the whole queue map. `send` holds it while reading
//! the conversation state (gate before engine), never while forwarding or
//! opening. The drain takes it once per entry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

// ---

use mwhost_domain::{
    // ---
    ConversationState,
    Conversations,
    HostError,
    ImMessage,
    PeerId,
    ReasonCode,
    Result,
};

// ---------------------------------------------------------------------------
// Delivery / ReplayFailure
// ---------------------------------------------------------------------------

/// What [`ConversationGate::send`] did with a message.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    // ---
    /// Forwarded to the engine on an OPEN conversation.
    Sent,

    /// Held until the conversation opens. Not an error.
    Queued,
}

// ---

/// A queued message the engine refused during replay.
#[derive(Debug)]
pub struct ReplayFailure {
    // ---
    pub peer: PeerId,
    pub message: ImMessage,
    pub error: HostError,
}

// ---------------------------------------------------------------------------
// PeerQueue
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PeerQueue {
    // ---
    entries: VecDeque<ImMessage>,

    /// Set while `on_opened` is replaying this queue.
    draining: bool,
}

impl PeerQueue {
    fn holding(message: ImMessage) -> Self {
        Self {
            entries: VecDeque::from([message]),
            draining: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationGate
// ---------------------------------------------------------------------------

pub struct ConversationGate<C> {
    // ---
    conversations: C,
    queues: Mutex<HashMap<PeerId, PeerQueue>>,
}

// ---

impl<C: Conversations> ConversationGate<C> {
    // ---
    pub fn new(conversations: C) -> Self {
        Self {
            conversations,
            queues: Mutex::new(HashMap::new()),
        }
    }

    // ---

    pub fn conversations(&self) -> &C {
        &self.conversations
    }

    // ---

    /// Forward `message` if the conversation with `peer` is OPEN and nothing
    /// is queued ahead of it; queue it otherwise.
    ///
    /// A CLOSED conversation is asked to open exactly once, by the send that
    /// creates the queue. If that request fails synchronously the new queue
    /// is discarded and the error returned.
    pub fn send(&self, peer: &PeerId, message: ImMessage) -> Result<Delivery> {
        // ---
        // State is read under the gate lock: an `on_opened` for this peer
        // either finds the entry queued below or has already removed the
        // queue and left the conversation OPEN.
        let mut queues = self.lock();
        let state = self.conversations.conversation_state(peer);

        if let Some(queue) = queues.get_mut(peer) {
            queue.entries.push_back(message);
            tracing::debug!(%peer, ?state, depth = queue.entries.len(), "queued behind pending entries");
            return Ok(Delivery::Queued);
        }

        match state {
            ConversationState::Open => {
                // ---
                drop(queues);
                self.conversations.send_now(peer, &message)?;
                Ok(Delivery::Sent)
            }

            ConversationState::Pending => {
                // ---
                queues.insert(peer.clone(), PeerQueue::holding(message));
                tracing::debug!(%peer, "queued while conversation opens");
                Ok(Delivery::Queued)
            }

            ConversationState::Closed | ConversationState::Unknown => {
                // ---
                queues.insert(peer.clone(), PeerQueue::holding(message));
                drop(queues);

                tracing::debug!(%peer, "opening conversation");
                if let Err(e) = self.conversations.open_conversation(peer) {
                    let dropped = self.discard(peer);
                    tracing::warn!(%peer, dropped, "open conversation failed: {e}");
                    return Err(e);
                }
                Ok(Delivery::Queued)
            }
        }
    }

    // ---

    /// Replay the queue for `peer` in order. Every entry is attempted; the
    /// ones the engine refuses are returned.
    pub fn on_opened(&self, peer: &PeerId) -> Vec<ReplayFailure> {
        // ---
        {
            let mut queues = self.lock();
            match queues.get_mut(peer) {
                Some(queue) if !queue.draining => queue.draining = true,
                _ => return Vec::new(),
            }
        }

        let mut failures = Vec::new();
        let mut replayed = 0usize;

        loop {
            // ---
            let next = {
                let mut queues = self.lock();
                let Some(queue) = queues.get_mut(peer) else {
                    // Closed mid-drain.
                    break;
                };
                match queue.entries.pop_front() {
                    Some(message) => message,
                    None => {
                        queues.remove(peer);
                        break;
                    }
                }
            };

            replayed += 1;
            if let Err(error) = self.conversations.send_now(peer, &next) {
                tracing::warn!(%peer, kind = ?next.kind(), "replay failed: {error}");
                failures.push(ReplayFailure {
                    peer: peer.clone(),
                    message: next,
                    error,
                });
            }
        }

        tracing::debug!(%peer, replayed, failed = failures.len(), "pending queue drained");
        failures
    }

    // ---

    /// Drop everything queued for `peer`. Returns how many entries went.
    pub fn on_closed(&self, peer: &PeerId, reason: ReasonCode) -> usize {
        // ---
        let dropped = self.discard(peer);
        if dropped > 0 {
            tracing::debug!(%peer, %reason, dropped, "pending queue discarded");
        }
        dropped
    }

    // ---

    pub fn pending_len(&self, peer: &PeerId) -> usize {
        self.lock().get(peer).map_or(0, |q| q.entries.len())
    }

    // ---

    /// Peers with a queue, sorted.
    pub fn pending_peers(&self) -> Vec<PeerId> {
        // ---
        let mut peers: Vec<PeerId> = self.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    // ---

    fn discard(&self, peer: &PeerId) -> usize {
        self.lock().remove(peer).map_or(0, |q| q.entries.len())
    }

    // ---

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, PeerQueue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::collections::HashMap;
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    /// Engine double: states set by the test, every call recorded.
    #[derive(Default)]
    struct FakeConversations {
        states: Mutex<HashMap<PeerId, ConversationState>>,
        opens: Mutex<Vec<PeerId>>,
        sent: Mutex<Vec<(PeerId, ImMessage)>>,
        reject: Mutex<Vec<ImMessage>>,
        fail_open: Mutex<bool>,

        /// Signalled once, right after a state read; the read then stalls.
        stall_after_read: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl FakeConversations {
        fn set(&self, peer: &PeerId, state: ConversationState) {
            self.states.lock().unwrap().insert(peer.clone(), state);
        }

        fn sent(&self) -> Vec<(PeerId, ImMessage)> {
            self.sent.lock().unwrap().clone()
        }

        fn opens(&self) -> Vec<PeerId> {
            self.opens.lock().unwrap().clone()
        }
    }

    impl Conversations for FakeConversations {
        fn conversation_state(&self, peer: &PeerId) -> ConversationState {
            let state = self
                .states
                .lock()
                .unwrap()
                .get(peer)
                .copied()
                .unwrap_or(ConversationState::Closed);

            if let Some(tx) = self.stall_after_read.lock().unwrap().take() {
                tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
            }
            state
        }

        fn open_conversation(&self, peer: &PeerId) -> Result<()> {
            self.opens.lock().unwrap().push(peer.clone());
            if *self.fail_open.lock().unwrap() {
                return Err(HostError::NotConnected);
            }
            self.set(peer, ConversationState::Pending);
            Ok(())
        }

        fn send_now(&self, peer: &PeerId, message: &ImMessage) -> Result<()> {
            if self.reject.lock().unwrap().contains(message) {
                return Err(HostError::Engine("rejected".into()));
            }
            self.sent.lock().unwrap().push((peer.clone(), message.clone()));
            Ok(())
        }
    }

    fn text(s: &str) -> ImMessage {
        ImMessage::Text(s.into())
    }

    fn sent_texts(gate: &ConversationGate<FakeConversations>) -> Vec<String> {
        gate.conversations()
            .sent()
            .into_iter()
            .map(|(_, m)| match m {
                ImMessage::Text(t) => t,
                other => panic!("unexpected message {other:?}"),
            })
            .collect()
    }

    // ---

    #[test]
    fn open_conversation_forwards_immediately() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");
        gate.conversations().set(&bob, ConversationState::Open);

        assert_eq!(gate.send(&bob, text("hi")).unwrap(), Delivery::Sent);
        assert_eq!(gate.conversations().sent(), vec![(bob.clone(), text("hi"))]);
        assert!(gate.conversations().opens().is_empty());
        assert_eq!(gate.pending_len(&bob), 0);
    }

    #[test]
    fn closed_conversation_opens_once_and_replays_in_order() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");

        assert_eq!(gate.send(&bob, text("one")).unwrap(), Delivery::Queued);
        assert_eq!(gate.send(&bob, ImMessage::Typing(true)).unwrap(), Delivery::Queued);
        assert_eq!(gate.send(&bob, text("three")).unwrap(), Delivery::Queued);
        assert_eq!(gate.conversations().opens(), vec![bob.clone()]);
        assert!(gate.conversations().sent().is_empty());

        gate.conversations().set(&bob, ConversationState::Open);
        assert!(gate.on_opened(&bob).is_empty());

        let sent: Vec<ImMessage> = gate.conversations().sent().into_iter().map(|(_, m)| m).collect();
        assert_eq!(sent, vec![text("one"), ImMessage::Typing(true), text("three")]);
        assert!(gate.pending_peers().is_empty());

        // A second open notification replays nothing.
        assert!(gate.on_opened(&bob).is_empty());
        assert_eq!(gate.conversations().sent().len(), 3);
    }

    #[test]
    fn closed_conversation_reopens_only_without_queue() {
        // ---
        let fake = FakeConversations::default();
        let gate = ConversationGate::new(fake);
        let bob = PeerId::new("bob");

        gate.send(&bob, text("one")).unwrap();
        // Engine reports CLOSED again (e.g. open still in flight elsewhere):
        // the existing queue suppresses a second request.
        gate.conversations().set(&bob, ConversationState::Closed);
        gate.send(&bob, text("two")).unwrap();
        assert_eq!(gate.conversations().opens().len(), 1);
        assert_eq!(gate.pending_len(&bob), 2);
    }

    #[test]
    fn replay_failure_does_not_abort_drain() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");
        gate.conversations().reject.lock().unwrap().push(text("bad"));

        for m in ["a", "bad", "c", "d"] {
            gate.send(&bob, text(m)).unwrap();
        }
        gate.conversations().set(&bob, ConversationState::Open);
        let failures = gate.on_opened(&bob);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, text("bad"));
        assert!(matches!(failures[0].error, HostError::Engine(_)));

        let sent: Vec<ImMessage> = gate.conversations().sent().into_iter().map(|(_, m)| m).collect();
        assert_eq!(sent, vec![text("a"), text("c"), text("d")]);
    }

    #[test]
    fn close_discards_queue() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");

        gate.send(&bob, text("one")).unwrap();
        gate.send(&bob, text("two")).unwrap();
        assert_eq!(gate.on_closed(&bob, ReasonCode::CLIENT_USER_GONE), 2);

        gate.conversations().set(&bob, ConversationState::Open);
        assert!(gate.on_opened(&bob).is_empty());
        assert!(gate.conversations().sent().is_empty());
    }

    #[test]
    fn open_with_pending_entries_does_not_overtake() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");

        gate.send(&bob, text("first")).unwrap();
        // Engine already OPEN, gate not yet told.
        gate.conversations().set(&bob, ConversationState::Open);
        assert_eq!(gate.send(&bob, text("second")).unwrap(), Delivery::Queued);

        gate.on_opened(&bob);
        let sent: Vec<ImMessage> = gate.conversations().sent().into_iter().map(|(_, m)| m).collect();
        assert_eq!(sent, vec![text("first"), text("second")]);
    }

    #[test]
    fn failed_open_discards_new_queue() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");
        *gate.conversations().fail_open.lock().unwrap() = true;

        assert!(gate.send(&bob, text("lost")).is_err());
        assert_eq!(gate.pending_len(&bob), 0);

        // Next send tries again.
        *gate.conversations().fail_open.lock().unwrap() = false;
        assert_eq!(gate.send(&bob, text("kept")).unwrap(), Delivery::Queued);
        assert_eq!(gate.conversations().opens().len(), 2);
    }

    #[test]
    fn peers_are_independent() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");
        let carol = PeerId::in_community("carol", "acme");

        gate.send(&bob, text("b")).unwrap();
        gate.send(&carol, text("c")).unwrap();
        assert_eq!(gate.pending_peers(), vec![bob.clone(), carol.clone()]);

        gate.on_closed(&bob, ReasonCode::FAILURE);
        assert_eq!(gate.pending_peers(), vec![carol]);
    }

    #[test]
    fn open_arriving_mid_send_still_drains() {
        // ---
        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");
        gate.conversations().set(&bob, ConversationState::Pending);

        let (read_tx, read_rx) = mpsc::channel();
        *gate.conversations().stall_after_read.lock().unwrap() = Some(read_tx);

        let (delivery, failures) = thread::scope(|s| {
            // ---
            let sender = s.spawn(|| gate.send(&bob, text("late")));

            // The send has read PENDING; the pump thread now reports OPEN.
            read_rx.recv_timeout(WAIT).unwrap();
            gate.conversations().set(&bob, ConversationState::Open);
            let opener = s.spawn(|| gate.on_opened(&bob));

            (sender.join().unwrap().unwrap(), opener.join().unwrap())
        });

        assert_eq!(delivery, Delivery::Queued);
        assert!(failures.is_empty());
        assert!(gate.pending_peers().is_empty());

        assert_eq!(gate.send(&bob, text("after")).unwrap(), Delivery::Sent);
        assert_eq!(sent_texts(&gate), vec!["late", "after"]);
    }

    #[test]
    fn concurrent_senders_keep_order_across_drain() {
        // ---
        const SENDERS: usize = 4;
        const PER_SENDER: usize = 50;

        let gate = ConversationGate::new(FakeConversations::default());
        let bob = PeerId::new("bob");
        assert_eq!(gate.send(&bob, text("first")).unwrap(), Delivery::Queued);

        let failures = thread::scope(|s| {
            // ---
            for t in 0..SENDERS {
                let (gate, bob) = (&gate, &bob);
                s.spawn(move || {
                    for i in 0..PER_SENDER {
                        gate.send(bob, text(&format!("{t}:{i}"))).unwrap();
                        if i % 10 == 0 {
                            thread::yield_now();
                        }
                    }
                });
            }

            thread::sleep(Duration::from_millis(2));
            gate.conversations().set(&bob, ConversationState::Open);
            gate.on_opened(&bob)
        });

        assert!(failures.is_empty());
        assert!(gate.pending_peers().is_empty());

        let sent = sent_texts(&gate);
        assert_eq!(sent.len(), 1 + SENDERS * PER_SENDER);
        assert_eq!(sent[0], "first");

        for t in 0..SENDERS {
            let prefix = format!("{t}:");
            let seq: Vec<usize> = sent
                .iter()
                .filter_map(|m| m.strip_prefix(&prefix))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(seq, (0..PER_SENDER).collect::<Vec<_>>(), "sender {t} out of order");
        }
    }
}
