//! Transaction engine: one logical conversation between peers.
//!
//! A transaction owns a routine instance, the per-peer routine-output
//! channels, and the single input queue every attached socket feeds. One
//! worker consumes that queue, steps the routine serially, and fans each
//! output out to the addressed peer's socket driver - attaching the peer
//! first if it has no socket on this transaction yet.
//!
//! # Channel closure
//!
//! This module is the only place routine-output senders are dropped. A
//! channel is closed when an output carrying `done` has been delivered to it
//! or when its owner delivered a client-close input; the engine keeps a
//! closed-set of socket tokens so that late inputs from terminated sockets
//! are discarded instead of reaching the routine, and so that an output is
//! never sent on a closed channel.
//!
//! The engine itself introduces no concurrency: every `Routine::next` call
//! happens on the engine worker, and the worker exits when the input queue
//! closes - which happens when the socket count reaches zero.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use lantern_proto::PublicKey;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    env::Environment,
    hub::Hub,
    routine::{InputKind, Routine, RoutineInput, RoutineOutput},
    socket::SocketDriver,
};

/// Capacity of the routine input queue.
pub(crate) const INPUT_BUFFER: usize = 10;

/// Capacity of each per-peer routine-output channel.
///
/// One slot approximates the synchronous rendez-vous the design calls for:
/// the engine's send completes only when the receiving driver is keeping up.
pub(crate) const OUTPUT_BUFFER: usize = 1;

/// Identifies one socket within one transaction, for the closed-set.
pub(crate) type SocketToken = u64;

/// One input event queued for the engine, together with the handle needed
/// to answer "the sender of this input".
pub(crate) struct InputEnvelope {
    pub(crate) input: RoutineInput,
    pub(crate) token: SocketToken,
    pub(crate) ro_tx: mpsc::Sender<RoutineOutput>,
}

struct PeerSlot {
    token: SocketToken,
    ro_tx: mpsc::Sender<RoutineOutput>,
}

struct TxShared {
    /// Peer key -> that peer's output channel into this transaction
    peers: HashMap<PublicKey, PeerSlot>,
    /// Number of attached sockets; the transaction terminates at zero
    socket_count: usize,
    /// Input-queue sender handed to newly attached sockets. Dropped when
    /// the socket count reaches zero, which closes the queue and stops the
    /// engine worker.
    ri_tx: Option<mpsc::Sender<InputEnvelope>>,
    next_token: SocketToken,
}

/// One in-flight instance of a routine.
pub(crate) struct Transaction {
    shared: Mutex<TxShared>,
}

impl Transaction {
    /// Create a transaction. Returns the input-queue receiver for the engine
    /// worker and the first input-queue sender for the initiating socket.
    pub(crate) fn new(
    ) -> (Arc<Self>, mpsc::Receiver<InputEnvelope>, mpsc::Sender<InputEnvelope>) {
        let (ri_tx, ri_rx) = mpsc::channel(INPUT_BUFFER);
        let transaction = Arc::new(Self {
            shared: Mutex::new(TxShared {
                peers: HashMap::new(),
                socket_count: 0,
                ri_tx: Some(ri_tx.clone()),
                next_token: 0,
            }),
        });
        (transaction, ri_rx, ri_tx)
    }

    /// A clone of the input-queue sender, or `None` once the transaction has
    /// begun shutting down (socket count reached zero).
    pub(crate) fn ri_sender(&self) -> Option<mpsc::Sender<InputEnvelope>> {
        self.shared.lock().expect("transaction lock poisoned").ri_tx.clone()
    }

    /// Attach a socket: record its output channel under `pk` (when the peer
    /// has a key) and bump the socket count. Returns the socket's token.
    pub(crate) fn attach(
        &self,
        pk: Option<PublicKey>,
        ro_tx: mpsc::Sender<RoutineOutput>,
    ) -> SocketToken {
        let mut shared = self.shared.lock().expect("transaction lock poisoned");
        let token = shared.next_token;
        shared.next_token += 1;
        if let Some(pk) = pk {
            debug_assert!(
                !shared.peers.contains_key(&pk),
                "peer attached twice to one transaction"
            );
            shared.peers.insert(pk, PeerSlot { token, ro_tx });
        }
        shared.socket_count += 1;
        token
    }

    /// Detach a socket. When the count reaches zero the input queue sender
    /// is dropped, which lets the engine worker exit.
    pub(crate) fn detach(&self, pk: Option<&PublicKey>, token: SocketToken) {
        let mut shared = self.shared.lock().expect("transaction lock poisoned");
        if let Some(pk) = pk {
            if shared.peers.get(pk).is_some_and(|slot| slot.token == token) {
                shared.peers.remove(pk);
            }
        }
        shared.socket_count -= 1;
        if shared.socket_count == 0 {
            shared.ri_tx = None;
        }
    }

    fn peer_slot(&self, pk: &PublicKey) -> Option<(SocketToken, mpsc::Sender<RoutineOutput>)> {
        let shared = self.shared.lock().expect("transaction lock poisoned");
        shared.peers.get(pk).map(|slot| (slot.token, slot.ro_tx.clone()))
    }

    /// Drop the stored output sender for `pk` if it still belongs to
    /// `token`. Called when the engine closes that socket's channel.
    fn drop_peer_sender(&self, pk: Option<&PublicKey>, token: SocketToken) {
        let Some(pk) = pk else { return };
        let mut shared = self.shared.lock().expect("transaction lock poisoned");
        if shared.peers.get(pk).is_some_and(|slot| slot.token == token) {
            shared.peers.remove(pk);
        }
    }

    /// Engine worker: step the routine for every queued input and fan the
    /// outputs out. Runs until the input queue closes.
    pub(crate) async fn run(
        self: Arc<Self>,
        hub: Arc<Hub>,
        env: Arc<dyn Environment>,
        mut routine: Box<dyn Routine>,
        mut ri_rx: mpsc::Receiver<InputEnvelope>,
    ) {
        // Sockets whose output channel this engine has closed. Inputs from
        // them are stale; outputs to them would be a send-after-done bug.
        let mut closed: HashSet<SocketToken> = HashSet::new();

        while let Some(envelope) = ri_rx.recv().await {
            let InputEnvelope { input, token, ro_tx } = envelope;
            if closed.contains(&token) {
                continue;
            }

            let sender_pk = input.sender.clone();
            let is_close = input.kind == InputKind::ClientClose;

            let outputs = routine.next(input);
            Self::distribute(&self, &hub, &env, &mut closed, token, &ro_tx, sender_pk.as_ref(), outputs)
                .await;

            if is_close && !closed.contains(&token) {
                closed.insert(token);
                self.drop_peer_sender(sender_pk.as_ref(), token);
            }
        }
    }

    /// Deliver one step's outputs, in order, to the addressed sockets.
    #[allow(clippy::too_many_arguments)]
    async fn distribute(
        this: &Arc<Self>,
        hub: &Arc<Hub>,
        env: &Arc<dyn Environment>,
        closed: &mut HashSet<SocketToken>,
        sender_token: SocketToken,
        sender_ro: &mpsc::Sender<RoutineOutput>,
        sender_pk: Option<&PublicKey>,
        outputs: Vec<RoutineOutput>,
    ) {
        // At most one output per addressee within a single step.
        let mut addressed: HashSet<SocketToken> = HashSet::new();

        for output in outputs {
            let done = output.done;
            match output.to.clone() {
                None => {
                    assert!(
                        !closed.contains(&sender_token),
                        "routine emitted an output to its terminated sender"
                    );
                    assert!(
                        addressed.insert(sender_token),
                        "routine emitted two outputs for one peer in a single step"
                    );
                    if sender_ro.send(output).await.is_err() {
                        debug!("socket driver exited before output delivery");
                    }
                    if done {
                        closed.insert(sender_token);
                        this.drop_peer_sender(sender_pk, sender_token);
                    }
                },
                Some(pk) => {
                    if let Some((token, ro_tx)) = this.peer_slot(&pk) {
                        assert!(
                            !closed.contains(&token),
                            "routine emitted an output to a terminated peer"
                        );
                        assert!(
                            addressed.insert(token),
                            "routine emitted two outputs for one peer in a single step"
                        );
                        if ro_tx.send(output).await.is_err() {
                            debug!(peer = %pk, "socket driver exited before output delivery");
                        }
                        if done {
                            closed.insert(token);
                            this.drop_peer_sender(Some(&pk), token);
                        }
                    } else if let Some((token, ro_tx)) = Self::attach_peer(this, hub, env, &pk).await {
                        assert!(
                            addressed.insert(token),
                            "routine emitted two outputs for one peer in a single step"
                        );
                        if ro_tx.send(output).await.is_err() {
                            debug!(peer = %pk, "socket driver exited before output delivery");
                        }
                        if done {
                            closed.insert(token);
                            this.drop_peer_sender(Some(&pk), token);
                        }
                    }
                },
            }
        }
    }

    /// Attach a peer that did not initiate this transaction: mint a socket
    /// id on its connection and spawn a driver for it.
    ///
    /// Returns `None` when the peer is offline or disconnected mid-attach;
    /// the routine should have checked the directory, so the output is
    /// abandoned with a warning rather than an error frame.
    async fn attach_peer(
        this: &Arc<Self>,
        hub: &Arc<Hub>,
        env: &Arc<dyn Environment>,
        pk: &PublicKey,
    ) -> Option<(SocketToken, mpsc::Sender<RoutineOutput>)> {
        let Some(peer) = hub.lookup(pk) else {
            warn!(peer = %pk, "routine addressed a peer that is not online");
            return None;
        };

        // Keep the input queue open for the new socket even if every other
        // socket detaches while we are setting it up.
        let ri_tx = this.ri_sender()?;

        let (ro_tx, ro_rx) = mpsc::channel(OUTPUT_BUFFER);
        let id = env.random_tx_id();

        let socket = match peer.attach_transaction_socket(id, this, ro_tx.clone()) {
            Ok(socket) => socket,
            Err(error) => {
                warn!(peer = %pk, %error, "peer disconnected during attach");
                return None;
            },
        };

        let token = socket.token;
        let driver =
            SocketDriver::new(id, token, Arc::clone(&peer), Arc::clone(this), ri_tx, ro_tx.clone());
        tokio::spawn(driver.run(ro_rx, socket.msg_rx, socket.close_rx));

        Some((token, ro_tx))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock().expect("transaction lock poisoned");
        f.debug_struct("Transaction")
            .field("socket_count", &shared.socket_count)
            .field("peers", &shared.peers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(token: &str) -> PublicKey {
        PublicKey::parse(token).unwrap()
    }

    #[tokio::test]
    async fn input_queue_closes_when_last_socket_detaches() {
        let (transaction, mut ri_rx, ri_tx) = Transaction::new();

        let (ro_tx_a, _ro_rx_a) = mpsc::channel(OUTPUT_BUFFER);
        let (ro_tx_b, _ro_rx_b) = mpsc::channel(OUTPUT_BUFFER);
        let a = transaction.attach(Some(key("KA")), ro_tx_a);
        let b = transaction.attach(Some(key("KB")), ro_tx_b);
        assert_ne!(a, b);

        transaction.detach(Some(&key("KA")), a);
        assert!(transaction.ri_sender().is_some());

        transaction.detach(Some(&key("KB")), b);
        assert!(transaction.ri_sender().is_none());

        // Only the initiating sender keeps the queue open now.
        drop(ri_tx);
        assert!(ri_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn detach_ignores_stale_token() {
        let (transaction, _ri_rx, _ri_tx) = Transaction::new();

        let (ro_tx_a, _keep_a) = mpsc::channel(OUTPUT_BUFFER);
        let a = transaction.attach(Some(key("KA")), ro_tx_a);

        // A detach with a key that maps to a different token must not drop
        // the live slot.
        transaction.detach(Some(&key("KA")), a + 100);
        let (token, _) = transaction.peer_slot(&key("KA")).expect("slot should survive");
        assert_eq!(token, a);
    }
}
