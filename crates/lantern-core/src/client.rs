//! Per-connection frame router and socket table.
//!
//! A [`Client`] is the process-local object owning one transport and the set
//! of transaction sockets on it. Its read loop splits each incoming message
//! into `<id><payload>`, delivers the payload to the socket registered under
//! that id, and spins up a fresh transaction (engine worker + socket driver)
//! when the id is unknown.
//!
//! The router is the unique writer - and therefore the unique closer - of
//! every client-message and client-close channel it creates: removing a
//! socket-table entry drops the senders, which is what eventually lets the
//! corresponding driver exit. A deferred sweep at shutdown clears entries
//! whose drivers never requested deletion.

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use lantern_proto::{Frame, PublicKey, TxId, wire};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    env::Environment,
    hub::Hub,
    routine::{Routine, RoutineOutput},
    socket::SocketDriver,
    transaction::{OUTPUT_BUFFER, SocketToken, Transaction},
    transport::{MessageSink, MessageStream},
};

/// Capacity of each socket's client-message queue.
const CLIENT_MSG_BUFFER: usize = 10;

/// Errors from client-level operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The connection's read loop has exited; no new sockets may attach.
    #[error("client has disconnected")]
    Disconnected,

    /// The public key can only be set once per connection.
    #[error("public key already set")]
    KeyAlreadySet,
}

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of concurrent transactions this client may create.
    /// Sockets attached by other peers' routines do not count.
    pub max_transactions: usize,
    /// Grace period before the post-disconnect sweep closes any channels
    /// whose drivers have not requested deletion.
    pub sweep_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { max_transactions: 8, sweep_grace: Duration::from_secs(10) }
    }
}

#[derive(Clone)]
struct SocketEntry {
    msg_tx: mpsc::Sender<String>,
    close_tx: mpsc::Sender<()>,
}

struct ClientState {
    sockets: HashMap<TxId, SocketEntry>,
    /// Set when the read loop exits; prevents further socket creation.
    disconnected: bool,
}

/// Everything a caller needs after attaching a socket to this client.
pub(crate) struct AttachedSocket {
    pub(crate) token: SocketToken,
    pub(crate) msg_tx: mpsc::Sender<String>,
    pub(crate) msg_rx: mpsc::Receiver<String>,
    pub(crate) close_rx: mpsc::Receiver<()>,
}

/// One connected peer: a transport plus its transaction sockets.
pub struct Client {
    /// Write half of the transport. The lock serialises frame emission so
    /// concurrent socket drivers never interleave bytes. `None` for
    /// detached clients used in state-machine tests.
    write: tokio::sync::Mutex<Option<Box<dyn MessageSink>>>,
    /// Set at most once, by a successful `comeOnline`. Registration in the
    /// hub and this field are updated together.
    public_key: OnceLock<PublicKey>,
    state: Mutex<ClientState>,
    /// Transactions created by this client (not peer-attached ones).
    created: AtomicUsize,
    come_online_active: AtomicBool,
    config: ClientConfig,
}

impl Client {
    /// Create a client owning the write half of a transport.
    #[must_use]
    pub fn new(sink: Box<dyn MessageSink>, config: ClientConfig) -> Arc<Self> {
        Self::build(Some(sink), config)
    }

    /// Create a client with no transport; writes are discarded.
    ///
    /// Used by state-machine tests that only need key handling.
    #[must_use]
    pub fn detached(config: ClientConfig) -> Arc<Self> {
        Self::build(None, config)
    }

    fn build(sink: Option<Box<dyn MessageSink>>, config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            write: tokio::sync::Mutex::new(sink),
            public_key: OnceLock::new(),
            state: Mutex::new(ClientState { sockets: HashMap::new(), disconnected: false }),
            created: AtomicUsize::new(0),
            come_online_active: AtomicBool::new(false),
            config,
        })
    }

    /// The public key this connection authenticated as, if any.
    #[must_use]
    pub fn public_key(&self) -> Option<PublicKey> {
        self.public_key.get().cloned()
    }

    /// Bind this connection to a public key. Allowed once.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::KeyAlreadySet`] on a second call.
    pub fn set_public_key(&self, key: PublicKey) -> Result<(), ClientError> {
        self.public_key.set(key).map_err(|_| ClientError::KeyAlreadySet)
    }

    /// Claim the connection-wide `comeOnline` latch. Returns false if
    /// another `comeOnline` transaction is already running.
    pub(crate) fn begin_come_online(&self) -> bool {
        !self.come_online_active.swap(true, Ordering::SeqCst)
    }

    /// Release the `comeOnline` latch.
    pub(crate) fn end_come_online(&self) {
        self.come_online_active.store(false, Ordering::SeqCst);
    }

    /// Write one frame to the client: `<id><payload>`, serialised under the
    /// connection write lock.
    pub(crate) async fn write_frame(&self, id: TxId, payload: &str) -> io::Result<()> {
        let bytes = Frame::new(id, payload)
            .encode_to_vec()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut write = self.write.lock().await;
        match write.as_mut() {
            Some(sink) => sink.send_message(&bytes).await,
            None => Ok(()),
        }
    }

    /// Demultiplex incoming frames until the transport closes, then shut
    /// the connection's sockets down.
    ///
    /// `make_routine` is invoked once per newly created transaction.
    pub async fn route<F>(
        self: Arc<Self>,
        hub: &Arc<Hub>,
        env: &Arc<dyn Environment>,
        mut stream: Box<dyn MessageStream>,
        make_routine: F,
    ) where
        F: Fn() -> Box<dyn Routine> + Send,
    {
        loop {
            let bytes = match stream.next_message().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(error) => {
                    debug!(%error, "transport read failed");
                    break;
                },
            };

            let frame = match Frame::decode(&bytes) {
                Ok(frame) => frame,
                Err(error) => {
                    // Malformed frames are dropped; the connection survives.
                    warn!(%error, "client sent a malformed frame");
                    continue;
                },
            };

            Self::handle_frame(&self, hub, env, &make_routine, frame).await;
        }

        Self::shutdown(&self);
    }

    /// Route one decoded frame: deliver to an existing socket or create a
    /// new transaction for an unknown id.
    async fn handle_frame<F>(
        this: &Arc<Self>,
        hub: &Arc<Hub>,
        env: &Arc<dyn Environment>,
        make_routine: &F,
        frame: Frame,
    ) where
        F: Fn() -> Box<dyn Routine>,
    {
        let existing = {
            let state = this.state.lock().expect("client lock poisoned");
            state.sockets.get(&frame.id).cloned()
        };

        if let Some(entry) = existing {
            if entry.msg_tx.try_send(frame.payload).is_err() {
                if let Err(error) = this.write_frame(frame.id, wire::ROUTER_BUFFER_OCCUPIED).await
                {
                    debug!(%error, "failed to report full buffer");
                }
            }
            return;
        }

        if this.created.load(Ordering::SeqCst) >= this.config.max_transactions {
            if let Err(error) = this.write_frame(frame.id, wire::MAX_TRANSACTIONS_REACHED).await {
                debug!(%error, "failed to report transaction cap");
            }
            return;
        }
        this.created.fetch_add(1, Ordering::SeqCst);

        let (transaction, ri_rx, ri_tx) = Transaction::new();
        let (ro_tx, ro_rx) = mpsc::channel(OUTPUT_BUFFER);

        let socket = match this.attach_transaction_socket(frame.id, &transaction, ro_tx.clone()) {
            Ok(socket) => socket,
            Err(_) => {
                // Disconnected between the read and here; nothing was
                // spawned, so just undo the count.
                this.created.fetch_sub(1, Ordering::SeqCst);
                return;
            },
        };

        // Engine worker: exactly one per transaction.
        let engine = Arc::clone(&transaction).run(
            Arc::clone(hub),
            Arc::clone(env),
            make_routine(),
            ri_rx,
        );
        let counter = Arc::clone(this);
        tokio::spawn(async move {
            engine.await;
            counter.created.fetch_sub(1, Ordering::SeqCst);
        });

        // Socket driver: exactly one per (peer, transaction).
        let driver = SocketDriver::new(
            frame.id,
            socket.token,
            Arc::clone(this),
            Arc::clone(&transaction),
            ri_tx,
            ro_tx,
        );
        tokio::spawn(driver.run(ro_rx, socket.msg_rx, socket.close_rx));

        // First input: the payload that created the transaction.
        if socket.msg_tx.send(frame.payload).await.is_err() {
            debug!(id = ?frame.id, "socket driver exited before first input");
        }
    }

    /// Register a socket under `id` and attach it to `transaction`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] once the read loop has exited.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered - ids are unique per connection
    /// and a collision is an internal invariant violation.
    pub(crate) fn attach_transaction_socket(
        &self,
        id: TxId,
        transaction: &Arc<Transaction>,
        ro_tx: mpsc::Sender<RoutineOutput>,
    ) -> Result<AttachedSocket, ClientError> {
        let (msg_tx, msg_rx) = mpsc::channel(CLIENT_MSG_BUFFER);
        let (close_tx, close_rx) = mpsc::channel(1);

        let mut state = self.state.lock().expect("client lock poisoned");
        if state.disconnected {
            return Err(ClientError::Disconnected);
        }
        assert!(
            !state.sockets.contains_key(&id),
            "attempted to register a transaction socket id that already exists"
        );

        let token = transaction.attach(self.public_key(), ro_tx);
        state.sockets.insert(id, SocketEntry { msg_tx: msg_tx.clone(), close_tx });

        Ok(AttachedSocket { token, msg_tx, msg_rx, close_rx })
    }

    /// Remove the socket registered under `id` and detach it from its
    /// transaction. Safe to race: only the caller that actually removes the
    /// entry performs the detach.
    pub(crate) fn delete_transaction_socket(
        &self,
        id: TxId,
        transaction: &Arc<Transaction>,
        token: SocketToken,
    ) {
        let removed = {
            let mut state = self.state.lock().expect("client lock poisoned");
            state.sockets.remove(&id).is_some()
        };
        if removed {
            transaction.detach(self.public_key().as_ref(), token);
        }
    }

    /// Mark the client disconnected, signal every surviving socket, and
    /// schedule the dangling-channel sweep.
    fn shutdown(this: &Arc<Self>) {
        let entries: Vec<SocketEntry> = {
            let mut state = this.state.lock().expect("client lock poisoned");
            state.disconnected = true;
            state.sockets.values().cloned().collect()
        };

        for entry in entries {
            // Capacity-1 channel with the router as its only writer; the
            // single close signal always fits.
            if entry.close_tx.try_send(()).is_err() {
                debug!("socket driver already gone at shutdown");
            }
        }

        // Give drivers time to drain final outputs, then close whatever is
        // left by dropping the router-owned senders.
        let sweeper = Arc::clone(this);
        tokio::spawn(async move {
            tokio::time::sleep(sweeper.config.sweep_grace).await;
            sweeper.state.lock().expect("client lock poisoned").sockets.clear();
        });
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("client lock poisoned");
        f.debug_struct("Client")
            .field("public_key", &self.public_key.get())
            .field("sockets", &state.sockets.len())
            .field("disconnected", &state.disconnected)
            .finish()
    }
}
