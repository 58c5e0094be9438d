//! Transaction socket driver: one peer's attachment to one transaction.
//!
//! The driver multiplexes four event sources over one cooperative select:
//! routine outputs from the engine, the client-close signal, the armed
//! timeout (at most one), and client messages from the connection router.
//! The select is biased in that order so that a Done output racing a timeout
//! deterministically wins.
//!
//! The driver terminates only after all three of its inbound channels have
//! been closed by their producers: the routine-output channel by the engine,
//! the client-message and client-close channels by the connection router
//! (removal of the socket-table entry drops their senders).
//!
//! # Forced enqueue
//!
//! Close and timeout inputs must reach the engine - dropping them could
//! leave the transaction alive forever - but a plain blocking send can
//! deadlock against the engine synchronously sending an output back to this
//! very socket. [`SocketDriver::force_enqueue`] therefore tries a
//! non-blocking send first and, on failure, alternates between acquiring a
//! queue slot and draining one routine output until the input goes through
//! (or the socket turns out to be done).

use std::sync::Arc;

use lantern_proto::{TxId, wire};
use tokio::{sync::mpsc, time::Instant};
use tracing::warn;

use crate::{
    client::Client,
    routine::{RoutineInput, RoutineOutput},
    transaction::{InputEnvelope, SocketToken, Transaction},
};

/// Drives one (peer, transaction) socket.
pub(crate) struct SocketDriver {
    id: TxId,
    token: SocketToken,
    client: Arc<Client>,
    transaction: Arc<Transaction>,
    /// Sender into the engine's input queue. Holding it keeps the queue
    /// open until this driver exits.
    ri_tx: mpsc::Sender<InputEnvelope>,
    /// Our own handle to the routine-output channel, cloned into every
    /// input envelope so the engine can answer "the sender". Dropped as
    /// soon as the socket is done so the channel can fully close.
    ro_tx: Option<mpsc::Sender<RoutineOutput>>,
    done: bool,
    deadline: Option<Instant>,
}

impl SocketDriver {
    pub(crate) fn new(
        id: TxId,
        token: SocketToken,
        client: Arc<Client>,
        transaction: Arc<Transaction>,
        ri_tx: mpsc::Sender<InputEnvelope>,
        ro_tx: mpsc::Sender<RoutineOutput>,
    ) -> Self {
        Self { id, token, client, transaction, ri_tx, ro_tx: Some(ro_tx), done: false, deadline: None }
    }

    pub(crate) async fn run(
        mut self,
        ro_rx: mpsc::Receiver<RoutineOutput>,
        msg_rx: mpsc::Receiver<String>,
        close_rx: mpsc::Receiver<()>,
    ) {
        let mut ro_rx = Some(ro_rx);
        let mut msg_rx = Some(msg_rx);
        let mut close_rx = Some(close_rx);

        loop {
            if ro_rx.is_none() && msg_rx.is_none() && close_rx.is_none() {
                return;
            }

            tokio::select! {
                biased;

                ro = recv_opt(&mut ro_rx) => match ro {
                    Some(ro) => self.handle_output(ro).await,
                    None => ro_rx = None,
                },

                close = recv_opt(&mut close_rx) => match close {
                    Some(()) => self.handle_client_close(&mut ro_rx).await,
                    None => close_rx = None,
                },

                () = sleep_opt(self.deadline), if self.deadline.is_some() && !self.done => {
                    self.deadline = None;
                    self.handle_timeout(&mut ro_rx).await;
                },

                msg = recv_opt(&mut msg_rx) => match msg {
                    Some(msg) => self.handle_client_msg(msg).await,
                    None => msg_rx = None,
                },
            }
        }
    }

    /// Emit a routine output to the client and update socket status.
    async fn handle_output(&mut self, ro: RoutineOutput) {
        for msg in &ro.msgs {
            if let Err(error) = self.client.write_frame(self.id, msg).await {
                warn!(id = ?self.id, %error, "failed to write routine output");
            }
        }

        // Every output replaces the armed deadline, including with "none".
        self.deadline = ro.timeout.map(|timeout| Instant::now() + timeout);
        self.done = ro.done;

        if ro.done {
            self.deadline = None;
            self.ro_tx = None;
            self.client.delete_transaction_socket(self.id, &self.transaction, self.token);
        }
    }

    async fn handle_client_close(&mut self, ro_rx: &mut Option<mpsc::Receiver<RoutineOutput>>) {
        if self.done {
            return;
        }

        let input = RoutineInput::client_close(self.client.public_key());
        self.force_enqueue(ro_rx, input).await;

        self.done = true;
        self.ro_tx = None;
        self.client.delete_transaction_socket(self.id, &self.transaction, self.token);
    }

    async fn handle_timeout(&mut self, ro_rx: &mut Option<mpsc::Receiver<RoutineOutput>>) {
        if self.done {
            return;
        }

        // Not terminal by itself: the routine's response decides closure.
        let input = RoutineInput::timeout(self.client.public_key());
        self.force_enqueue(ro_rx, input).await;
    }

    async fn handle_client_msg(&mut self, msg: String) {
        if self.done {
            // The routine has ended but the router has not yet dropped our
            // message channel; tell the client instead of silently eating
            // the frame.
            self.reply(wire::TRANSACTION_TERMINATED).await;
            return;
        }

        let Some(ro_tx) = self.ro_tx.clone() else {
            self.reply(wire::TRANSACTION_TERMINATED).await;
            return;
        };

        let envelope = InputEnvelope {
            input: RoutineInput::user_msg(self.client.public_key(), msg),
            token: self.token,
            ro_tx,
        };

        // User messages may be dropped under pressure; the client hears
        // about it in-band and can retry.
        match self.ri_tx.try_send(envelope) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => self.reply(wire::BUFFER_OCCUPIED).await,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.reply(wire::TRANSACTION_TERMINATED).await;
            },
        }
    }

    /// Deliver a close/timeout input to the engine without deadlocking.
    async fn force_enqueue(
        &mut self,
        ro_rx: &mut Option<mpsc::Receiver<RoutineOutput>>,
        input: RoutineInput,
    ) {
        let Some(ro_tx) = self.ro_tx.clone() else { return };
        let envelope = InputEnvelope { input, token: self.token, ro_tx };

        let mut pending = match self.ri_tx.try_send(envelope) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Closed(_)) => return,
            Err(mpsc::error::TrySendError::Full(envelope)) => Some(envelope),
        };

        loop {
            if self.done {
                // The engine terminated this socket while we were waiting;
                // the input is no longer needed.
                return;
            }

            let ri_tx = self.ri_tx.clone();
            tokio::select! {
                biased;

                permit = ri_tx.reserve() => {
                    if let (Ok(permit), Some(envelope)) = (permit, pending.take()) {
                        permit.send(envelope);
                    }
                    return;
                },

                ro = recv_opt(ro_rx) => match ro {
                    Some(ro) => self.handle_output(ro).await,
                    None => *ro_rx = None,
                },
            }
        }
    }

    async fn reply(&self, msg: &str) {
        if let Err(error) = self.client.write_frame(self.id, msg).await {
            warn!(id = ?self.id, %error, "failed to write socket reply");
        }
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;

    fn driver_for_test(
        ri_capacity_filled: bool,
    ) -> (SocketDriver, mpsc::Receiver<InputEnvelope>, mpsc::Receiver<RoutineOutput>, mpsc::Sender<RoutineOutput>)
    {
        let client = Client::detached(ClientConfig::default());
        let (transaction, _ri_rx_real, _ri_tx_real) = Transaction::new();

        // A private queue so the test controls capacity.
        let (ri_tx, ri_rx) = mpsc::channel(1);
        if ri_capacity_filled {
            let (filler_tx, _filler_rx) = mpsc::channel(1);
            ri_tx
                .try_send(InputEnvelope {
                    input: RoutineInput::user_msg(None, "filler"),
                    token: 99,
                    ro_tx: filler_tx,
                })
                .unwrap();
        }

        let (ro_tx, ro_rx) = mpsc::channel(1);
        let id = TxId::new(*b"aaaaaaaaaaaaaaaa");
        let token = transaction.attach(None, ro_tx.clone());
        let driver = SocketDriver::new(id, token, client, transaction, ri_tx, ro_tx.clone());
        (driver, ri_rx, ro_rx, ro_tx)
    }

    #[tokio::test]
    async fn force_enqueue_sends_when_queue_has_room() {
        let (mut driver, mut ri_rx, ro_rx, _ro_tx) = driver_for_test(false);
        let mut ro_rx = Some(ro_rx);

        driver.force_enqueue(&mut ro_rx, RoutineInput::client_close(None)).await;

        let envelope = ri_rx.recv().await.expect("input should be enqueued");
        assert_eq!(envelope.input.kind, crate::routine::InputKind::ClientClose);
    }

    #[tokio::test]
    async fn force_enqueue_drains_outputs_while_queue_is_full() {
        let (mut driver, mut ri_rx, ro_rx, ro_tx) = driver_for_test(true);
        let mut ro_rx = Some(ro_rx);

        // Simulate a blocked engine: the first output fills the channel, the
        // second cannot be sent until the driver drains one, and only after
        // both are delivered does the engine free an input-queue slot.
        let engine = tokio::spawn(async move {
            ro_tx.send(RoutineOutput::reply(false, vec![])).await.expect("first output");
            ro_tx
                .send(RoutineOutput::reply(false, vec![]))
                .await
                .expect("driver should drain the first output");
            ri_rx.recv().await.expect("filler input");
            ri_rx
        });

        driver.force_enqueue(&mut ro_rx, RoutineInput::timeout(None)).await;

        let mut ri_rx = engine.await.unwrap();
        let envelope = ri_rx.recv().await.expect("timeout input should be enqueued");
        assert_eq!(envelope.input.kind, crate::routine::InputKind::Timeout);
    }

    #[tokio::test]
    async fn force_enqueue_gives_up_once_done() {
        let (mut driver, mut ri_rx, ro_rx, ro_tx) = driver_for_test(true);
        let mut ro_rx = Some(ro_rx);

        // The engine terminates the socket instead of making room.
        tokio::spawn(async move {
            ro_tx.send(RoutineOutput::reply(true, vec![])).await.expect("driver should drain");
        });

        driver.force_enqueue(&mut ro_rx, RoutineInput::timeout(None)).await;
        assert!(driver.done);

        // Only the filler is in the queue; the timeout was abandoned.
        let filler = ri_rx.recv().await.expect("filler input");
        assert_eq!(filler.token, 99);
        assert!(ri_rx.try_recv().is_err());
    }
}
