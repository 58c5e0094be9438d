//! In-memory message transport and full client sessions.
//!
//! [`connect`] builds the two halves the core needs (a `MessageStream` and a
//! `MessageSink`) plus a [`TestConn`] the test drives as if it were the
//! remote client. [`spawn_session`] goes one step further and runs a whole
//! connection - router, master routine, hub cleanup - exactly the way the
//! production binary does, minus the TCP socket.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use lantern_core::{
    client::{Client, ClientConfig},
    env::Environment,
    hub::Hub,
    routine::Routine,
    routines::MasterRoutine,
    transport::{MessageSink, MessageStream},
};
use lantern_proto::{Frame, TxId};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::identity::TestIdentity;

struct PipeStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl MessageStream for PipeStream {
    async fn next_message(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

struct PipeSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl MessageSink for PipeSink {
    async fn send_message(&mut self, msg: &[u8]) -> std::io::Result<()> {
        self.tx.send(msg.to_vec()).map_err(|_| std::io::ErrorKind::BrokenPipe.into())
    }
}

/// The remote end of an in-memory connection, driven by the test.
pub struct TestConn {
    to_server: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_server: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl TestConn {
    /// Send raw message bytes, exactly as they would arrive off the wire.
    ///
    /// # Panics
    ///
    /// Panics if the connection was closed by [`TestConn::close`].
    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.to_server
            .as_ref()
            .expect("connection already closed")
            .send(bytes)
            .expect("server side of the pipe is gone");
    }

    /// Send one `<id><payload>` frame.
    pub fn send_frame(&self, id: TxId, payload: &str) {
        self.send_raw(Frame::new(id, payload).encode_to_vec().expect("test frame encodes"));
    }

    /// Close the client side of the connection; the router observes a clean
    /// end of stream.
    pub fn close(&mut self) {
        self.to_server = None;
    }

    /// Receive the next frame the server wrote, or `None` once the server
    /// dropped its sink.
    ///
    /// # Panics
    ///
    /// Panics if the server does not produce a frame within five (virtual
    /// or real) seconds, or writes malformed bytes.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        let bytes = tokio::time::timeout(Duration::from_secs(5), self.from_server.recv())
            .await
            .expect("timed out waiting for a server frame")?;
        Some(Frame::decode(&bytes).expect("server wrote a malformed frame"))
    }

    /// Receive the next frame and parse its payload as JSON.
    ///
    /// # Panics
    ///
    /// As [`TestConn::recv_frame`], plus if the stream ended or the payload
    /// is not JSON.
    pub async fn recv_json(&mut self) -> (TxId, serde_json::Value) {
        let frame = self.recv_frame().await.expect("server closed the connection");
        let value = serde_json::from_str(&frame.payload)
            .unwrap_or_else(|e| panic!("server wrote non-JSON payload {:?}: {e}", frame.payload));
        (frame.id, value)
    }

    /// Assert that no frame arrives within the given (virtual) duration.
    ///
    /// # Panics
    ///
    /// Panics if a frame does arrive.
    pub async fn expect_silence(&mut self, duration: Duration) {
        let result = tokio::time::timeout(duration, self.from_server.recv()).await;
        if let Ok(Some(bytes)) = result {
            panic!("expected silence, got frame {:?}", Frame::decode(&bytes));
        }
    }
}

/// Build an in-memory connection: the test's end plus the two transport
/// halves to hand to a [`Client`].
#[must_use]
pub fn connect() -> (TestConn, Box<dyn MessageStream>, Box<dyn MessageSink>) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    let conn = TestConn { to_server: Some(client_tx), from_server: client_rx };
    (conn, Box::new(PipeStream { rx: server_rx }), Box::new(PipeSink { tx: server_tx }))
}

/// Spawn a complete connection session against `hub`: router plus master
/// routine, with the same hub cleanup the server binary performs when the
/// connection ends.
pub fn spawn_session(
    hub: &Arc<Hub>,
    env: &Arc<dyn Environment>,
    config: ClientConfig,
) -> (TestConn, Arc<Client>, JoinHandle<()>) {
    let (conn, stream, sink) = connect();
    let client = Client::new(sink, config);

    let session = {
        let client = Arc::clone(&client);
        let hub = Arc::clone(hub);
        let env = Arc::clone(env);
        tokio::spawn(async move {
            let factory = {
                let client = Arc::clone(&client);
                let hub = Arc::clone(&hub);
                let env = Arc::clone(&env);
                move || {
                    Box::new(MasterRoutine::new(
                        Arc::clone(&client),
                        Arc::clone(&hub),
                        Arc::clone(&env),
                    )) as Box<dyn Routine>
                }
            };
            Arc::clone(&client).route(&hub, &env, stream, factory).await;

            if let Some(key) = client.public_key() {
                let _ = hub.unregister(&key);
            }
        })
    };

    (conn, client, session)
}

/// Drive a full `comeOnline` handshake for `identity` over `conn`.
///
/// # Panics
///
/// Panics if any step of the exchange deviates from the happy path.
pub async fn come_online(conn: &mut TestConn, identity: &TestIdentity, id: TxId) {
    conn.send_frame(id, r#"{"initiate":"comeOnline"}"#);
    let (reply_id, version) = conn.recv_json().await;
    assert_eq!(reply_id, id);
    assert_eq!(version["version"], "0.0");

    conn.send_frame(id, &serde_json::json!({ "publicKey": identity.token }).to_string());
    let (_, challenge) = conn.recv_json().await;
    let sign_this = challenge["signThis"].as_str().expect("challenge carries signThis");

    let signature = identity.sign_base64(sign_this);
    conn.send_frame(id, &serde_json::json!({ "signature": signature }).to_string());
    let (_, welcome) = conn.recv_json().await;
    assert_eq!(welcome["welcome"], "welcome");
    assert_eq!(welcome["terminate"], "done");
}
