//! `comeOnline`: identity attestation and directory registration.
//!
//! ```text
//! client                                server
//!   ── {"initiate":"comeOnline"} ──────────>
//!   <────────────────── {"version":"0.0"} ──
//!   ── {"publicKey":<base64 SPKI>} ────────>
//!   <──────────── {"signThis":<challenge>} ──
//!   ── {"signature":<base64>} ─────────────>
//!   <── {"welcome":"welcome","terminate":"done"} ──
//! ```
//!
//! The server verifies the signature over the challenge text against the
//! claimed key, registers the peer in the directory, and binds the key to
//! the connection. Failures at any step terminate with an error frame. At
//! most one `comeOnline` may run per connection at a time (a latch on the
//! client enforces it), and a connection whose key is already set cannot run
//! another.

use std::{sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use lantern_proto::{
    IdentityKey,
    wire::{self, PublicKeyMsg, SignatureMsg},
};
use tracing::warn;

use crate::{
    client::Client,
    env::Environment,
    hub::Hub,
    routine::{InputKind, Routine, RoutineInput, RoutineOutput},
    routines::error_output,
};

/// Protocol version reported in the hello reply.
pub const PROTOCOL_VERSION: &str = "0.0";

/// How long the client gets for each step of the handshake.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Length of the random challenge, in bytes (before base64).
const CHALLENGE_LEN: usize = 128;

enum Step {
    Hello,
    AwaitKey,
    AwaitSignature,
}

/// The `comeOnline` routine.
pub struct ComeOnline {
    client: Arc<Client>,
    hub: Arc<Hub>,
    env: Arc<dyn Environment>,
    step: Step,
    /// Whether this instance holds the client's comeOnline latch.
    latched: bool,
    sign_this: String,
    pending: Option<IdentityKey>,
}

impl ComeOnline {
    /// Create the routine for one transaction on `client`'s connection.
    #[must_use]
    pub fn new(client: Arc<Client>, hub: Arc<Hub>, env: Arc<dyn Environment>) -> Self {
        Self {
            client,
            hub,
            env,
            step: Step::Hello,
            latched: false,
            sign_this: String::new(),
            pending: None,
        }
    }

    fn release_latch(&mut self) {
        if self.latched {
            self.client.end_come_online();
            self.latched = false;
        }
    }

    fn fail(&mut self, reason: &str) -> Vec<RoutineOutput> {
        self.release_latch();
        vec![error_output(None, Some(reason))]
    }

    fn hello(&mut self) -> Vec<RoutineOutput> {
        if self.client.public_key().is_some() {
            return self.fail("Public key already set");
        }
        if !self.client.begin_come_online() {
            return self.fail("another comeOnline transaction is already running");
        }
        self.latched = true;
        self.step = Step::AwaitKey;

        let version = serde_json::json!({ "version": PROTOCOL_VERSION }).to_string();
        vec![RoutineOutput::reply(false, vec![version]).with_timeout(STEP_TIMEOUT)]
    }

    fn recv_public_key(&mut self, msg: &str) -> Vec<RoutineOutput> {
        let parsed: PublicKeyMsg = match wire::parse_strict(msg) {
            Ok(parsed) => parsed,
            Err(error) => return self.fail(&error.to_string()),
        };

        let identity = match IdentityKey::from_spki_base64(&parsed.public_key) {
            Ok(identity) => identity,
            Err(error) => return self.fail(&error.to_string()),
        };

        if self.hub.contains(identity.token()) {
            return self.fail("Another client already signed in with this public key");
        }

        let mut challenge = [0u8; CHALLENGE_LEN];
        self.env.random_bytes(&mut challenge);
        self.sign_this = BASE64.encode(challenge);

        self.pending = Some(identity);
        self.step = Step::AwaitSignature;

        let sign_this = serde_json::json!({ "signThis": self.sign_this }).to_string();
        vec![RoutineOutput::reply(false, vec![sign_this]).with_timeout(STEP_TIMEOUT)]
    }

    fn recv_signature(&mut self, msg: &str) -> Vec<RoutineOutput> {
        let parsed: SignatureMsg = match wire::parse_strict(msg) {
            Ok(parsed) => parsed,
            Err(error) => return self.fail(&error.to_string()),
        };

        let Some(identity) = self.pending.take() else {
            return self.fail("internal error: no key under verification");
        };

        // The client signs the challenge text exactly as it was sent.
        match identity.verify_base64(self.sign_this.as_bytes(), &parsed.signature) {
            Ok(true) => {},
            Ok(false) => return self.fail("Invalid signature"),
            Err(error) => return self.fail(&error.to_string()),
        }

        let token = identity.token().clone();
        if let Err(error) = self.hub.register(token.clone(), Arc::clone(&self.client)) {
            return self.fail(&error.to_string());
        }
        if let Err(error) = self.client.set_public_key(token) {
            // The latch makes this unreachable; failing open would leave the
            // hub and the connection out of sync.
            warn!(%error, "client key was set behind a held comeOnline latch");
        }

        self.release_latch();
        vec![RoutineOutput::reply(
            true,
            vec![r#"{"welcome":"welcome","terminate":"done"}"#.to_string()],
        )]
    }
}

impl Routine for ComeOnline {
    fn next(&mut self, input: RoutineInput) -> Vec<RoutineOutput> {
        match input.kind {
            InputKind::ClientClose => {
                self.release_latch();
                vec![]
            },
            InputKind::Timeout => self.fail("timeout"),
            InputKind::UserMsg => {
                if wire::is_cancel(&input.msg) {
                    self.release_latch();
                    return vec![RoutineOutput::reply(true, vec![])];
                }
                match self.step {
                    Step::Hello => self.hello(),
                    Step::AwaitKey => self.recv_public_key(&input.msg),
                    Step::AwaitSignature => self.recv_signature(&input.msg),
                }
            },
        }
    }
}

impl Drop for ComeOnline {
    fn drop(&mut self) {
        // The engine drops the routine when the transaction dies; make sure
        // an abandoned handshake cannot wedge the latch.
        self.release_latch();
    }
}
