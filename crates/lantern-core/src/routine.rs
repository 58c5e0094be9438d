//! The state-machine contract every routine satisfies.
//!
//! A routine is pure with respect to its own state: stepping it never does
//! I/O. All effects are the returned [`RoutineOutput`]s (plus read-only
//! directory lookups), which the transaction engine fans out to the
//! addressed peers' sockets. This is what keeps routines trivially testable:
//! feed inputs, assert outputs.
//!
//! # Contract
//!
//! - `next` is called serially; no two calls on one routine overlap.
//! - Each call returns at most one output per addressed peer (counting the
//!   implicit "sender"). Violations are programming errors and fail fast.
//! - After a peer's socket has been terminated - by an output with
//!   [`RoutineOutput::done`] or by a [`InputKind::ClientClose`] input from
//!   it - the routine must not address that peer again.
//! - [`InputKind::ClientClose`] may be answered with zero outputs;
//!   [`InputKind::Timeout`] is usually answered with an error-terminator.

use std::time::Duration;

use lantern_proto::PublicKey;

/// What kind of event is being fed to the routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A message from the client
    UserMsg,
    /// The socket's armed deadline fired
    Timeout,
    /// The client's connection closed
    ClientClose,
}

/// One input event for a routine step.
#[derive(Debug, Clone)]
pub struct RoutineInput {
    /// Event kind
    pub kind: InputKind,
    /// Public key of the originating peer, if it has one
    pub sender: Option<PublicKey>,
    /// Message payload; empty for [`InputKind::Timeout`] and
    /// [`InputKind::ClientClose`]
    pub msg: String,
}

impl RoutineInput {
    /// A user message from `sender`.
    #[must_use]
    pub fn user_msg(sender: Option<PublicKey>, msg: impl Into<String>) -> Self {
        Self { kind: InputKind::UserMsg, sender, msg: msg.into() }
    }

    /// A timeout event on `sender`'s socket.
    #[must_use]
    pub fn timeout(sender: Option<PublicKey>) -> Self {
        Self { kind: InputKind::Timeout, sender, msg: String::new() }
    }

    /// A client-close event from `sender`.
    #[must_use]
    pub fn client_close(sender: Option<PublicKey>) -> Self {
        Self { kind: InputKind::ClientClose, sender, msg: String::new() }
    }
}

/// One output of a routine step, addressed to exactly one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineOutput {
    /// Addressee; `None` means "the sender of the input being processed"
    pub to: Option<PublicKey>,
    /// Payloads to emit, in order
    pub msgs: Vec<String>,
    /// Terminal emission for the addressee's socket
    pub done: bool,
    /// Deadline to arm on the addressee's socket after emission
    pub timeout: Option<Duration>,
}

impl RoutineOutput {
    /// An output back to the sender of the current input.
    #[must_use]
    pub fn reply(done: bool, msgs: Vec<String>) -> Self {
        Self { to: None, msgs, done, timeout: None }
    }

    /// An output addressed to `peer`.
    #[must_use]
    pub fn to_peer(peer: PublicKey, done: bool, msgs: Vec<String>) -> Self {
        Self { to: Some(peer), msgs, done, timeout: None }
    }

    /// Arm a timeout on the addressee's socket after this output is emitted.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A protocol state machine; one instance per transaction.
pub trait Routine: Send {
    /// Step the routine with one input, producing the outputs to fan out.
    fn next(&mut self, input: RoutineInput) -> Vec<RoutineOutput>;
}
