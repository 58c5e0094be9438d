//! The routine catalogue.
//!
//! Every transaction starts as a [`MasterRoutine`], which inspects the first
//! message's `initiate` property and delegates to one of the concrete
//! routines:
//!
//! | token | routine |
//! |---|---|
//! | `comeOnline` | [`ComeOnline`] - identity attestation |
//! | `sendConnectionRequest` | [`ConnectionRequest`] - WebRTC SDP/ICE relay |
//! | `sendFriendRequest` | [`FriendRequest`] |
//! | `sendFriendRejection` | [`FriendRejection`] |
//!
//! All of them satisfy the same contract ([`crate::routine::Routine`]) and
//! the same termination discipline: anything that goes wrong on a socket is
//! answered with a `{"terminate":"cancel",…}` frame and `done`.

mod come_online;
mod connection_request;
mod friend_rejection;
mod friend_request;
mod master;

pub use come_online::ComeOnline;
pub use connection_request::ConnectionRequest;
pub use friend_rejection::FriendRejection;
pub use friend_request::FriendRequest;
pub use master::MasterRoutine;

use lantern_proto::{PublicKey, wire};

use crate::routine::RoutineOutput;

/// A terminal error output: one `{"terminate":"cancel",…}` frame, done.
pub(crate) fn error_output(to: Option<PublicKey>, msg: Option<&str>) -> RoutineOutput {
    RoutineOutput { to, msgs: vec![wire::error_frame(msg)], done: true, timeout: None }
}
