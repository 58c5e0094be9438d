//! `sendFriendRejection`: single-step rejection relay.
//!
//! One message in, one or two frames out: the sender learns whether the
//! target was online, and an online target is told about the rejection. The
//! transaction terminates immediately on every path.

use std::sync::Arc;

use lantern_proto::{PublicKey, wire::{self, FriendRejectionEntry}};
use serde_json::json;

use crate::{
    hub::Hub,
    routine::{InputKind, Routine, RoutineInput, RoutineOutput},
    routines::error_output,
};

/// The `sendFriendRejection` routine.
pub struct FriendRejection {
    hub: Arc<Hub>,
}

impl FriendRejection {
    /// Create the routine for one transaction.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    fn entry(&mut self, sender: Option<&PublicKey>, msg: &str) -> Vec<RoutineOutput> {
        let Some(sender) = sender else {
            return vec![error_output(None, Some("You have not provided a public key"))];
        };

        let parsed: FriendRejectionEntry = match wire::parse_strict(msg) {
            Ok(parsed) => parsed,
            Err(error) => return vec![error_output(None, Some(&error.to_string()))],
        };

        let target = match PublicKey::parse(&parsed.key) {
            Ok(target) => target,
            Err(error) => return vec![error_output(None, Some(&error.to_string()))],
        };

        if &target == sender {
            return vec![error_output(
                None,
                Some("Sending a friend rejection to yourself is not allowed"),
            )];
        }

        if self.hub.lookup(&target).is_none() {
            return vec![RoutineOutput::reply(
                true,
                vec![r#"{"peerStatus":"offline","terminate":"done"}"#.to_string()],
            )];
        }

        let notice = json!({
            "initiate": "receiveFriendRejection",
            "terminate": "done",
            "key": sender.as_str(),
        })
        .to_string();

        vec![
            RoutineOutput::reply(
                true,
                vec![r#"{"peerStatus":"online","terminate":"done"}"#.to_string()],
            ),
            RoutineOutput::to_peer(target, true, vec![notice]),
        ]
    }
}

impl Routine for FriendRejection {
    fn next(&mut self, input: RoutineInput) -> Vec<RoutineOutput> {
        match input.kind {
            InputKind::ClientClose => vec![],
            // No deadline is ever armed here; answer a stray timeout with a
            // terminator anyway.
            InputKind::Timeout => vec![error_output(None, Some("Timeout"))],
            InputKind::UserMsg => {
                if wire::is_cancel(&input.msg) {
                    return vec![RoutineOutput::reply(true, vec![])];
                }
                self.entry(input.sender.as_ref(), &input.msg)
            },
        }
    }
}
