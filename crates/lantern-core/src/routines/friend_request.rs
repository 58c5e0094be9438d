//! `sendFriendRequest`: two-step request/verdict relay.
//!
//! The initiator names a target; if the target is online the request is
//! forwarded to it and the target's verdict (`reject`, `accept`, `pending`)
//! is relayed back, terminating both sockets. An offline target terminates
//! the initiator immediately with a friendly status frame.

use std::{sync::Arc, time::Duration};

use lantern_proto::{
    PublicKey,
    wire::{self, FriendReplyEnvelope, FriendRequestEntry},
};
use serde_json::json;

use crate::{
    hub::Hub,
    routine::{InputKind, Routine, RoutineInput, RoutineOutput},
    routines::error_output,
};

/// Deadline armed on the target's socket while waiting for its verdict.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Entry,
    AwaitReply,
}

/// The `sendFriendRequest` routine.
pub struct FriendRequest {
    hub: Arc<Hub>,
    state: State,
    initiator: Option<PublicKey>,
    target: Option<PublicKey>,
    initiator_terminated: bool,
    target_terminated: bool,
}

impl FriendRequest {
    /// Create the routine for one transaction.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            state: State::Entry,
            initiator: None,
            target: None,
            initiator_terminated: false,
            target_terminated: false,
        }
    }

    fn is_initiator(&self, sender: Option<&PublicKey>) -> bool {
        sender.is_some() && self.initiator.as_ref() == sender
    }

    fn is_target(&self, sender: Option<&PublicKey>) -> bool {
        sender.is_some() && self.target.as_ref() == sender
    }

    /// The established counterpart of `sender`, if it is still active,
    /// marked terminated for the output about to be addressed to it.
    fn terminate_other_side(&mut self, sender: Option<&PublicKey>) -> Option<PublicKey> {
        let (other, terminated) = if self.is_initiator(sender) {
            (self.target.clone(), &mut self.target_terminated)
        } else if self.is_target(sender) {
            (self.initiator.clone(), &mut self.initiator_terminated)
        } else {
            return None;
        };
        let other = other?;
        if *terminated {
            return None;
        }
        *terminated = true;
        Some(other)
    }

    fn mark_sender_terminated(&mut self, sender: Option<&PublicKey>) {
        if self.is_initiator(sender) {
            self.initiator_terminated = true;
        } else if self.is_target(sender) {
            self.target_terminated = true;
        }
    }

    fn terminate_pair(
        &mut self,
        sender: Option<&PublicKey>,
        sender_msgs: Vec<String>,
        other_msg: Option<&str>,
    ) -> Vec<RoutineOutput> {
        let mut outputs = vec![RoutineOutput::reply(true, sender_msgs)];
        self.mark_sender_terminated(sender);
        if let Some(other) = self.terminate_other_side(sender) {
            outputs.push(RoutineOutput::to_peer(other, true, vec![wire::error_frame(other_msg)]));
        }
        outputs
    }

    fn protocol_violation(&mut self, sender: Option<&PublicKey>) -> Vec<RoutineOutput> {
        self.terminate_pair(
            sender,
            vec![wire::error_frame(None)],
            Some("Peer sent a malformed message"),
        )
    }

    fn entry(&mut self, sender: Option<&PublicKey>, msg: &str) -> Vec<RoutineOutput> {
        let Some(sender) = sender else {
            return vec![error_output(None, Some("You have not provided a public key"))];
        };

        let parsed: FriendRequestEntry = match wire::parse_strict(msg) {
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
                Some("Sending a friend request to yourself is not allowed"),
            )];
        }

        if self.hub.lookup(&target).is_none() {
            return vec![RoutineOutput::reply(
                true,
                vec![r#"{"peerStatus":"offline","forwarded":null,"terminate":"done"}"#.to_string()],
            )];
        }

        let invite =
            json!({ "initiate": "receiveFriendRequest", "key": sender.as_str() }).to_string();

        self.initiator = Some(sender.clone());
        self.target = Some(target.clone());
        self.state = State::AwaitReply;

        vec![RoutineOutput::to_peer(target, false, vec![invite]).with_timeout(REPLY_TIMEOUT)]
    }

    fn reply(&mut self, sender: Option<&PublicKey>, msg: &str) -> Vec<RoutineOutput> {
        // Only the target may answer.
        if !self.is_target(sender) {
            return self.protocol_violation(sender);
        }

        let parsed: FriendReplyEnvelope = match wire::parse_strict(msg) {
            Ok(parsed) => parsed,
            Err(_) => return self.protocol_violation(sender),
        };

        let Some(initiator) = self.initiator.clone() else {
            return self.protocol_violation(sender);
        };

        let verdict = json!({
            "peerStatus": "online",
            "forwarded": { "type": parsed.forward.kind.as_str() },
            "terminate": "done",
        })
        .to_string();

        self.initiator_terminated = true;
        self.target_terminated = true;

        vec![
            RoutineOutput::to_peer(initiator, true, vec![verdict]),
            RoutineOutput::reply(true, vec![wire::done_frame()]),
        ]
    }
}

impl Routine for FriendRequest {
    fn next(&mut self, input: RoutineInput) -> Vec<RoutineOutput> {
        let sender = input.sender.as_ref();
        match input.kind {
            InputKind::Timeout => self.terminate_pair(
                sender,
                vec![wire::error_frame(Some("Timeout"))],
                Some("Peer timed out"),
            ),
            InputKind::ClientClose => {
                self.mark_sender_terminated(sender);
                match self.terminate_other_side(sender) {
                    Some(other) => vec![RoutineOutput::to_peer(
                        other,
                        true,
                        vec![wire::error_frame(Some("Peer disconnected"))],
                    )],
                    None => vec![],
                }
            },
            InputKind::UserMsg => {
                if wire::is_cancel(&input.msg) {
                    if self.state == State::Entry {
                        return vec![RoutineOutput::reply(true, vec![])];
                    }
                    return self.terminate_pair(
                        sender,
                        vec![],
                        Some("Peer cancelled the transaction"),
                    );
                }
                match self.state {
                    State::Entry => self.entry(input.sender.as_ref(), &input.msg),
                    State::AwaitReply => self.reply(input.sender.as_ref(), &input.msg),
                }
            },
        }
    }
}
