//! `sendConnectionRequest`: WebRTC SDP/ICE relay between two online peers.
//!
//! ```text
//! entry ──> awaitPeerReply ──> awaitAnswer ──> iceExchange
//!   │              │
//!   │ target       │ {"forward":{"type":"reject"}}
//!   │ offline      ↓
//!   └──> done   both done
//! ```
//!
//! The initiator names a target peer; the server attaches the target's
//! connection to this transaction and relays the offer, the answer, and then
//! ICE candidates in both directions, arming a fresh deadline on the
//! receiving socket after every relayed message. A payload whose `candidate`
//! is the empty string marks its sender as finished; when both sides have
//! finished, the transaction terminates cleanly on both sockets.
//!
//! Everything else - a message from the wrong side, a schema violation, a
//! cancel, a disconnect, a timeout, or an ICE flood - terminates both sides
//! with the appropriate error frames.

use std::{sync::Arc, time::Duration};

use lantern_proto::{
    PublicKey,
    wire::{self, ConnectEntry, ForwardEnvelope, IceCandidate, SdpAnswer, SdpOffer},
};
use serde_json::{Value, json};

use crate::{
    hub::Hub,
    routine::{InputKind, Routine, RoutineInput, RoutineOutput},
    routines::error_output,
};

/// Deadline armed on a socket after each relayed handshake message.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Most ICE candidates either side may relay before the transaction is
/// terminated as a flood.
pub const MAX_ICE_CANDIDATES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Entry,
    AwaitPeerReply,
    AwaitAnswer,
    IceExchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Peer,
}

impl Role {
    fn other(self) -> Self {
        match self {
            Self::Initiator => Self::Peer,
            Self::Peer => Self::Initiator,
        }
    }
}

struct Participant {
    key: PublicKey,
    terminated: bool,
    ice_done: bool,
    ice_sent: u32,
}

impl Participant {
    fn new(key: PublicKey) -> Self {
        Self { key, terminated: false, ice_done: false, ice_sent: 0 }
    }
}

/// The `sendConnectionRequest` routine.
pub struct ConnectionRequest {
    hub: Arc<Hub>,
    state: State,
    initiator: Option<Participant>,
    peer: Option<Participant>,
}

impl ConnectionRequest {
    /// Create the routine for one transaction.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub, state: State::Entry, initiator: None, peer: None }
    }

    fn side(&self, role: Role) -> Option<&Participant> {
        match role {
            Role::Initiator => self.initiator.as_ref(),
            Role::Peer => self.peer.as_ref(),
        }
    }

    fn side_mut(&mut self, role: Role) -> Option<&mut Participant> {
        match role {
            Role::Initiator => self.initiator.as_mut(),
            Role::Peer => self.peer.as_mut(),
        }
    }

    fn role_of(&self, sender: Option<&PublicKey>) -> Option<Role> {
        let sender = sender?;
        if self.initiator.as_ref().is_some_and(|p| &p.key == sender) {
            Some(Role::Initiator)
        } else if self.peer.as_ref().is_some_and(|p| &p.key == sender) {
            Some(Role::Peer)
        } else {
            None
        }
    }

    /// Terminal error to the sender, plus - when the pair is established -
    /// `other_msg` to the surviving other side.
    fn terminate_pair(
        &mut self,
        sender: Option<Role>,
        sender_msgs: Vec<String>,
        other_msg: Option<&str>,
    ) -> Vec<RoutineOutput> {
        let mut outputs = Vec::new();

        let sender_alive =
            sender.and_then(|role| self.side(role)).is_none_or(|side| !side.terminated);
        if sender_alive {
            outputs.push(RoutineOutput::reply(true, sender_msgs));
            if let Some(side) = sender.and_then(|role| self.side_mut(role)) {
                side.terminated = true;
            }
        }

        if let Some(other_role) = sender.map(Role::other) {
            if let Some(other) = self.side_mut(other_role) {
                if !other.terminated {
                    other.terminated = true;
                    let key = other.key.clone();
                    outputs.push(RoutineOutput::to_peer(
                        key,
                        true,
                        vec![wire::error_frame(other_msg)],
                    ));
                }
            }
        }

        outputs
    }

    /// Wrong participant or schema violation: generic error to the sender,
    /// "Peer sent a malformed message" to the other side.
    fn protocol_violation(&mut self, sender: Option<Role>) -> Vec<RoutineOutput> {
        self.terminate_pair(
            sender,
            vec![wire::error_frame(None)],
            Some("Peer sent a malformed message"),
        )
    }

    fn handle_cancel(&mut self, sender: Option<Role>) -> Vec<RoutineOutput> {
        if self.state == State::Entry {
            // The target was never attached; only the sender terminates and
            // nobody else ever observes the transaction.
            return vec![RoutineOutput::reply(true, vec![])];
        }
        self.terminate_pair(sender, vec![], Some("Peer cancelled the transaction"))
    }

    fn handle_timeout(&mut self, sender: Option<Role>) -> Vec<RoutineOutput> {
        self.terminate_pair(
            sender,
            vec![wire::error_frame(Some("Timeout"))],
            Some("Peer timed out"),
        )
    }

    fn handle_client_close(&mut self, sender: Option<Role>) -> Vec<RoutineOutput> {
        if let Some(side) = sender.and_then(|role| self.side_mut(role)) {
            side.terminated = true;
        }

        let Some(other_role) = sender.map(Role::other) else { return vec![] };
        let Some(other) = self.side_mut(other_role) else { return vec![] };
        if other.terminated {
            return vec![];
        }
        other.terminated = true;
        let key = other.key.clone();
        vec![RoutineOutput::to_peer(key, true, vec![wire::error_frame(Some("Peer disconnected"))])]
    }

    fn entry(&mut self, sender: Option<&PublicKey>, msg: &str) -> Vec<RoutineOutput> {
        let Some(sender) = sender else {
            return vec![error_output(None, Some("You have not provided a public key"))];
        };

        let parsed: ConnectEntry = match wire::parse_strict(msg) {
            Ok(parsed) => parsed,
            Err(error) => return vec![error_output(None, Some(&error.to_string()))],
        };

        let target = match PublicKey::parse(&parsed.key) {
            Ok(target) => target,
            Err(error) => return vec![error_output(None, Some(&error.to_string()))],
        };

        if &target == sender {
            return vec![error_output(None, Some("Connecting to yourself is not allowed"))];
        }

        if self.hub.lookup(&target).is_none() {
            return vec![RoutineOutput::reply(
                true,
                vec![r#"{"peerStatus":"offline","forwarded":null,"terminate":"done"}"#.to_string()],
            )];
        }

        let invite =
            json!({ "initiate": "receiveConnectionRequest", "key": sender.as_str() }).to_string();

        self.initiator = Some(Participant::new(sender.clone()));
        self.peer = Some(Participant::new(target.clone()));
        self.state = State::AwaitPeerReply;

        vec![RoutineOutput::to_peer(target, false, vec![invite]).with_timeout(HANDSHAKE_TIMEOUT)]
    }

    fn await_peer_reply(&mut self, role: Option<Role>, msg: &str) -> Vec<RoutineOutput> {
        if role != Some(Role::Peer) {
            return self.protocol_violation(role);
        }

        let Ok(envelope) = wire::parse_strict::<ForwardEnvelope>(msg) else {
            return self.protocol_violation(role);
        };

        match envelope.forward.kind.as_str() {
            "reject" if envelope.forward.payload.is_none() => {
                let Some(initiator) = self.initiator.as_mut() else {
                    return self.protocol_violation(role);
                };
                initiator.terminated = true;
                let initiator_key = initiator.key.clone();
                if let Some(peer) = self.peer.as_mut() {
                    peer.terminated = true;
                }

                vec![
                    RoutineOutput::reply(true, vec![wire::done_frame()]),
                    RoutineOutput::to_peer(
                        initiator_key,
                        true,
                        vec![
                            r#"{"peerStatus":"online","forwarded":{"type":"reject"},"terminate":"done"}"#
                                .to_string(),
                        ],
                    ),
                ]
            },
            "acceptAndOffer" => {
                let Some(payload) = validated_payload::<SdpOffer>(&envelope.forward.payload)
                else {
                    return self.protocol_violation(role);
                };
                let Some(initiator) = self.initiator.as_ref() else {
                    return self.protocol_violation(role);
                };

                let forwarded = json!({
                    "peerStatus": "online",
                    "forwarded": { "type": "acceptAndOffer", "payload": payload },
                })
                .to_string();

                self.state = State::AwaitAnswer;
                vec![
                    RoutineOutput::to_peer(initiator.key.clone(), false, vec![forwarded])
                        .with_timeout(HANDSHAKE_TIMEOUT),
                ]
            },
            _ => self.protocol_violation(role),
        }
    }

    fn await_answer(&mut self, role: Option<Role>, msg: &str) -> Vec<RoutineOutput> {
        if role != Some(Role::Initiator) {
            return self.protocol_violation(role);
        }

        let Ok(envelope) = wire::parse_strict::<ForwardEnvelope>(msg) else {
            return self.protocol_violation(role);
        };
        if envelope.forward.kind != "answer" {
            return self.protocol_violation(role);
        }
        let Some(payload) = validated_payload::<SdpAnswer>(&envelope.forward.payload) else {
            return self.protocol_violation(role);
        };
        let Some(peer) = self.peer.as_ref() else {
            return self.protocol_violation(role);
        };

        let forwarded =
            json!({ "forwarded": { "type": "answer", "payload": payload } }).to_string();

        self.state = State::IceExchange;
        vec![
            RoutineOutput::to_peer(peer.key.clone(), false, vec![forwarded])
                .with_timeout(HANDSHAKE_TIMEOUT),
        ]
    }

    fn ice_exchange(&mut self, role: Option<Role>, msg: &str) -> Vec<RoutineOutput> {
        let Some(sender_role) = role else {
            return self.protocol_violation(role);
        };
        if self.side(sender_role).is_some_and(|side| side.ice_done) {
            // Sending candidates after the final empty one.
            return self.protocol_violation(role);
        }

        let Ok(envelope) = wire::parse_strict::<ForwardEnvelope>(msg) else {
            return self.protocol_violation(role);
        };
        if envelope.forward.kind != "ICECandidate" {
            return self.protocol_violation(role);
        }
        let Some(payload) = envelope.forward.payload else {
            return self.protocol_violation(role);
        };
        let candidate: IceCandidate = match serde_json::from_value(payload.clone()) {
            Ok(candidate) => candidate,
            Err(_) => return self.protocol_violation(role),
        };

        let forwarded =
            json!({ "forwarded": { "type": "ICECandidate", "payload": payload } }).to_string();

        let other_role = sender_role.other();
        let other_key = match self.side(other_role) {
            Some(other) if !other.terminated => other.key.clone(),
            _ => return self.protocol_violation(role),
        };

        if candidate.candidate.is_empty() {
            if let Some(side) = self.side_mut(sender_role) {
                side.ice_done = true;
            }

            let both_finished = self.side(other_role).is_some_and(|side| side.ice_done);
            if both_finished {
                if let Some(side) = self.side_mut(sender_role) {
                    side.terminated = true;
                }
                if let Some(side) = self.side_mut(other_role) {
                    side.terminated = true;
                }
                return vec![
                    RoutineOutput::to_peer(other_key, true, vec![forwarded, wire::done_frame()]),
                    RoutineOutput::reply(true, vec![wire::done_frame()]),
                ];
            }

            return vec![
                RoutineOutput::to_peer(other_key, false, vec![forwarded])
                    .with_timeout(HANDSHAKE_TIMEOUT),
            ];
        }

        let flooded = {
            let Some(side) = self.side_mut(sender_role) else {
                return self.protocol_violation(role);
            };
            side.ice_sent += 1;
            side.ice_sent > MAX_ICE_CANDIDATES
        };
        if flooded {
            return self.terminate_pair(
                Some(sender_role),
                vec![wire::error_frame(Some("You have sent too many ICE candidates"))],
                Some("Peer is sending too many ICE candidates"),
            );
        }

        vec![
            RoutineOutput::to_peer(other_key, false, vec![forwarded])
                .with_timeout(HANDSHAKE_TIMEOUT),
        ]
    }

}

/// Validate a forward payload against the expected shape, returning the raw
/// value so it can be relayed verbatim.
fn validated_payload<T: serde::de::DeserializeOwned>(payload: &Option<Value>) -> Option<Value> {
    let payload = payload.as_ref()?;
    serde_json::from_value::<T>(payload.clone()).ok()?;
    Some(payload.clone())
}

impl Routine for ConnectionRequest {
    fn next(&mut self, input: RoutineInput) -> Vec<RoutineOutput> {
        let role = self.role_of(input.sender.as_ref());

        match input.kind {
            InputKind::ClientClose => self.handle_client_close(role),
            InputKind::Timeout => self.handle_timeout(role),
            InputKind::UserMsg => {
                if wire::is_cancel(&input.msg) {
                    return self.handle_cancel(role);
                }
                match self.state {
                    State::Entry => self.entry(input.sender.as_ref(), &input.msg),
                    State::AwaitPeerReply => self.await_peer_reply(role, &input.msg),
                    State::AwaitAnswer => self.await_answer(role, &input.msg),
                    State::IceExchange => self.ice_exchange(role, &input.msg),
                }
            },
        }
    }
}
