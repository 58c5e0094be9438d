//! Script tests for the `sendFriendRequest` state machine.

use std::{sync::Arc, time::Duration};

use lantern_core::{
    client::{Client, ClientConfig},
    hub::Hub,
    routine::RoutineInput,
    routines::FriendRequest,
};
use lantern_harness::script::{ExpectedOutput, Step, done_json, error_json, run_script, step};
use lantern_proto::PublicKey;
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(10);

fn pk_a() -> PublicKey {
    PublicKey::parse("KeyOfPeerA").unwrap()
}

fn pk_b() -> PublicKey {
    PublicKey::parse("KeyOfPeerB").unwrap()
}

fn hub_with(keys: &[PublicKey]) -> Arc<Hub> {
    let hub = Arc::new(Hub::new());
    for key in keys {
        let client = Client::detached(ClientConfig::default());
        client.set_public_key(key.clone()).unwrap();
        hub.register(key.clone(), client).unwrap();
    }
    hub
}

fn entry_msg() -> String {
    json!({ "initiate": "sendFriendRequest", "key": pk_b().as_str() }).to_string()
}

fn step_entry_online() -> Step {
    step(
        RoutineInput::user_msg(Some(pk_a()), entry_msg()),
        vec![
            ExpectedOutput::to_peer(&pk_b())
                .json(json!({ "initiate": "receiveFriendRequest", "key": pk_a().as_str() }))
                .with_timeout(TIMEOUT),
        ],
    )
}

fn step_verdict(kind: &str) -> Step {
    step(
        RoutineInput::user_msg(
            Some(pk_b()),
            json!({ "forward": { "type": kind } }).to_string(),
        ),
        vec![
            ExpectedOutput::to_peer(&pk_a())
                .json(json!({
                    "peerStatus": "online",
                    "forwarded": { "type": kind },
                    "terminate": "done",
                }))
                .done(),
            ExpectedOutput::reply().json(done_json()).done(),
        ],
    )
}

#[test]
fn offline_target() {
    let mut routine = FriendRequest::new(hub_with(&[pk_a()]));
    run_script(
        &mut routine,
        vec![step(
            RoutineInput::user_msg(Some(pk_a()), entry_msg()),
            vec![
                ExpectedOutput::reply()
                    .json(json!({ "peerStatus": "offline", "forwarded": null, "terminate": "done" }))
                    .done(),
            ],
        )],
    );
}

#[test]
fn every_verdict_is_relayed() {
    for verdict in ["reject", "accept", "pending"] {
        let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
        run_script(&mut routine, vec![step_entry_online(), step_verdict(verdict)]);
    }
}

#[test]
fn missing_sender_key() {
    let mut routine = FriendRequest::new(hub_with(&[pk_b()]));
    run_script(
        &mut routine,
        vec![step(
            RoutineInput::user_msg(None, entry_msg()),
            vec![
                ExpectedOutput::reply()
                    .json(error_json("You have not provided a public key"))
                    .done(),
            ],
        )],
    );
}

#[test]
fn self_request_is_rejected() {
    let mut routine = FriendRequest::new(hub_with(&[pk_a()]));
    run_script(
        &mut routine,
        vec![step(
            RoutineInput::user_msg(
                Some(pk_a()),
                json!({ "initiate": "sendFriendRequest", "key": pk_a().as_str() }).to_string(),
            ),
            vec![
                ExpectedOutput::reply()
                    .json(error_json("Sending a friend request to yourself is not allowed"))
                    .done(),
            ],
        )],
    );
}

#[test]
fn entry_schema_violations() {
    let bad_entries = [
        r#"{"initiate":"sendFriendRequest"}"#.to_string(),
        r#"{"initiate":"sendFriendRequest","key":"bad key!"}"#.to_string(),
        "not json".to_string(),
        json!({ "initiate": "sendFriendRequest", "key": pk_b().as_str(), "extra": 1 }).to_string(),
    ];

    for bad in bad_entries {
        let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
        run_script(
            &mut routine,
            vec![step(
                RoutineInput::user_msg(Some(pk_a()), bad),
                vec![ExpectedOutput::reply().any_error().done()],
            )],
        );
    }
}

#[test]
fn malformed_verdict_terminates_both() {
    for bad in [
        "garbage".to_string(),
        r#"{"forward":{"type":"maybe"}}"#.to_string(),
        r#"{"forward":{"type":"reject","payload":{}}}"#.to_string(),
    ] {
        let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
        run_script(
            &mut routine,
            vec![
                step_entry_online(),
                step(
                    RoutineInput::user_msg(Some(pk_b()), bad),
                    vec![
                        ExpectedOutput::reply().any_error().done(),
                        ExpectedOutput::to_peer(&pk_a())
                            .json(error_json("Peer sent a malformed message"))
                            .done(),
                    ],
                ),
            ],
        );
    }
}

#[test]
fn initiator_speaking_out_of_turn_terminates_both() {
    let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
    run_script(
        &mut routine,
        vec![
            step_entry_online(),
            step(
                RoutineInput::user_msg(
                    Some(pk_a()),
                    r#"{"forward":{"type":"accept"}}"#.to_string(),
                ),
                vec![
                    ExpectedOutput::reply().any_error().done(),
                    ExpectedOutput::to_peer(&pk_b())
                        .json(error_json("Peer sent a malformed message"))
                        .done(),
                ],
            ),
        ],
    );
}

#[test]
fn disconnects_cancel_and_timeout_while_waiting() {
    // Target disconnects.
    let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
    run_script(
        &mut routine,
        vec![
            step_entry_online(),
            step(
                RoutineInput::client_close(Some(pk_b())),
                vec![ExpectedOutput::to_peer(&pk_a()).json(error_json("Peer disconnected")).done()],
            ),
        ],
    );

    // Initiator disconnects.
    let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
    run_script(
        &mut routine,
        vec![
            step_entry_online(),
            step(
                RoutineInput::client_close(Some(pk_a())),
                vec![ExpectedOutput::to_peer(&pk_b()).json(error_json("Peer disconnected")).done()],
            ),
        ],
    );

    // Target never answers.
    let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
    run_script(
        &mut routine,
        vec![
            step_entry_online(),
            step(
                RoutineInput::timeout(Some(pk_b())),
                vec![
                    ExpectedOutput::reply().json(error_json("Timeout")).done(),
                    ExpectedOutput::to_peer(&pk_a()).json(error_json("Peer timed out")).done(),
                ],
            ),
        ],
    );

    // Target cancels.
    let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
    run_script(
        &mut routine,
        vec![
            step_entry_online(),
            step(
                RoutineInput::user_msg(Some(pk_b()), r#"{"terminate":"cancel"}"#.to_string()),
                vec![
                    ExpectedOutput::reply().done(),
                    ExpectedOutput::to_peer(&pk_a())
                        .json(error_json("Peer cancelled the transaction"))
                        .done(),
                ],
            ),
        ],
    );
}

#[test]
fn entry_cancel_terminates_only_the_sender() {
    let mut routine = FriendRequest::new(hub_with(&[pk_a(), pk_b()]));
    run_script(
        &mut routine,
        vec![step(
            RoutineInput::user_msg(Some(pk_a()), r#"{"terminate":"cancel"}"#.to_string()),
            vec![ExpectedOutput::reply().done()],
        )],
    );
}
