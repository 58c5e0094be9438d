//! Script tests for the single-step `sendFriendRejection` routine.

use std::sync::Arc;

use lantern_core::{
    client::{Client, ClientConfig},
    hub::Hub,
    routine::RoutineInput,
    routines::FriendRejection,
};
use lantern_harness::script::{ExpectedOutput, error_json, run_script, step};
use lantern_proto::PublicKey;
use serde_json::json;

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
    json!({ "initiate": "sendFriendRejection", "key": pk_b().as_str() }).to_string()
}

#[test]
fn online_target_gets_the_rejection() {
    let mut routine = FriendRejection::new(hub_with(&[pk_a(), pk_b()]));
    run_script(
        &mut routine,
        vec![step(
            RoutineInput::user_msg(Some(pk_a()), entry_msg()),
            vec![
                ExpectedOutput::reply()
                    .json(json!({ "peerStatus": "online", "terminate": "done" }))
                    .done(),
                ExpectedOutput::to_peer(&pk_b())
                    .json(json!({
                        "initiate": "receiveFriendRejection",
                        "terminate": "done",
                        "key": pk_a().as_str(),
                    }))
                    .done(),
            ],
        )],
    );
}

#[test]
fn offline_target() {
    let mut routine = FriendRejection::new(hub_with(&[pk_a()]));
    run_script(
        &mut routine,
        vec![step(
            RoutineInput::user_msg(Some(pk_a()), entry_msg()),
            vec![
                ExpectedOutput::reply()
                    .json(json!({ "peerStatus": "offline", "terminate": "done" }))
                    .done(),
            ],
        )],
    );
}

#[test]
fn missing_sender_key() {
    let mut routine = FriendRejection::new(hub_with(&[pk_b()]));
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
fn self_rejection_is_rejected() {
    let mut routine = FriendRejection::new(hub_with(&[pk_a()]));
    run_script(
        &mut routine,
        vec![step(
            RoutineInput::user_msg(
                Some(pk_a()),
                json!({ "initiate": "sendFriendRejection", "key": pk_a().as_str() }).to_string(),
            ),
            vec![
                ExpectedOutput::reply()
                    .json(error_json("Sending a friend rejection to yourself is not allowed"))
                    .done(),
            ],
        )],
    );
}

#[test]
fn schema_violations() {
    let bad_entries = [
        r#"{"initiate":"sendFriendRejection"}"#.to_string(),
        r#"{"initiate":"sendFriendRejection","key":"bad key!"}"#.to_string(),
        "}".to_string(),
        json!({ "initiate": "sendFriendRejection", "key": pk_b().as_str(), "x": 0 }).to_string(),
    ];

    for bad in bad_entries {
        let mut routine = FriendRejection::new(hub_with(&[pk_a(), pk_b()]));
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
fn client_close_produces_nothing() {
    let mut routine = FriendRejection::new(hub_with(&[pk_b()]));
    run_script(&mut routine, vec![step(RoutineInput::client_close(Some(pk_a())), vec![])]);
}
