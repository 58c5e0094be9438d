//! Tests for the `comeOnline` identity-attestation routine.
//!
//! The happy path is driven by hand because the challenge has to be pulled
//! out of one output and signed before the next input can be built; the
//! failure paths use the script runner.

use std::{sync::Arc, time::Duration};

use lantern_core::{
    client::{Client, ClientConfig},
    env::Environment,
    hub::Hub,
    routine::{Routine, RoutineInput},
    routines::ComeOnline,
};
use lantern_harness::{
    SeededEnv,
    identity::TestIdentity,
    script::{ExpectedOutput, error_json, run_script, step},
};
use serde_json::{Value, json};

const STEP_TIMEOUT: Duration = Duration::from_secs(30);

struct Fixture {
    client: Arc<Client>,
    hub: Arc<Hub>,
    routine: ComeOnline,
}

fn fixture() -> Fixture {
    let client = Client::detached(ClientConfig::default());
    let hub = Arc::new(Hub::new());
    let env: Arc<dyn Environment> = Arc::new(SeededEnv::new());
    let routine = ComeOnline::new(Arc::clone(&client), Arc::clone(&hub), env);
    Fixture { client, hub, routine }
}

fn initiate() -> RoutineInput {
    RoutineInput::user_msg(None, r#"{"initiate":"comeOnline"}"#)
}

fn payload(outputs: &[lantern_core::routine::RoutineOutput]) -> Value {
    assert_eq!(outputs.len(), 1, "expected a single output, got {outputs:?}");
    assert_eq!(outputs[0].msgs.len(), 1, "expected a single message, got {outputs:?}");
    serde_json::from_str(&outputs[0].msgs[0]).expect("routine emitted JSON")
}

#[test]
fn happy_path_registers_the_peer() {
    let mut fx = fixture();
    let identity = TestIdentity::from_seed(1);

    // hello -> version
    let outputs = fx.routine.next(initiate());
    assert_eq!(payload(&outputs), json!({ "version": "0.0" }));
    assert_eq!(outputs[0].timeout, Some(STEP_TIMEOUT));
    assert!(!outputs[0].done);

    // key -> challenge
    let outputs = fx
        .routine
        .next(RoutineInput::user_msg(None, json!({ "publicKey": identity.token }).to_string()));
    let challenge = payload(&outputs);
    let sign_this = challenge["signThis"].as_str().expect("challenge carries signThis");
    assert!(!sign_this.is_empty());
    assert!(!outputs[0].done);

    // signature -> welcome
    let signature = identity.sign_base64(sign_this);
    let outputs = fx
        .routine
        .next(RoutineInput::user_msg(None, json!({ "signature": signature }).to_string()));
    assert_eq!(payload(&outputs), json!({ "welcome": "welcome", "terminate": "done" }));
    assert!(outputs[0].done);

    // The peer is now discoverable and the connection is bound to the key.
    assert!(fx.hub.contains(&identity.public_key()));
    assert_eq!(fx.client.public_key(), Some(identity.public_key()));
}

#[test]
fn invalid_signature_is_rejected() {
    let mut fx = fixture();
    let identity = TestIdentity::from_seed(1);
    let wrong_identity = TestIdentity::from_seed(2);

    fx.routine.next(initiate());
    fx.routine
        .next(RoutineInput::user_msg(None, json!({ "publicKey": identity.token }).to_string()));

    // Signature by the wrong key over the right challenge.
    let outputs = fx.routine.next(RoutineInput::user_msg(
        None,
        json!({ "signature": wrong_identity.sign_base64("whatever") }).to_string(),
    ));
    assert_eq!(payload(&outputs), error_json("Invalid signature"));
    assert!(outputs[0].done);

    assert!(!fx.hub.contains(&identity.public_key()));
    assert_eq!(fx.client.public_key(), None);
}

#[test]
fn key_collision_is_rejected_at_key_submission() {
    let mut fx = fixture();
    let identity = TestIdentity::from_seed(1);

    // Someone else already holds this key.
    let other = Client::detached(ClientConfig::default());
    fx.hub.register(identity.public_key(), other).unwrap();

    fx.routine.next(initiate());
    let outputs = fx
        .routine
        .next(RoutineInput::user_msg(None, json!({ "publicKey": identity.token }).to_string()));
    assert_eq!(
        payload(&outputs),
        error_json("Another client already signed in with this public key")
    );
    assert!(outputs[0].done);
}

#[test]
fn malformed_key_material_is_rejected() {
    for bad in [
        // Not base64 SPKI
        json!({ "publicKey": "QUJDREVGR0g=" }).to_string(),
        // Token fails validation outright
        json!({ "publicKey": "spaces are not base64" }).to_string(),
        // Wrong property
        json!({ "key": "QUJDREVGR0g=" }).to_string(),
        // Extra property
        json!({ "publicKey": "QUJDREVGR0g=", "more": 1 }).to_string(),
    ] {
        let mut fx = fixture();
        fx.routine.next(initiate());
        let outputs = fx.routine.next(RoutineInput::user_msg(None, bad));
        assert!(outputs[0].done);
        let value = payload(&outputs);
        assert_eq!(value["terminate"], "cancel");
        assert!(value["error"].is_string());
    }
}

#[test]
fn key_already_set_is_rejected() {
    let fx = fixture();
    let mut routine = fx.routine;
    fx.client.set_public_key(TestIdentity::from_seed(3).public_key()).unwrap();

    run_script(
        &mut routine,
        vec![step(
            initiate(),
            vec![ExpectedOutput::reply().json(error_json("Public key already set")).done()],
        )],
    );
}

#[test]
fn concurrent_come_online_is_rejected_by_the_latch() {
    let client = Client::detached(ClientConfig::default());
    let hub = Arc::new(Hub::new());
    let env: Arc<dyn Environment> = Arc::new(SeededEnv::new());

    let mut first = ComeOnline::new(Arc::clone(&client), Arc::clone(&hub), Arc::clone(&env));
    let mut second = ComeOnline::new(Arc::clone(&client), Arc::clone(&hub), env);

    // First transaction holds the latch.
    let outputs = first.next(initiate());
    assert!(!outputs[0].done);

    let outputs = second.next(initiate());
    assert_eq!(
        payload(&outputs),
        error_json("another comeOnline transaction is already running")
    );
    assert!(outputs[0].done);

    // Once the first transaction dies, the latch is free again.
    first.next(RoutineInput::client_close(None));
    let mut third = ComeOnline::new(Arc::clone(&client), hub, Arc::new(SeededEnv::new()));
    let outputs = third.next(initiate());
    assert!(!outputs[0].done, "latch should be released after client close");
}

#[test]
fn cancel_terminates_silently() {
    let mut fx = fixture();
    run_script(
        &mut fx.routine,
        vec![
            step(
                initiate(),
                vec![
                    ExpectedOutput::reply()
                        .json(json!({ "version": "0.0" }))
                        .with_timeout(STEP_TIMEOUT),
                ],
            ),
            step(
                RoutineInput::user_msg(None, r#"{"terminate":"cancel"}"#),
                vec![ExpectedOutput::reply().done()],
            ),
        ],
    );
}

#[test]
fn timeout_terminates_with_error() {
    let mut fx = fixture();
    run_script(
        &mut fx.routine,
        vec![
            step(
                initiate(),
                vec![
                    ExpectedOutput::reply()
                        .json(json!({ "version": "0.0" }))
                        .with_timeout(STEP_TIMEOUT),
                ],
            ),
            step(
                RoutineInput::timeout(None),
                vec![ExpectedOutput::reply().json(error_json("timeout")).done()],
            ),
        ],
    );
}

#[test]
fn client_close_releases_everything_quietly() {
    let mut fx = fixture();
    run_script(
        &mut fx.routine,
        vec![
            step(
                initiate(),
                vec![
                    ExpectedOutput::reply()
                        .json(json!({ "version": "0.0" }))
                        .with_timeout(STEP_TIMEOUT),
                ],
            ),
            step(RoutineInput::client_close(None), vec![]),
        ],
    );
}
