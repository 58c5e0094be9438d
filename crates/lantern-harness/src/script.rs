//! Step-script runner for routine state machines.
//!
//! A script is a sequence of [`Step`]s: one routine input plus the outputs
//! it must produce. Besides matching the expected outputs, the runner
//! enforces the routine contract on every step:
//!
//! - at most one output per addressee per step;
//! - no output to an addressee whose socket has terminated (by an earlier
//!   `done` output or its own client-close);
//! - when the script ends, every socket the routine ever opened has been
//!   terminated.
//!
//! Addressees are identified the way the engine resolves them: an output
//! with no explicit key goes to the sender of the step's input.

use std::{collections::HashSet, time::Duration};

use lantern_core::routine::{InputKind, Routine, RoutineInput};
use lantern_proto::PublicKey;
use serde_json::{Value, json};

/// How one emitted message is matched.
pub enum Expect {
    /// Payload must parse to exactly this JSON value.
    Json(Value),
    /// Payload must be a canonical error frame: `terminate:"cancel"`, an
    /// optional string `error`, nothing else.
    AnyError,
    /// Payload must parse as JSON and satisfy the predicate.
    Check(&'static str, fn(&Value) -> bool),
}

/// One expected routine output.
pub struct ExpectedOutput {
    /// Expected addressee; `None` means the step's sender.
    pub to: Option<PublicKey>,
    /// Expected messages, in order.
    pub msgs: Vec<Expect>,
    /// Expected done flag.
    pub done: bool,
    /// Expected armed timeout.
    pub timeout: Option<Duration>,
}

impl ExpectedOutput {
    /// Expect an output back to the step's sender.
    #[must_use]
    pub fn reply() -> Self {
        Self { to: None, msgs: vec![], done: false, timeout: None }
    }

    /// Expect an output addressed to `peer`.
    #[must_use]
    pub fn to_peer(peer: &PublicKey) -> Self {
        Self { to: Some(peer.clone()), msgs: vec![], done: false, timeout: None }
    }

    /// Append an exact-JSON message expectation.
    #[must_use]
    pub fn json(mut self, value: Value) -> Self {
        self.msgs.push(Expect::Json(value));
        self
    }

    /// Append an any-error-frame expectation.
    #[must_use]
    pub fn any_error(mut self) -> Self {
        self.msgs.push(Expect::AnyError);
        self
    }

    /// Append a predicate expectation.
    #[must_use]
    pub fn check(mut self, name: &'static str, predicate: fn(&Value) -> bool) -> Self {
        self.msgs.push(Expect::Check(name, predicate));
        self
    }

    /// Expect the done flag.
    #[must_use]
    pub fn done(mut self) -> Self {
        self.done = true;
        self
    }

    /// Expect an armed timeout of `duration`.
    #[must_use]
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// One scripted step: the input to feed and the outputs it must produce.
pub struct Step {
    /// Input fed to the routine
    pub input: RoutineInput,
    /// Outputs the step must produce, in any order (at most one per
    /// addressee)
    pub expect: Vec<ExpectedOutput>,
}

/// Build a step.
#[must_use]
pub fn step(input: RoutineInput, expect: Vec<ExpectedOutput>) -> Step {
    Step { input, expect }
}

/// The canonical error frame with a specific message, for exact matching.
#[must_use]
pub fn error_json(msg: &str) -> Value {
    json!({ "terminate": "cancel", "error": msg })
}

/// The bare done frame, for exact matching.
#[must_use]
pub fn done_json() -> Value {
    json!({ "terminate": "done" })
}

/// Run `steps` against `routine`, enforcing the routine contract.
///
/// # Panics
///
/// Panics (failing the test) on any contract or expectation violation.
pub fn run_script(routine: &mut dyn Routine, steps: Vec<Step>) {
    let mut terminated: HashSet<Option<PublicKey>> = HashSet::new();
    let mut active: HashSet<Option<PublicKey>> = HashSet::new();

    // The first input comes from the initiating client, whose socket is
    // open by construction.
    if let Some(first) = steps.first() {
        active.insert(first.input.sender.clone());
    }

    for (step_num, step) in steps.into_iter().enumerate() {
        let sender = step.input.sender.clone();
        let kind = step.input.kind;

        let outputs = routine.next(step.input);

        if kind == InputKind::ClientClose {
            active.remove(&sender);
            terminated.insert(sender.clone());
        }

        let mut expectations = step.expect;
        let mut seen: HashSet<Option<PublicKey>> = HashSet::new();

        for output in outputs {
            let addressee: Option<PublicKey> = match &output.to {
                Some(pk) => Some(pk.clone()),
                None => sender.clone(),
            };

            assert!(
                seen.insert(addressee.clone()),
                "step {step_num}: routine emitted two outputs for {addressee:?}"
            );
            assert!(
                !terminated.contains(&addressee),
                "step {step_num}: routine emitted an output to terminated {addressee:?}"
            );

            if output.done {
                active.remove(&addressee);
                terminated.insert(addressee.clone());
            } else {
                active.insert(addressee.clone());
            }

            let resolved = |expected: &ExpectedOutput| match &expected.to {
                Some(pk) => Some(pk.clone()),
                None => sender.clone(),
            };
            let position = expectations
                .iter()
                .position(|expected| resolved(expected) == addressee)
                .unwrap_or_else(|| {
                    panic!("step {step_num}: unexpected output to {addressee:?}: {output:?}")
                });
            let expected = expectations.remove(position);

            assert_eq!(
                output.done, expected.done,
                "step {step_num}: done mismatch for {addressee:?}"
            );
            assert_eq!(
                output.timeout, expected.timeout,
                "step {step_num}: timeout mismatch for {addressee:?}"
            );
            assert_eq!(
                output.msgs.len(),
                expected.msgs.len(),
                "step {step_num}: message count mismatch for {addressee:?}: got {:?}",
                output.msgs
            );
            for (msg, expect) in output.msgs.iter().zip(&expected.msgs) {
                match_message(step_num, &addressee, msg, expect);
            }
        }

        assert!(
            expectations.is_empty(),
            "step {step_num}: expected outputs never emitted: {:?}",
            expectations.iter().map(|e| &e.to).collect::<Vec<_>>()
        );
    }

    assert!(active.is_empty(), "sockets still open after the script: {active:?}");
}

fn match_message(step_num: usize, addressee: &Option<PublicKey>, msg: &str, expect: &Expect) {
    let value: Value = serde_json::from_str(msg).unwrap_or_else(|e| {
        panic!("step {step_num}: non-JSON message to {addressee:?}: {msg:?} ({e})")
    });

    match expect {
        Expect::Json(expected) => {
            assert_eq!(
                &value, expected,
                "step {step_num}: message mismatch for {addressee:?}"
            );
        },
        Expect::AnyError => {
            let obj = value
                .as_object()
                .unwrap_or_else(|| panic!("step {step_num}: error frame is not an object: {msg}"));
            assert_eq!(
                obj.get("terminate").and_then(Value::as_str),
                Some("cancel"),
                "step {step_num}: not an error frame: {msg}"
            );
            assert!(
                obj.keys().all(|k| k == "terminate" || k == "error"),
                "step {step_num}: error frame has extra properties: {msg}"
            );
            if let Some(error) = obj.get("error") {
                assert!(
                    error.is_string(),
                    "step {step_num}: error property is not a string: {msg}"
                );
            }
        },
        Expect::Check(name, predicate) => {
            assert!(predicate(&value), "step {step_num}: check {name} failed on {msg}");
        },
    }
}
