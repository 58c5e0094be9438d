//! Deterministic test tooling for the Lantern signalling server.
//!
//! Everything the integration suites need to exercise the core without a
//! network or a wall clock:
//!
//! - [`SeededEnv`]: seeded randomness behind the core's `Environment` trait
//! - [`pair`]: an in-memory message transport and full client sessions
//! - [`script`]: a step-script runner that drives a routine and enforces the
//!   routine contract on every step
//! - [`identity`]: deterministic Ed25519 test identities that can complete
//!   the `comeOnline` proof-of-possession
//!
//! Timing-sensitive tests run under `tokio::test(start_paused = true)`, so
//! armed socket deadlines fire instantly once the suite is otherwise idle.

#![forbid(unsafe_code)]

pub mod identity;
pub mod pair;
pub mod script;
mod seeded_env;

pub use seeded_env::SeededEnv;
