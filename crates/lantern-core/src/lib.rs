//! Lantern signalling core: routine engine, transaction sockets, and the
//! online-peer directory.
//!
//! # Architecture
//!
//! A connected peer runs one [`client::Client`] router which demultiplexes
//! incoming frames by their 16-byte transaction id. Each id names one
//! *transaction*: a live execution of a [`routine::Routine`] state machine
//! shared by one or more peers.
//!
//! ```text
//! transport ─> Client::route ─> socket inbox ─> Transaction engine
//!                                                   │  Routine::next
//!                                ┌──────────────────┴───────────────┐
//!                                ↓                                  ↓
//!                        socket driver (peer A)             socket driver (peer B)
//!                                ↓                                  ↓
//!                           transport A                        transport B
//! ```
//!
//! # Concurrency discipline
//!
//! - Exactly one worker steps a routine; inputs from different peers
//!   interleave only at step boundaries.
//! - Exactly one worker drives each (peer, transaction) socket.
//! - Routine outputs are never dropped; user messages may be dropped under
//!   back-pressure with an in-band error to the offending client.
//! - Every channel has exactly one writer responsible for its closure: the
//!   router for client-message/client-close channels, the engine for
//!   routine-output channels, the sockets collectively for the engine's
//!   input queue.
//!
//! # Modules
//!
//! - [`hub`]: directory of online peers (public key -> client)
//! - [`routine`]: the state-machine contract every routine satisfies
//! - [`routines`]: the master dispatcher and the concrete routines
//! - [`client`]: per-connection frame router and socket table
//! - [`transport`]: the message-stream abstraction the router reads from
//! - [`env`]: time/randomness abstraction for deterministic testing

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod env;
pub mod hub;
pub mod routine;
pub mod routines;
mod socket;
mod transaction;
pub mod transport;
