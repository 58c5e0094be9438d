//! Wire types for the Lantern signalling protocol.
//!
//! Everything a Lantern endpoint puts on the wire lives here:
//!
//! - [`Frame`]: the `<16-byte id><utf-8 payload>` transport frame
//! - [`wire`]: the JSON message bodies exchanged inside routines, parsed
//!   strictly (unknown properties are schema violations)
//! - [`keys`]: the public-key token that identifies a peer, and the Ed25519
//!   key material behind it
//!
//! This crate contains no I/O and no protocol *logic* - it only defines what
//! the bytes mean. The state machines that interpret these messages live in
//! `lantern-core`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod errors;
pub mod frame;
pub mod keys;
pub mod wire;

pub use errors::ProtocolError;
pub use frame::{Frame, TxId};
pub use keys::{IdentityKey, PublicKey};
