//! Environment abstraction for deterministic testing.
//!
//! The engine and the routines never reach for system entropy or the system
//! clock directly; they go through an [`Environment`] handle. The production
//! runtime backs it with the OS RNG, the test harness with a seeded ChaCha20
//! stream so that generated transaction ids and challenges are reproducible.
//!
//! Timers are deliberately *not* part of this trait: socket deadlines are
//! armed with `tokio::time`, which the test suites virtualise with paused
//! time.
//!
//! # Invariants
//!
//! - `now()` never goes backwards within one process.
//! - Production implementations use cryptographically secure entropy
//!   (challenges are signed, so predictability would break the
//!   proof-of-possession).

use std::time::Instant;

use lantern_proto::TxId;

/// Source of time and randomness.
///
/// Object-safe so that the engine can hold it as `Arc<dyn Environment>`.
pub trait Environment: Send + Sync {
    /// Current time. Monotonic within one process.
    fn now(&self) -> Instant;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generate a random transaction id from the lowercase alphabet.
    ///
    /// Used when the engine attaches a peer that did not initiate the
    /// transaction and needs a fresh socket id on that peer's connection.
    fn random_tx_id(&self) -> TxId {
        let mut bytes = [0u8; TxId::LEN];
        self.random_bytes(&mut bytes);
        for b in &mut bytes {
            *b = b'a' + *b % 26;
        }
        TxId::new(bytes)
    }
}
