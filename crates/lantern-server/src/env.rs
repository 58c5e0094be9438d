//! Production environment: system clock and OS entropy.

use std::time::Instant;

use lantern_core::env::Environment;
use rand::RngCore;

/// [`Environment`] backed by the real clock and the OS entropy pool.
///
/// Challenges handed to clients for proof-of-possession must be
/// unpredictable, so this goes straight to the OS RNG rather than any
/// userspace generator.
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}
