//! Seeded Environment implementation for reproducible tests.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use lantern_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Test environment with a seeded RNG.
///
/// Given the same seed, generated transaction ids and challenges come out
/// identical on every run, which keeps failures reproducible. The default
/// seed is 0; use [`SeededEnv::with_seed`] to explore different sequences.
///
/// Clones share the underlying RNG state, so ids handed out across an
/// entire test scenario never collide.
#[derive(Clone)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SeededEnv {
    /// Environment with the default seed (0).
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Default for SeededEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SeededEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("rng lock poisoned").fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_bytes() {
        let sample = |seed: u64| {
            let env = SeededEnv::with_seed(seed);
            let mut bytes = [0u8; 64];
            env.random_bytes(&mut bytes);
            bytes
        };

        assert_eq!(sample(12345), sample(12345));
        assert_ne!(sample(12345), sample(54321));
    }

    #[test]
    fn clones_share_rng_state() {
        let env = SeededEnv::with_seed(7);
        let clone = env.clone();

        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        env.random_bytes(&mut a);
        clone.random_bytes(&mut b);

        // Sequential draws from the shared stream must differ.
        assert_ne!(a, b);
    }

    #[test]
    fn tx_ids_are_lowercase_alpha() {
        let env = SeededEnv::new();
        let id = env.random_tx_id();
        assert!(id.as_bytes().iter().all(u8::is_ascii_lowercase));
    }
}
