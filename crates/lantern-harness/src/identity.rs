//! Deterministic Ed25519 identities for tests.
//!
//! A [`TestIdentity`] can complete the whole `comeOnline`
//! proof-of-possession: it carries the base64 SPKI token the client would
//! present and can sign the server's challenge.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer, SigningKey};
use lantern_proto::{PublicKey, keys};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// A signing identity with a stable, seed-derived key pair.
pub struct TestIdentity {
    signing: SigningKey,
    /// The base64 SPKI token this identity registers under.
    pub token: String,
}

impl TestIdentity {
    /// Derive an identity from a seed. The same seed always yields the same
    /// key pair and token.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let signing = SigningKey::generate(&mut rng);
        let token = keys::spki_base64(&signing.verifying_key());
        Self { signing, token }
    }

    /// The identity's directory key.
    ///
    /// # Panics
    ///
    /// Never in practice: SPKI tokens are valid key tokens by construction.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::parse(&self.token).expect("spki token is a valid key token")
    }

    /// Sign `message` and return the signature as base64, the way a client
    /// answers the `signThis` challenge.
    #[must_use]
    pub fn sign_base64(&self, message: &str) -> String {
        BASE64.encode(self.signing.sign(message.as_bytes()).to_bytes())
    }
}
