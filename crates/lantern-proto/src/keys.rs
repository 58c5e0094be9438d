//! Peer identity: public-key tokens and the Ed25519 material behind them.
//!
//! A peer is identified by an opaque printable token - the exact base64 SPKI
//! string it presented during `comeOnline`. The same token is what other
//! clients put in the `key` field of peer-addressed routines, and what the
//! directory is keyed by. Equality is byte-exact; the server never
//! re-encodes a token.
//!
//! [`IdentityKey`] is the decoded form used only where a signature has to be
//! checked.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Longest accepted public-key token, in bytes.
pub const MAX_TOKEN_LEN: usize = 128;

/// DER prefix of an Ed25519 SubjectPublicKeyInfo structure.
///
/// SPKI for Ed25519 is fully fixed apart from the trailing 32 key bytes:
/// `SEQUENCE { SEQUENCE { OID 1.3.101.112 } BIT STRING { key } }`.
const ED25519_SPKI_PREFIX: [u8; 12] =
    [0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];

/// Length of an Ed25519 SPKI structure in bytes.
const ED25519_SPKI_LEN: usize = ED25519_SPKI_PREFIX.len() + 32;

/// Opaque public-key token identifying a peer.
///
/// A valid token is 1..=[`MAX_TOKEN_LEN`] bytes drawn from the base64
/// alphabet (`A-Z a-z 0-9 + / =`). Validation stops there: whether the token
/// decodes to real key material is only checked where it matters
/// (`comeOnline`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(String);

impl PublicKey {
    /// Validate and wrap a token.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidKeyToken`] if the token is empty,
    /// longer than [`MAX_TOKEN_LEN`], or contains bytes outside the base64
    /// alphabet.
    pub fn parse(token: &str) -> Result<Self> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(ProtocolError::InvalidKeyToken);
        }
        if !token.bytes().all(is_base64_byte) {
            return Err(ProtocolError::InvalidKeyToken);
        }
        Ok(Self(token.to_string()))
    }

    /// The token as presented by the client.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.0)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

/// A peer's decoded Ed25519 verifying key, paired with the token it came
/// from.
#[derive(Clone)]
pub struct IdentityKey {
    token: PublicKey,
    key: VerifyingKey,
}

impl IdentityKey {
    /// Decode a base64 SPKI token into verifying-key material.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidKeyToken`] if the token fails token
    ///   validation or is not valid base64
    /// - [`ProtocolError::NotEd25519`] if the decoded structure is not an
    ///   Ed25519 SPKI or the key bytes are not a valid curve point
    pub fn from_spki_base64(token: &str) -> Result<Self> {
        let token = PublicKey::parse(token)?;

        let der = BASE64.decode(token.as_str()).map_err(|_| ProtocolError::InvalidKeyToken)?;
        if der.len() != ED25519_SPKI_LEN || der[..ED25519_SPKI_PREFIX.len()] != ED25519_SPKI_PREFIX
        {
            return Err(ProtocolError::NotEd25519);
        }

        let mut raw = [0u8; 32];
        raw.copy_from_slice(&der[ED25519_SPKI_PREFIX.len()..]);
        let key = VerifyingKey::from_bytes(&raw).map_err(|_| ProtocolError::NotEd25519)?;

        Ok(Self { token, key })
    }

    /// The token this key material was decoded from.
    #[must_use]
    pub fn token(&self) -> &PublicKey {
        &self.token
    }

    /// Verify a base64-encoded Ed25519 signature over `message`.
    ///
    /// Returns `Ok(true)` when the signature is valid, `Ok(false)` when it
    /// decodes but does not verify.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadSignature`] if the signature is not
    /// base64 or has the wrong length.
    pub fn verify_base64(&self, message: &[u8], signature: &str) -> Result<bool> {
        let sig_bytes = BASE64.decode(signature).map_err(|_| ProtocolError::BadSignature)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| ProtocolError::BadSignature)?;
        Ok(self.key.verify(message, &signature).is_ok())
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey").field("token", &self.token).finish_non_exhaustive()
    }
}

/// Encode a raw Ed25519 verifying key as a base64 SPKI token.
///
/// This is the inverse of [`IdentityKey::from_spki_base64`]; servers never
/// need it, but clients and tests do.
#[must_use]
pub fn spki_base64(key: &VerifyingKey) -> String {
    let mut der = Vec::with_capacity(ED25519_SPKI_LEN);
    der.extend_from_slice(&ED25519_SPKI_PREFIX);
    der.extend_from_slice(key.as_bytes());
    BASE64.encode(der)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn token_round_trip() {
        let pk = PublicKey::parse("abcDEF123+/=").unwrap();
        assert_eq!(pk.as_str(), "abcDEF123+/=");
    }

    #[test]
    fn reject_bad_tokens() {
        assert!(PublicKey::parse("").is_err());
        assert!(PublicKey::parse("has space").is_err());
        assert!(PublicKey::parse("non-ascii-\u{00e9}").is_err());
        assert!(PublicKey::parse(&"a".repeat(MAX_TOKEN_LEN + 1)).is_err());
    }

    #[test]
    fn spki_round_trip_and_verify() {
        let signing = SigningKey::generate(&mut OsRng);
        let token = spki_base64(&signing.verifying_key());

        let identity = IdentityKey::from_spki_base64(&token).unwrap();
        assert_eq!(identity.token().as_str(), token);

        let message = b"challenge text";
        let signature = BASE64.encode(signing.sign(message).to_bytes());
        assert!(identity.verify_base64(message, &signature).unwrap());

        // Tampered message must not verify.
        assert!(!identity.verify_base64(b"other text", &signature).unwrap());
    }

    #[test]
    fn reject_non_spki_key() {
        // Valid base64, wrong structure.
        let bogus = BASE64.encode([0u8; 44]);
        assert!(matches!(IdentityKey::from_spki_base64(&bogus), Err(ProtocolError::NotEd25519)));
    }

    #[test]
    fn reject_garbage_signature() {
        let signing = SigningKey::generate(&mut OsRng);
        let identity = IdentityKey::from_spki_base64(&spki_base64(&signing.verifying_key())).unwrap();
        assert_eq!(identity.verify_base64(b"m", "!!not-base64!!"), Err(ProtocolError::BadSignature));
        assert_eq!(
            identity.verify_base64(b"m", &BASE64.encode([0u8; 10])),
            Err(ProtocolError::BadSignature)
        );
    }
}
