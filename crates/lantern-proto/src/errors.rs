//! Error types for wire parsing and validation.
//!
//! All errors are structured, testable, and carry enough context to be
//! converted into an in-band error frame at the layer that owns the socket.

use thiserror::Error;

/// Protocol-level errors raised while decoding frames, message bodies, or
/// key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is shorter than the 16-byte transaction id prefix.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Payload exceeds the maximum allowed size.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Frame payload is not valid UTF-8.
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,

    /// Message body failed strict JSON validation for the current state.
    #[error("malformed message: {0}")]
    BadMessage(String),

    /// Public-key token is not a printable token of the accepted length.
    #[error("invalid public key token")]
    InvalidKeyToken,

    /// Key material decoded, but is not an Ed25519 SPKI public key.
    #[error("public key is not ed25519")]
    NotEd25519,

    /// Signature is not valid base64 or has the wrong length.
    #[error("invalid signature encoding")]
    BadSignature,
}

/// Convenient Result type alias for wire operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
