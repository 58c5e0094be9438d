//! Transport frame: a 16-byte transaction id followed by a UTF-8 payload.
//!
//! Every message on a Lantern connection is one text frame. The leading
//! [`TxId::LEN`] bytes select the transaction socket the payload belongs to;
//! the remainder is the payload (typically JSON, possibly empty). Frames
//! shorter than the id prefix are invalid and are dropped by the connection
//! router without terminating the connection.

use std::fmt;

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};

/// Transaction id: the opaque 16-byte prefix of every frame.
///
/// Chosen by the initiating side, unique per connection (not globally).
/// Compared byte-exact.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId([u8; Self::LEN]);

impl TxId {
    /// Length of a transaction id on the wire.
    pub const LEN: usize = 16;

    /// Wrap raw id bytes.
    #[must_use]
    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// The raw id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl From<[u8; TxId::LEN]> for TxId {
    fn from(bytes: [u8; TxId::LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ids are usually printable tokens; fall back to hex when not.
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.bytes().all(|b| b.is_ascii_graphic()) => write!(f, "TxId({s})"),
            _ => {
                write!(f, "TxId(0x")?;
                for b in self.0 {
                    write!(f, "{b:02x}")?;
                }
                write!(f, ")")
            },
        }
    }
}

/// One transport frame: transaction id plus UTF-8 payload.
///
/// # Invariants
///
/// - The payload is valid UTF-8 (enforced by construction and by
///   [`Frame::decode`]).
/// - The payload does not exceed [`Frame::MAX_PAYLOAD_SIZE`]. Oversized
///   frames are rejected during [`Frame::encode`] and [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Transaction id (first 16 bytes on the wire)
    pub id: TxId,
    /// UTF-8 payload (everything after the id; may be empty)
    pub payload: String,
}

impl Frame {
    /// Maximum payload size in bytes.
    ///
    /// Signalling payloads are small (SDP bodies top out in the tens of
    /// kilobytes); the cap exists to bound per-frame allocation.
    pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

    /// Create a frame from an id and payload.
    #[must_use]
    pub fn new(id: TxId, payload: impl Into<String>) -> Self {
        Self { id, payload: payload.into() }
    }

    /// Encode the frame into a buffer by byte-concatenation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    /// [`Frame::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        dst.put_slice(self.id.as_bytes());
        dst.put_slice(self.payload.as_bytes());

        Ok(())
    }

    /// Encode the frame into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Frame::encode`].
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(TxId::LEN + self.payload.len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode a frame from raw message bytes.
    ///
    /// A message of exactly [`TxId::LEN`] bytes decodes to a frame with an
    /// empty payload.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if fewer than 16 bytes
    /// - [`ProtocolError::PayloadTooLarge`] if the payload exceeds the cap
    /// - [`ProtocolError::InvalidUtf8`] if the payload is not UTF-8
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TxId::LEN {
            return Err(ProtocolError::FrameTooShort { expected: TxId::LEN, actual: bytes.len() });
        }

        let payload_bytes = &bytes[TxId::LEN..];
        if payload_bytes.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_bytes.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        let mut id = [0u8; TxId::LEN];
        id.copy_from_slice(&bytes[..TxId::LEN]);

        let payload =
            std::str::from_utf8(payload_bytes).map_err(|_| ProtocolError::InvalidUtf8)?;

        Ok(Self { id: TxId::new(id), payload: payload.to_string() })
    }
}
