//! Transport abstraction: one bidirectional stream of text messages.
//!
//! The core only needs two operations from a transport - read one message,
//! write one message - so that is all the traits expose. A production
//! endpoint implements them over a framed TCP connection; the test harness
//! implements them over in-process channels. Nothing in the engine depends
//! on the realisation.
//!
//! Message boundaries are the transport's job; splitting a message into
//! `<id><payload>` is [`lantern_proto::Frame`]'s.

use std::io;

use async_trait::async_trait;

/// Receiving half of a message transport.
#[async_trait]
pub trait MessageStream: Send {
    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` on transport failure; the caller tears the
    /// connection down either way.
    async fn next_message(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Sending half of a message transport.
///
/// Implementations do not need to be internally synchronised; the connection
/// router serialises writes behind a lock so frame bytes never interleave.
#[async_trait]
pub trait MessageSink: Send {
    /// Write one complete message.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the message cannot be delivered.
    async fn send_message(&mut self, msg: &[u8]) -> io::Result<()>;
}
