//! Length-prefixed text-message transport over a byte stream.
//!
//! Wire format: a big-endian `u32` length followed by that many bytes of
//! UTF-8 message. This gives the core the "one logical stream of text
//! messages" it expects from any transport realisation; nothing in the
//! protocol depends on this particular framing.

use std::io;

use async_trait::async_trait;
use lantern_core::transport::{MessageSink, MessageStream};
use lantern_proto::{Frame, TxId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted message: id prefix plus the frame payload cap.
const MAX_MESSAGE_SIZE: usize = TxId::LEN + Frame::MAX_PAYLOAD_SIZE;

/// Reading half: yields one message per length-prefixed record.
pub struct LengthPrefixedStream<R> {
    inner: R,
}

impl<R> LengthPrefixedStream<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageStream for LengthPrefixedStream<R> {
    async fn next_message(&mut self) -> io::Result<Option<Vec<u8>>> {
        let len = match self.inner.read_u32().await {
            Ok(len) => len as usize,
            // EOF at a record boundary is a clean close.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };

        if len > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message of {len} bytes exceeds the {MAX_MESSAGE_SIZE} byte cap"),
            ));
        }

        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }
}

/// Writing half: one length-prefixed record per message.
pub struct LengthPrefixedSink<W> {
    inner: W,
}

impl<W> LengthPrefixedSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for LengthPrefixedSink<W> {
    async fn send_message(&mut self, msg: &[u8]) -> io::Result<()> {
        let len = u32::try_from(msg.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "message too large"))?;
        self.inner.write_u32(len).await?;
        self.inner.write_all(msg).await?;
        self.inner.flush().await
    }
}
