use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::debug;

use crate::codec::{FrameConfig, FrameDecoder, Message};
use crate::error::{FrameError, Result};

const READ_CHUNK: usize = 16 * 1024;

/// Outcome of one read attempt.
enum Fill {
    Data,
    Pending,
    Eof,
}

/// Pulls complete messages off a (usually non-blocking) stream.
///
/// Oversized messages are reported once and skipped; messages with opcodes
/// outside the catalog are passed through and counted.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    decoder: FrameDecoder,
    unknown_opcodes: u64,
}

impl<T: Read> MessageReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, &FrameConfig::default())
    }

    pub fn with_config(inner: T, config: &FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            decoder: FrameDecoder::new(config.max_payload_size),
            unknown_opcodes: 0,
        }
    }

    /// Next message if one can be produced with at most one read.
    ///
    /// `Ok(None)` when the stream would block before a message completes.
    /// EOF is [`FrameError::ConnectionClosed`].
    pub fn poll_message(&mut self) -> Result<Option<Message>> {
        if let Some(message) = self.next_buffered()? {
            return Ok(Some(message));
        }
        match self.fill()? {
            Fill::Data => self.next_buffered(),
            Fill::Pending => Ok(None),
            Fill::Eof => Err(FrameError::ConnectionClosed),
        }
    }

    /// Read until a whole message arrives. Meant for blocking streams; on a
    /// non-blocking one a stall surfaces as an `Io(WouldBlock)` error.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.next_buffered()? {
                return Ok(message);
            }
            match self.fill()? {
                Fill::Data => {}
                Fill::Pending => return Err(FrameError::Io(ErrorKind::WouldBlock.into())),
                Fill::Eof => return Err(FrameError::ConnectionClosed),
            }
        }
    }

    /// Bytes received but not yet returned as messages.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Messages seen so far whose opcode this build does not know.
    pub fn unknown_opcodes(&self) -> u64 {
        self.unknown_opcodes
    }

    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.decoder.set_max_payload(max_payload_size);
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn next_buffered(&mut self) -> Result<Option<Message>> {
        let message = self.decoder.decode(&mut self.buf)?;
        if let Some(message) = &message {
            if message.op().is_none() {
                self.unknown_opcodes += 1;
                debug!(opcode = message.opcode, "message with unknown opcode");
            }
        }
        Ok(message)
    }

    fn fill(&mut self) -> Result<Fill> {
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK, 0);
        let outcome = loop {
            match self.inner.read(&mut self.buf[start..]) {
                Ok(0) => break Ok((0, Fill::Eof)),
                Ok(n) => break Ok((n, Fill::Data)),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    break Ok((0, Fill::Pending))
                }
                Err(err) => break Err(FrameError::Io(err)),
            }
        };
        match outcome {
            Ok((n, fill)) => {
                self.buf.truncate(start + n);
                Ok(fill)
            }
            Err(err) => {
                self.buf.truncate(start);
                Err(err)
            }
        }
    }
}
