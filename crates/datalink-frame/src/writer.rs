use std::io::{ErrorKind, Write};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use crate::codec::{encode_message, FrameConfig, Message};
use crate::error::{FrameError, Result};

/// Queues encoded messages and writes them as the stream accepts bytes.
///
/// Nothing here waits on the stream: [`poll_flush`](Self::poll_flush) writes
/// what the socket takes and keeps the rest for the next call. A peer that
/// stops reading shows up as a growing [`pending`](Self::pending) count, then
/// as [`FrameError::Backlogged`] once `max_backlog` is reached.
pub struct MessageWriter<T> {
    inner: T,
    queue: BytesMut,
    max_payload: usize,
    max_backlog: usize,
    /// Set while bytes are queued; moves forward whenever some get written.
    stalled_since: Option<Instant>,
}

impl<T: Write> MessageWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, &FrameConfig::default())
    }

    pub fn with_config(inner: T, config: &FrameConfig) -> Self {
        Self {
            inner,
            queue: BytesMut::new(),
            max_payload: config.max_payload_size,
            max_backlog: config.max_backlog,
            stalled_since: None,
        }
    }

    /// Append `message` to the outbound queue without writing.
    pub fn enqueue(&mut self, message: &Message) -> Result<()> {
        if message.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: message.payload.len(),
                max: self.max_payload,
            });
        }
        let pending = self.queue.len();
        if pending > 0 && pending + message.wire_size() > self.max_backlog {
            return Err(FrameError::Backlogged {
                pending,
                max: self.max_backlog,
            });
        }
        encode_message(message.opcode, &message.payload, &mut self.queue)
    }

    /// Write as much of the queue as the stream takes right now.
    ///
    /// Returns `true` once the queue is empty.
    pub fn poll_flush(&mut self) -> Result<bool> {
        if self.queue.is_empty() {
            return Ok(true);
        }
        let before = self.queue.len();
        while !self.queue.is_empty() {
            match self.inner.write(&self.queue) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.queue.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        if self.queue.is_empty() {
            self.stalled_since = None;
            match self.inner.flush() {
                Ok(()) => {}
                Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
            return Ok(true);
        }
        if self.queue.len() < before || self.stalled_since.is_none() {
            self.stalled_since = Some(Instant::now());
        }
        Ok(false)
    }

    /// Enqueue and make one flush attempt.
    pub fn write_message(&mut self, message: &Message) -> Result<bool> {
        self.enqueue(message)?;
        self.poll_flush()
    }

    /// Keep flushing until the queue drains or `limit` passes.
    ///
    /// For shutdown paths that want a last message out; the scheduler itself
    /// only ever calls [`poll_flush`](Self::poll_flush).
    pub fn flush_within(&mut self, limit: Duration) -> Result<bool> {
        let deadline = Instant::now() + limit;
        loop {
            if self.poll_flush()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Queued bytes not yet accepted by the stream.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// How long queued bytes have waited without any progress.
    pub fn stalled_for(&self, now: Instant) -> Option<Duration> {
        self.stalled_since.map(|since| now.saturating_duration_since(since))
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
}
