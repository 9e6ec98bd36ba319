/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Fewer than eight bytes were available for a message header.
    #[error("malformed header ({len} bytes, need 8)")]
    MalformedHeader { len: usize },

    /// A length-prefixed string declares more bytes than remain.
    #[error("truncated string at offset {offset} (declared {declared} bytes, {remaining} remain)")]
    TruncatedString {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    /// A binary payload ended before a fixed-size field.
    #[error("truncated payload at offset {offset} (need {needed} bytes, {remaining} remain)")]
    TruncatedPayload {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// A JSON payload is malformed, has unknown fields or misses required ones.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer is not reading and the outbound queue is full.
    #[error("outbound backlog full ({pending} bytes queued, max {max})")]
    Backlogged { pending: usize, max: usize },

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for errors caused by one bad message rather than a broken stream.
    ///
    /// These drop the message; everything else tears the session down. An
    /// oversized message counts as local: the reader discards its body and
    /// the writer refuses it before queueing.
    pub fn is_message_local(&self) -> bool {
        matches!(
            self,
            FrameError::MalformedHeader { .. }
                | FrameError::TruncatedString { .. }
                | FrameError::TruncatedPayload { .. }
                | FrameError::InvalidUtf8 { .. }
                | FrameError::InvalidPayload(_)
                | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
