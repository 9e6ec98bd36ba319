use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::opcode::{opcode_name, OpCode};

/// Message header: opcode (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size: 64 MiB. Sequence frames for several
/// characters with full face rigs stay far below this.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw wire opcode. May be a value this build does not know.
    pub opcode: u32,
    pub payload: Bytes,
}

impl Message {
    pub fn new(opcode: impl Into<u32>, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: opcode.into(),
            payload: payload.into(),
        }
    }

    pub fn empty(opcode: impl Into<u32>) -> Self {
        Self::new(opcode, Bytes::new())
    }

    /// The known opcode, if any.
    pub fn op(&self) -> Option<OpCode> {
        OpCode::from_u32(self.opcode)
    }

    /// Opcode name for logs.
    pub fn name(&self) -> &'static str {
        opcode_name(self.opcode)
    }

    /// Header plus payload.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// The fixed-size prefix of every message.
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ Opcode       │ Length       │ Payload         │
/// │ (4B BE u32)  │ (4B BE u32)  │ (Length bytes)  │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub opcode: u32,
    pub length: u32,
}

impl Header {
    /// Read a header from the front of `src`.
    pub fn parse(src: &[u8]) -> Result<Self> {
        let Some(mut raw) = src.get(..HEADER_SIZE) else {
            return Err(FrameError::MalformedHeader { len: src.len() });
        };
        Ok(Self {
            opcode: raw.get_u32(),
            length: raw.get_u32(),
        })
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.opcode.to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn payload_len(self) -> usize {
        self.length as usize
    }

    /// Reject lengths above `max` before any payload byte is buffered.
    fn check_len(self, max: usize) -> Result<usize> {
        let len = self.payload_len();
        if len > max {
            return Err(FrameError::PayloadTooLarge { size: len, max });
        }
        Ok(len)
    }
}

pub fn encode_header(opcode: u32, payload_len: u32) -> [u8; HEADER_SIZE] {
    Header {
        opcode,
        length: payload_len,
    }
    .to_bytes()
}

/// Decode a message header into `(opcode, length)`.
pub fn decode_header(src: &[u8]) -> Result<(u32, u32)> {
    Header::parse(src).map(|h| (h.opcode, h.length))
}

/// Append a complete message (header + payload) to `dst`.
pub fn encode_message(opcode: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&Header { opcode, length }.to_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode one message from the front of `src` without keeping state.
///
/// `Ok(None)` while the message is incomplete. An oversized length is an
/// error and leaves `src` untouched; use [`FrameDecoder`] to skip past it.
pub fn decode_message(src: &mut BytesMut, max_payload: usize) -> Result<Option<Message>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = Header::parse(src)?;
    let len = header.check_len(max_payload)?;

    let total = HEADER_SIZE + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    src.advance(HEADER_SIZE);
    Ok(Some(Message {
        opcode: header.opcode,
        payload: src.split_to(len).freeze(),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    Payload { opcode: u32, len: usize },
    /// Discarding the body of a rejected oversized message.
    Skip { opcode: u32, remaining: usize },
}

/// Incremental stream decoder.
///
/// Unlike [`decode_message`], a header is parsed once, and an oversized
/// message is reported once and then discarded as its bytes arrive, so the
/// stream stays in sync and the next message decodes normally.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    state: DecodeState,
    max_payload: usize,
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_payload,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    /// True while the body of a rejected message is being discarded.
    pub fn is_skipping(&self) -> bool {
        matches!(self.state, DecodeState::Skip { .. })
    }

    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = Header::parse(src)?;
                    src.advance(HEADER_SIZE);
                    match header.check_len(self.max_payload) {
                        Ok(len) => {
                            self.state = DecodeState::Payload {
                                opcode: header.opcode,
                                len,
                            }
                        }
                        Err(err) => {
                            self.state = DecodeState::Skip {
                                opcode: header.opcode,
                                remaining: header.payload_len(),
                            };
                            return Err(err);
                        }
                    }
                }
                DecodeState::Payload { opcode, len } => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    self.state = DecodeState::Header;
                    return Ok(Some(Message {
                        opcode,
                        payload: src.split_to(len).freeze(),
                    }));
                }
                DecodeState::Skip { opcode, remaining } => {
                    let n = remaining.min(src.len());
                    src.advance(n);
                    if n < remaining {
                        self.state = DecodeState::Skip {
                            opcode,
                            remaining: remaining - n,
                        };
                        return Ok(None);
                    }
                    tracing::debug!(opcode = opcode_name(opcode), "oversized message discarded");
                    self.state = DecodeState::Header;
                }
            }
        }
    }
}

/// Limits shared by [`MessageReader`](crate::MessageReader) and
/// [`MessageWriter`](crate::MessageWriter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Largest payload accepted in either direction. Default: 64 MiB.
    pub max_payload_size: usize,
    /// Outbound bytes allowed to wait for a slow peer before the writer
    /// refuses more. Default: two maximum-size messages.
    pub max_backlog: usize,
}

impl FrameConfig {
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            max_payload_size,
            max_backlog: max_payload_size.saturating_add(HEADER_SIZE).saturating_mul(2),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }
}
