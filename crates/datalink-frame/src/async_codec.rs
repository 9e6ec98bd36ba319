//! `tokio_util::codec` adapter for hosts that drive the link from an async runtime.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_message, FrameDecoder, Message, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// Message codec for `FramedRead`/`FramedWrite`.
#[derive(Debug, Clone)]
pub struct LinkCodec {
    decoder: FrameDecoder,
}

impl LinkCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_payload_size),
        }
    }

    pub fn max_payload_size(&self) -> usize {
        self.decoder.max_payload()
    }
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for LinkCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        self.decoder.decode(src)
    }
}

impl Encoder<Message> for LinkCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let max = self.max_payload_size();
        if item.payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: item.payload.len(),
                max,
            });
        }
        encode_message(item.opcode, &item.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    #[test]
    fn encoder_output_feeds_decoder() {
        let mut codec = LinkCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new(OpCode::Notify, "hi"), &mut buf)
            .unwrap();
        codec
            .encode(Message::empty(OpCode::Ping), &mut buf)
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.op(), Some(OpCode::Notify));
        assert_eq!(first.payload.as_ref(), b"hi");
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.op(), Some(OpCode::Ping));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decoder_waits_for_complete_message() {
        let mut codec = LinkCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 50, 0, 0, 0, 4, b'a'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"bcd");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.payload.as_ref(), b"abcd");
    }

    #[test]
    fn limits_apply_both_ways() {
        let mut codec = LinkCodec::new(2);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Message::new(OpCode::Notify, "toolong"), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 7, max: 2 }));

        let mut src = BytesMut::from(&[0u8, 0, 0, 50, 0, 0, 0, 3, b'x', b'y', b'z'][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(FrameError::PayloadTooLarge { size: 3, max: 2 })
        ));
        // The rejected body is skipped; the codec is ready for the next header.
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(src.is_empty());
    }
}
