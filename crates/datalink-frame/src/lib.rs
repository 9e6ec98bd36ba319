//! Message framing and payload codecs for the character data-link.
//!
//! Every message on the wire is an 8-byte big-endian header followed by the
//! payload:
//! - a 4-byte opcode (see [`OpCode`])
//! - a 4-byte payload length
//!
//! Control and metadata payloads are UTF-8 JSON ([`payload`]). Pose data is a
//! packed binary layout ([`pose`]) built from length-prefixed strings and
//! 40-byte transforms ([`wire`]).

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod opcode;
pub mod payload;
pub mod pose;
pub mod reader;
pub mod wire;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::LinkCodec;
pub use codec::{
    decode_header, decode_message, encode_header, encode_message, FrameConfig, FrameDecoder,
    Header, Message, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use opcode::{opcode_name, OpCode};
pub use payload::{decode_json, encode_json, ActorKind};
pub use pose::{decode_pose_frame, encode_pose_frame, ActorPose, PoseFrame};
pub use reader::MessageReader;
pub use wire::{decode_string, decode_transform, encode_string, encode_transform, Quat, Transform, Vec3};
pub use writer::MessageWriter;
