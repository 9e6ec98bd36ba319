//! Opcode catalog.
//!
//! Numeric values are fixed by the peer application and must never change.
//! Numbers not listed here are carried as raw `u32` and ignored by the router.

use std::fmt;

/// Known message opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpCode {
    Hello = 1,
    Ping = 2,
    Stop = 10,
    Disconnect = 11,
    Notify = 50,
    Save = 60,
    Morph = 90,
    MorphUpdate = 91,
    Character = 100,
    CharacterUpdate = 101,
    Prop = 102,
    PropUpdate = 103,
    Rigify = 110,
    Template = 200,
    Pose = 210,
    PoseFrame = 211,
    Sequence = 220,
    SequenceFrame = 221,
    SequenceEnd = 222,
    SequenceAck = 223,
    Lights = 230,
    CameraSync = 231,
    FrameSync = 232,
}

impl OpCode {
    /// Every known opcode, in catalog order.
    pub const ALL: [OpCode; 23] = [
        OpCode::Hello,
        OpCode::Ping,
        OpCode::Stop,
        OpCode::Disconnect,
        OpCode::Notify,
        OpCode::Save,
        OpCode::Morph,
        OpCode::MorphUpdate,
        OpCode::Character,
        OpCode::CharacterUpdate,
        OpCode::Prop,
        OpCode::PropUpdate,
        OpCode::Rigify,
        OpCode::Template,
        OpCode::Pose,
        OpCode::PoseFrame,
        OpCode::Sequence,
        OpCode::SequenceFrame,
        OpCode::SequenceEnd,
        OpCode::SequenceAck,
        OpCode::Lights,
        OpCode::CameraSync,
        OpCode::FrameSync,
    ];

    /// Look up a wire value. Returns `None` for opcodes this build does not know.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_u32() == value)
    }

    /// Wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Human-readable name for logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Hello => "HELLO",
            OpCode::Ping => "PING",
            OpCode::Stop => "STOP",
            OpCode::Disconnect => "DISCONNECT",
            OpCode::Notify => "NOTIFY",
            OpCode::Save => "SAVE",
            OpCode::Morph => "MORPH",
            OpCode::MorphUpdate => "MORPH_UPDATE",
            OpCode::Character => "CHARACTER",
            OpCode::CharacterUpdate => "CHARACTER_UPDATE",
            OpCode::Prop => "PROP",
            OpCode::PropUpdate => "PROP_UPDATE",
            OpCode::Rigify => "RIGIFY",
            OpCode::Template => "TEMPLATE",
            OpCode::Pose => "POSE",
            OpCode::PoseFrame => "POSE_FRAME",
            OpCode::Sequence => "SEQUENCE",
            OpCode::SequenceFrame => "SEQUENCE_FRAME",
            OpCode::SequenceEnd => "SEQUENCE_END",
            OpCode::SequenceAck => "SEQUENCE_ACK",
            OpCode::Lights => "LIGHTS",
            OpCode::CameraSync => "CAMERA_SYNC",
            OpCode::FrameSync => "FRAME_SYNC",
        }
    }
}

impl From<OpCode> for u32 {
    fn from(op: OpCode) -> Self {
        op.as_u32()
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns a human-readable name for any wire opcode.
pub fn opcode_name(value: u32) -> &'static str {
    OpCode::from_u32(value).map_or("UNKNOWN", OpCode::name)
}
