//! Structured JSON payloads.
//!
//! One struct per opcode. Every struct rejects unknown fields and requires its
//! mandatory ones, so a malformed message fails with
//! [`FrameError::InvalidPayload`] instead of being half-applied.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::wire::{Quat, Transform, Vec3, UNIT_SCALE};

/// Serialize a payload struct to UTF-8 JSON bytes.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Parse and validate a JSON payload.
pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Kind of a linked actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorKind {
    Avatar,
    Prop,
    #[default]
    #[serde(other)]
    None,
}

impl ActorKind {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            ActorKind::Avatar => "AVATAR",
            ActorKind::Prop => "PROP",
            ActorKind::None => "NONE",
        }
    }

    /// Parse a wire spelling; anything unrecognised is `None`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "AVATAR" => ActorKind::Avatar,
            "PROP" => ActorKind::Prop,
            _ => ActorKind::None,
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HELLO: application identity exchanged on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hello {
    pub application: String,
    pub version: [u32; 3],
    pub path: String,
    pub exe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

/// NOTIFY: a status line for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Notify {
    pub message: String,
}

/// Identity triple used to name an actor in meta payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorRef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub link_id: String,
}

impl ActorRef {
    pub fn new(name: impl Into<String>, kind: ActorKind, link_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            link_id: link_id.into(),
        }
    }
}

/// One actor in a TEMPLATE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateActor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub link_id: String,
    pub bones: Vec<String>,
    pub meshes: Vec<String>,
    #[serde(default)]
    pub expressions: Vec<String>,
    #[serde(default)]
    pub visemes: Vec<String>,
    #[serde(default)]
    pub morphs: Vec<String>,
}

/// TEMPLATE: name tables for the actors about to be posed or streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Template {
    pub actors: Vec<TemplateActor>,
}

/// POSE and SEQUENCE meta: timing and the actors involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceMeta {
    pub fps: f32,
    pub start_time: f32,
    pub end_time: f32,
    pub start_frame: i32,
    pub end_frame: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_frame: Option<i32>,
    pub actors: Vec<ActorRef>,
}

impl SequenceMeta {
    /// Number of frames in the inclusive range, never negative.
    pub fn frame_count(&self) -> usize {
        (self.end_frame - self.start_frame + 1).max(0) as usize
    }
}

/// SEQUENCE_ACK: receiver progress report driving the sender's burst size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceAck {
    pub frame: i32,
    pub rate: f32,
}

/// SEQUENCE_END: last frame sent, and whether the stream was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceEnd {
    pub frame: i32,
    #[serde(default)]
    pub aborted: bool,
}

/// CHARACTER / PROP: the peer exported an actor to `path` for import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorExport {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub link_id: String,
}

/// CHARACTER_UPDATE / PROP_UPDATE: the peer renamed or re-identified an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorUpdate {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub link_id: String,
    pub new_name: String,
    pub new_link_id: String,
}

/// MORPH / MORPH_UPDATE: a morph target exported for an existing actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MorphExport {
    pub path: String,
    pub name: String,
    pub link_id: String,
    pub morph_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

/// Transform as it appears in JSON payloads: peer units, arrays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonTransform {
    pub location: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl JsonTransform {
    pub fn to_transform(&self) -> Transform {
        let [x, y, z] = self.location;
        let [qx, qy, qz, qw] = self.rotation;
        let [sx, sy, sz] = self.scale;
        Transform::new(
            Vec3::new(x, y, z).scale(1.0 / UNIT_SCALE),
            Quat::new(qx, qy, qz, qw),
            Vec3::new(sx, sy, sz),
        )
    }

    pub fn from_transform(t: &Transform) -> Self {
        Self {
            location: t.translation.scale(UNIT_SCALE).to_array(),
            rotation: t.rotation.to_array(),
            scale: t.scale.to_array(),
        }
    }
}

/// Light categories understood by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LightKind {
    Point,
    Spot,
    Dir,
    Area,
}

/// One light in a LIGHTS payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LightState {
    pub link_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LightKind,
    pub transform: JsonTransform,
    pub color: [f32; 3],
    pub multiplier: f32,
    #[serde(default)]
    pub range: f32,
    #[serde(default)]
    pub angle: f32,
    #[serde(default)]
    pub falloff: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cast_shadow: bool,
}

fn default_true() -> bool {
    true
}

/// LIGHTS: the peer's complete light rig. Lights not listed are removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lights {
    pub lights: Vec<LightState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_color: Option<[f32; 3]>,
}

/// View camera state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraState {
    pub link_id: String,
    pub name: String,
    pub transform: JsonTransform,
    pub focal_length: f32,
}

/// CAMERA_SYNC: view camera plus the orbit pivot (peer units).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraSync {
    pub view_camera: CameraState,
    pub pivot: [f32; 3],
}

/// FRAME_SYNC: timeline position and range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameSync {
    pub fps: f32,
    pub start_frame: i32,
    pub end_frame: i32,
    pub current_frame: i32,
}
