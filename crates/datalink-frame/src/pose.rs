//! Binary pose frame codec (POSE_FRAME and SEQUENCE_FRAME payloads).
//!
//! ```text
//! u32 actor_count, i32 frame
//! per actor:
//!   string name, string type, string link_id
//!   transform root
//!   u32 bone_count,  transform * bone_count
//!   u32 mesh_count,  transform * mesh_count
//!   u32 expr_count,  f32 * expr_count
//!   u32 viseme_count, f32 * viseme_count
//! ```
//!
//! Bone, mesh and shape-key names are not repeated per frame; they come from
//! the TEMPLATE exchanged beforehand and are matched by index.

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::payload::ActorKind;
use crate::wire::{put_string, put_transform, PayloadReader, Transform, TRANSFORM_SIZE};

/// Bytes in an actor with empty strings and no bones, meshes or weights:
/// three string lengths, the root transform and four counts.
const MIN_ACTOR_SIZE: usize = 3 * 4 + TRANSFORM_SIZE + 4 * 4;

/// One actor's sampled pose in a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActorPose {
    pub name: String,
    pub kind: ActorKind,
    pub link_id: String,
    pub root: Transform,
    pub bones: Vec<Transform>,
    pub meshes: Vec<Transform>,
    pub expressions: Vec<f32>,
    pub visemes: Vec<f32>,
}

impl ActorPose {
    pub fn new(name: impl Into<String>, kind: ActorKind, link_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            link_id: link_id.into(),
            root: Transform::IDENTITY,
            ..Self::default()
        }
    }

    fn encoded_len(&self) -> usize {
        12 + self.name.len()
            + self.kind.as_str().len()
            + self.link_id.len()
            + TRANSFORM_SIZE
            + 16
            + TRANSFORM_SIZE * (self.bones.len() + self.meshes.len())
            + 4 * (self.expressions.len() + self.visemes.len())
    }
}

/// All actors' poses for one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseFrame {
    pub frame: i32,
    pub actors: Vec<ActorPose>,
}

impl PoseFrame {
    pub fn new(frame: i32) -> Self {
        Self {
            frame,
            actors: Vec::new(),
        }
    }
}

/// Encode a pose frame payload.
pub fn encode_pose_frame(frame: &PoseFrame) -> Vec<u8> {
    let size = 8 + frame.actors.iter().map(ActorPose::encoded_len).sum::<usize>();
    let mut buf = BytesMut::with_capacity(size);

    buf.put_u32(frame.actors.len() as u32);
    buf.put_i32(frame.frame);

    for actor in &frame.actors {
        put_string(&mut buf, &actor.name);
        put_string(&mut buf, actor.kind.as_str());
        put_string(&mut buf, &actor.link_id);
        put_transform(&mut buf, &actor.root);

        buf.put_u32(actor.bones.len() as u32);
        for bone in &actor.bones {
            put_transform(&mut buf, bone);
        }

        buf.put_u32(actor.meshes.len() as u32);
        for mesh in &actor.meshes {
            put_transform(&mut buf, mesh);
        }

        buf.put_u32(actor.expressions.len() as u32);
        for weight in &actor.expressions {
            buf.put_f32(*weight);
        }

        buf.put_u32(actor.visemes.len() as u32);
        for weight in &actor.visemes {
            buf.put_f32(*weight);
        }
    }

    buf.to_vec()
}

/// Decode a pose frame payload.
///
/// Never reads past `payload`; a short or corrupt payload yields
/// `TruncatedPayload`/`TruncatedString`.
pub fn decode_pose_frame(payload: &[u8]) -> Result<PoseFrame> {
    let mut reader = PayloadReader::new(payload);

    let actor_count = reader.count(MIN_ACTOR_SIZE)?;
    let frame = reader.i32()?;

    let mut actors = Vec::with_capacity(actor_count.min(64));
    for _ in 0..actor_count {
        let name = reader.string()?;
        let kind = ActorKind::from_wire(&reader.string()?);
        let link_id = reader.string()?;
        let root = reader.transform()?;

        let bone_count = reader.count(TRANSFORM_SIZE)?;
        let bones = (0..bone_count)
            .map(|_| reader.transform())
            .collect::<Result<Vec<_>>>()?;

        let mesh_count = reader.count(TRANSFORM_SIZE)?;
        let meshes = (0..mesh_count)
            .map(|_| reader.transform())
            .collect::<Result<Vec<_>>>()?;

        let expressions = reader.f32_list()?;
        let visemes = reader.f32_list()?;

        actors.push(ActorPose {
            name,
            kind,
            link_id,
            root,
            bones,
            meshes,
            expressions,
            visemes,
        });
    }

    Ok(PoseFrame { frame, actors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::wire::{Quat, Vec3};

    fn sample_frame() -> PoseFrame {
        let mut avatar = ActorPose::new("Camila", ActorKind::Avatar, "LINK-0001");
        avatar.root = Transform::new(Vec3::new(0.0, 0.0, 0.0), Quat::IDENTITY, Vec3::ONE);
        avatar.bones = vec![
            Transform::new(Vec3::new(0.0, 0.0, 1.0), Quat::IDENTITY, Vec3::ONE),
            Transform::new(
                Vec3::new(0.0, 0.1, 0.0),
                Quat::new(0.0, 0.0, 0.38268343, 0.9238795),
                Vec3::ONE,
            ),
        ];
        avatar.expressions = vec![0.0, 0.25, 1.0];
        avatar.visemes = vec![0.5];

        let mut prop = ActorPose::new("Chair", ActorKind::Prop, "LINK-0002");
        prop.meshes = vec![Transform::IDENTITY];

        PoseFrame {
            frame: 42,
            actors: vec![avatar, prop],
        }
    }

    #[test]
    fn pose_frame_roundtrip() {
        let frame = sample_frame();
        let bytes = encode_pose_frame(&frame);
        let decoded = decode_pose_frame(&bytes).unwrap();

        assert_eq!(decoded.frame, 42);
        assert_eq!(decoded.actors.len(), 2);
        let avatar = &decoded.actors[0];
        assert_eq!(avatar.name, "Camila");
        assert_eq!(avatar.kind, ActorKind::Avatar);
        assert_eq!(avatar.link_id, "LINK-0001");
        assert_eq!(avatar.bones.len(), 2);
        assert!((avatar.bones[0].translation.z - 1.0).abs() < 1e-6);
        assert_eq!(avatar.bones[1].rotation, frame.actors[0].bones[1].rotation);
        assert_eq!(avatar.expressions, vec![0.0, 0.25, 1.0]);
        assert_eq!(avatar.visemes, vec![0.5]);

        let prop = &decoded.actors[1];
        assert_eq!(prop.kind, ActorKind::Prop);
        assert_eq!(prop.meshes.len(), 1);
        assert!(prop.bones.is_empty());
    }

    #[test]
    fn encoded_length_matches_layout() {
        let frame = sample_frame();
        let bytes = encode_pose_frame(&frame);
        let expected = 8 + frame.actors.iter().map(ActorPose::encoded_len).sum::<usize>();
        assert_eq!(bytes.len(), expected);
    }

    #[test]
    fn empty_frame_is_eight_bytes() {
        let bytes = encode_pose_frame(&PoseFrame::new(-3));
        assert_eq!(bytes, vec![0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFD]);
        assert_eq!(decode_pose_frame(&bytes).unwrap().frame, -3);
    }

    #[test]
    fn every_truncation_is_reported_not_panicking() {
        let bytes = encode_pose_frame(&sample_frame());
        for cut in 0..bytes.len() {
            let err = decode_pose_frame(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(
                    err,
                    FrameError::TruncatedPayload { .. } | FrameError::TruncatedString { .. }
                ),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn actor_count_is_checked_against_minimal_actor_size() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_i32(12);
        buf.put_bytes(0, MIN_ACTOR_SIZE);
        let frame = decode_pose_frame(&buf).unwrap();
        assert_eq!(frame.actors.len(), 1);
        assert!(frame.actors[0].bones.is_empty());

        buf[..4].copy_from_slice(&2u32.to_be_bytes());
        let err = decode_pose_frame(&buf).unwrap_err();
        assert!(matches!(
            err,
            FrameError::TruncatedPayload {
                offset: 0,
                needed: 136,
                remaining: 72
            }
        ));
    }

    #[test]
    fn unknown_actor_type_decodes_as_none() {
        let mut frame = PoseFrame::new(1);
        frame.actors.push(ActorPose::new("Light", ActorKind::None, "L"));
        let mut bytes = encode_pose_frame(&frame);
        // Patch "NONE" to "LAMP" in place: the type string follows the name.
        let type_at = 8 + 4 + "Light".len() + 4;
        bytes[type_at..type_at + 4].copy_from_slice(b"LAMP");
        let decoded = decode_pose_frame(&bytes).unwrap();
        assert_eq!(decoded.actors[0].kind, ActorKind::None);
    }
}
