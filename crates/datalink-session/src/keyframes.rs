//! Per-actor keyframe caches filled while a sequence is received.
//!
//! Every channel holds a dense `Vec<f32>` of `2 * frame_count` entries laid
//! out as `(frame, value)` pairs, so a finished curve can be handed to the
//! scene in one call.

use std::fmt;

use datalink_frame::ActorPose;
use tracing::debug;

use crate::actor::{Actor, ActorId};
use crate::error::Result;
use crate::scene::Scene;

/// Components per bone: location xyz, rotation xyzw, scale xyz.
const BONE_COMPONENTS: usize = 10;

/// One animated scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Location { bone: String, axis: usize },
    /// Quaternion, axis 0..4 is x, y, z, w.
    Rotation { bone: String, axis: usize },
    Scale { bone: String, axis: usize },
    ShapeKey { key: String },
}

impl Channel {
    fn for_bone(bone: &str, component: usize) -> Self {
        let bone = bone.to_string();
        match component {
            0..=2 => Channel::Location {
                bone,
                axis: component,
            },
            3..=6 => Channel::Rotation {
                bone,
                axis: component - 3,
            },
            _ => Channel::Scale {
                bone,
                axis: component - 7,
            },
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Location { bone, axis } => write!(f, "{bone}.location[{axis}]"),
            Channel::Rotation { bone, axis } => write!(f, "{bone}.rotation_quaternion[{axis}]"),
            Channel::Scale { bone, axis } => write!(f, "{bone}.scale[{axis}]"),
            Channel::ShapeKey { key } => write!(f, "key_blocks[{key}].value"),
        }
    }
}

#[derive(Debug, Clone)]
struct Curve {
    channel: Channel,
    samples: Vec<f32>,
}

/// Samples recorded for one actor over one sequence.
#[derive(Debug, Clone)]
pub struct ActorKeyframes {
    actor: ActorId,
    start_frame: i32,
    bone_count: usize,
    expression_count: usize,
    viseme_count: usize,
    curves: Vec<Curve>,
    recorded: Vec<bool>,
}

impl ActorKeyframes {
    /// Allocate every channel for the inclusive range `start_frame..=end_frame`.
    pub fn new(actor: &Actor, start_frame: i32, end_frame: i32) -> Self {
        let frame_count = (end_frame - start_frame + 1).max(0) as usize;

        let blank = |channel: Channel| {
            let mut samples = vec![0.0; 2 * frame_count];
            for (i, pair) in samples.chunks_exact_mut(2).enumerate() {
                pair[0] = (start_frame + i as i32) as f32;
            }
            Curve { channel, samples }
        };

        let mut curves = Vec::with_capacity(
            actor.bones.len() * BONE_COMPONENTS + actor.expressions.len() + actor.visemes.len(),
        );
        for bone in &actor.bones {
            for component in 0..BONE_COMPONENTS {
                curves.push(blank(Channel::for_bone(bone, component)));
            }
        }
        for key in actor.expressions.iter().chain(&actor.visemes) {
            curves.push(blank(Channel::ShapeKey { key: key.clone() }));
        }

        Self {
            actor: actor.id,
            start_frame,
            bone_count: actor.bones.len(),
            expression_count: actor.expressions.len(),
            viseme_count: actor.visemes.len(),
            curves,
            recorded: vec![false; frame_count],
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn frame_count(&self) -> usize {
        self.recorded.len()
    }

    pub fn recorded_frames(&self) -> usize {
        self.recorded.iter().filter(|r| **r).count()
    }

    pub fn channel_count(&self) -> usize {
        self.curves.len()
    }

    /// The dense `(frame, value)` array for `channel`.
    pub fn curve(&self, channel: &Channel) -> Option<&[f32]> {
        self.curves
            .iter()
            .find(|c| &c.channel == channel)
            .map(|c| c.samples.as_slice())
    }

    /// Store one frame. Frames outside the range are ignored.
    pub fn record(&mut self, frame: i32, pose: &ActorPose) -> bool {
        let Some(index) = usize::try_from(frame - self.start_frame)
            .ok()
            .filter(|i| *i < self.recorded.len())
        else {
            debug!(frame, actor = %self.actor, "frame outside sequence range");
            return false;
        };
        let slot = 2 * index + 1;

        for (bone, t) in pose.bones.iter().take(self.bone_count).enumerate() {
            let values = [
                t.translation.x,
                t.translation.y,
                t.translation.z,
                t.rotation.x,
                t.rotation.y,
                t.rotation.z,
                t.rotation.w,
                t.scale.x,
                t.scale.y,
                t.scale.z,
            ];
            for (component, value) in values.into_iter().enumerate() {
                self.curves[bone * BONE_COMPONENTS + component].samples[slot] = value;
            }
        }

        let shape_base = self.bone_count * BONE_COMPONENTS;
        for (i, weight) in pose.expressions.iter().take(self.expression_count).enumerate() {
            self.curves[shape_base + i].samples[slot] = *weight;
        }
        let viseme_base = shape_base + self.expression_count;
        for (i, weight) in pose.visemes.iter().take(self.viseme_count).enumerate() {
            self.curves[viseme_base + i].samples[slot] = *weight;
        }

        self.recorded[index] = true;
        true
    }

    /// Write every curve into `action`. Returns the number of curves written.
    ///
    /// After an abort only the frames actually received are written.
    pub fn flush<S: Scene>(&self, scene: &mut S, action: &S::Action) -> Result<usize> {
        if self.recorded_frames() == 0 {
            return Ok(0);
        }
        let complete = self.recorded.iter().all(|r| *r);

        for curve in &self.curves {
            if complete {
                scene.write_keyframes(action, &curve.channel, &curve.samples)?;
            } else {
                let pairs: Vec<f32> = curve
                    .samples
                    .chunks_exact(2)
                    .zip(&self.recorded)
                    .filter(|(_, recorded)| **recorded)
                    .flat_map(|(pair, _)| pair.iter().copied())
                    .collect();
                scene.write_keyframes(action, &curve.channel, &pairs)?;
            }
        }
        Ok(self.curves.len())
    }
}

#[cfg(test)]
mod tests {
    use datalink_frame::{ActorKind, Quat, Transform, Vec3};

    use super::*;
    use crate::actor::ActorDirectory;
    use crate::scene::MemoryScene;

    fn actor() -> (ActorDirectory, ActorId) {
        let mut dir = ActorDirectory::new();
        let id = dir.insert("Kevin", ActorKind::Avatar, "LINK-K");
        let a = dir.get_mut(id).unwrap();
        a.bones = vec!["root".into(), "hip".into()];
        a.expressions = vec!["Smile".into()];
        a.visemes = vec!["V_Open".into()];
        (dir, id)
    }

    fn pose(x: f32, smile: f32) -> ActorPose {
        let mut pose = ActorPose::new("Kevin", ActorKind::Avatar, "LINK-K");
        pose.bones = vec![
            Transform::new(Vec3::new(x, 0.0, 0.0), Quat::IDENTITY, Vec3::ONE),
            Transform::IDENTITY,
        ];
        pose.expressions = vec![smile];
        pose.visemes = vec![0.5];
        pose
    }

    #[test]
    fn dense_layout_length_and_frames() {
        let (dir, id) = actor();
        let cache = ActorKeyframes::new(dir.get(id).unwrap(), 10, 14);

        assert_eq!(cache.frame_count(), 5);
        assert_eq!(cache.channel_count(), 2 * 10 + 2);
        let curve = cache
            .curve(&Channel::Location {
                bone: "hip".into(),
                axis: 0,
            })
            .unwrap();
        assert_eq!(curve.len(), 10);
        assert_eq!(curve[0], 10.0);
        assert_eq!(curve[8], 14.0);
    }

    #[test]
    fn record_fills_pairs() {
        let (dir, id) = actor();
        let mut cache = ActorKeyframes::new(dir.get(id).unwrap(), 10, 14);

        assert!(cache.record(12, &pose(1.5, 0.25)));
        assert!(!cache.record(15, &pose(9.0, 9.0)));
        assert!(!cache.record(9, &pose(9.0, 9.0)));

        let loc = cache
            .curve(&Channel::Location {
                bone: "root".into(),
                axis: 0,
            })
            .unwrap();
        assert_eq!(&loc[4..6], &[12.0, 1.5]);
        let w = cache
            .curve(&Channel::Rotation {
                bone: "root".into(),
                axis: 3,
            })
            .unwrap();
        assert_eq!(w[5], 1.0);
        let smile = cache.curve(&Channel::ShapeKey { key: "Smile".into() }).unwrap();
        assert_eq!(smile[5], 0.25);
        let open = cache.curve(&Channel::ShapeKey { key: "V_Open".into() }).unwrap();
        assert_eq!(open[5], 0.5);
        assert_eq!(cache.recorded_frames(), 1);
    }

    #[test]
    fn flush_complete_and_partial() {
        let (dir, id) = actor();
        let a = dir.get(id).unwrap();
        let mut scene = MemoryScene::new();
        let action = scene.create_or_get_action(a, "Kevin|seq").unwrap();

        let mut cache = ActorKeyframes::new(a, 0, 2);
        assert_eq!(cache.flush(&mut scene, &action).unwrap(), 0);

        cache.record(0, &pose(1.0, 0.0));
        cache.record(2, &pose(3.0, 1.0));
        assert_eq!(cache.flush(&mut scene, &action).unwrap(), 22);

        let smile = scene
            .keyframes(&action, &Channel::ShapeKey { key: "Smile".into() })
            .unwrap();
        assert_eq!(smile, &[0.0, 0.0, 2.0, 1.0]);

        cache.record(1, &pose(2.0, 0.5));
        cache.flush(&mut scene, &action).unwrap();
        let smile = scene
            .keyframes(&action, &Channel::ShapeKey { key: "Smile".into() })
            .unwrap();
        assert_eq!(smile.len(), 6);
    }

    #[test]
    fn short_pose_leaves_missing_channels_untouched() {
        let (dir, id) = actor();
        let mut cache = ActorKeyframes::new(dir.get(id).unwrap(), 0, 0);
        let mut p = pose(1.0, 1.0);
        p.bones.truncate(1);
        p.visemes.clear();
        assert!(cache.record(0, &p));
        let hip = cache
            .curve(&Channel::Scale {
                bone: "hip".into(),
                axis: 0,
            })
            .unwrap();
        assert_eq!(hip, &[0.0, 0.0]);
    }

    #[test]
    fn channel_display() {
        let c = Channel::Rotation {
            bone: "hip".into(),
            axis: 3,
        };
        assert_eq!(c.to_string(), "hip.rotation_quaternion[3]");
    }
}
