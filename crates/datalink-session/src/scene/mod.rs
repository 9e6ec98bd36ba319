//! Host scene adapter.
//!
//! The session never touches a scene graph directly. Everything it reads or
//! writes goes through [`Scene`], implemented by the host application (or by
//! [`MemoryScene`] for tests and the headless CLI). Calls are synchronous and
//! made only from the thread that drives [`Session::tick`](crate::Session::tick).

mod memory;

pub use memory::MemoryScene;

use datalink_frame::payload::{ActorExport, CameraSync, Lights, MorphExport, TemplateActor};
use datalink_frame::{ActorPose, Transform};

use crate::actor::Actor;
use crate::error::Result;
use crate::keyframes::Channel;

/// Rig and meshes that receive an actor's streamed data.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceObjects<R, M> {
    pub rig: Option<R>,
    /// One slot per entry of [`Actor::meshes`], `None` where the scene has
    /// no such mesh.
    pub meshes: Vec<Option<M>>,
}

pub trait Scene {
    /// Handle to an actor's armature.
    type Rig: Clone;
    /// Handle to a mesh carrying shape keys.
    type Mesh: Clone;
    /// Handle to an animation action receiving keyframes.
    type Action: Clone;

    fn actor_rig(&mut self, actor: &Actor) -> Option<Self::Rig>;

    fn actor_sequence_objects(&mut self, actor: &Actor) -> SequenceObjects<Self::Rig, Self::Mesh>;

    /// Place the actor's root object. Props without an armature have one too.
    fn apply_root_transform(&mut self, actor: &Actor, transform: &Transform);

    fn apply_bone_transform(&mut self, rig: &Self::Rig, bone: &str, transform: &Transform);

    fn apply_mesh_transform(&mut self, mesh: &Self::Mesh, transform: &Transform);

    /// Set a shape-key weight. Meshes without the key ignore it.
    fn apply_shape_key_weight(&mut self, mesh: &Self::Mesh, key: &str, weight: f32);

    fn create_or_get_action(&mut self, actor: &Actor, name: &str) -> Result<Self::Action>;

    /// Replace the curve for `channel` with dense `(frame, value)` pairs.
    fn write_keyframes(&mut self, action: &Self::Action, channel: &Channel, pairs: &[f32]) -> Result<()>;

    /// Import an exported character or prop. Returns its name tables.
    fn import_character(&mut self, request: &ActorExport) -> Result<TemplateActor>;

    fn export_character(&mut self, actor: &Actor, path: &str) -> Result<()>;

    fn set_frame(&mut self, frame: i32);

    fn current_frame(&self) -> i32;

    fn fps(&self) -> f32;

    /// Inclusive start and end frame of the timeline.
    fn frame_range(&self) -> (i32, i32);

    fn set_timeline(&mut self, fps: f32, start_frame: i32, end_frame: i32);

    /// Sample an actor at the current frame. Bone order follows `actor.bones`.
    fn read_actor_pose(&mut self, actor: &Actor) -> Result<ActorPose>;

    fn import_morph(&mut self, actor: &Actor, request: &MorphExport) -> Result<()>;

    fn rigify_actor(&mut self, actor: &Actor) -> Result<()>;

    fn save_scene(&mut self) -> Result<()>;

    fn apply_lights(&mut self, lights: &Lights) -> Result<()>;

    fn apply_camera(&mut self, camera: &CameraSync) -> Result<()>;

    fn camera_state(&self) -> Option<CameraSync>;

    /// Surface a status message to the user.
    fn notify(&mut self, message: &str);
}
