use std::collections::{BTreeMap, HashMap};

use datalink_frame::payload::{ActorExport, CameraSync, Lights, MorphExport, TemplateActor};
use datalink_frame::{ActorKind, ActorPose, Transform};
use tracing::debug;

use super::{Scene, SequenceObjects};
use crate::actor::Actor;
use crate::error::{LinkError, Result};
use crate::keyframes::Channel;

/// A character or prop held by [`MemoryScene`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryCharacter {
    pub name: String,
    pub kind: ActorKind,
    pub bones: Vec<String>,
    pub meshes: Vec<String>,
    pub shape_keys: Vec<String>,
    pub root: Transform,
    pub bone_pose: BTreeMap<String, Transform>,
    pub mesh_pose: BTreeMap<String, Transform>,
    pub weights: BTreeMap<String, f32>,
}

/// Mesh handle: owning character and mesh name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshHandle {
    pub character: String,
    pub mesh: String,
}

/// Scene adapter that keeps everything in memory.
///
/// Sampled poses move the root along +Z by one centimetre per frame so a
/// streamed sequence is distinguishable frame to frame.
#[derive(Debug, Clone)]
pub struct MemoryScene {
    characters: BTreeMap<String, MemoryCharacter>,
    actions: BTreeMap<String, BTreeMap<Channel, Vec<f32>>>,
    frame: i32,
    fps: f32,
    range: (i32, i32),
    lights: Option<Lights>,
    camera: Option<CameraSync>,
    notifications: Vec<String>,
    saves: usize,
    staged: HashMap<String, TemplateActor>,
    imported: Vec<ActorExport>,
    exported: Vec<(String, String)>,
    morphs: Vec<(String, String)>,
    rigified: Vec<String>,
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScene {
    pub fn new() -> Self {
        Self {
            characters: BTreeMap::new(),
            actions: BTreeMap::new(),
            frame: 1,
            fps: 60.0,
            range: (1, 250),
            lights: None,
            camera: None,
            notifications: Vec::new(),
            saves: 0,
            staged: HashMap::new(),
            imported: Vec::new(),
            exported: Vec::new(),
            morphs: Vec::new(),
            rigified: Vec::new(),
        }
    }

    /// Add a character built from name tables.
    pub fn add_character(&mut self, template: &TemplateActor) {
        let mut shape_keys = template.expressions.clone();
        shape_keys.extend(
            template
                .visemes
                .iter()
                .map(|v| crate::actor::remap_viseme(v).to_string()),
        );
        let character = MemoryCharacter {
            name: template.name.clone(),
            kind: template.kind,
            bones: template.bones.clone(),
            meshes: template.meshes.clone(),
            shape_keys,
            root: Transform::IDENTITY,
            ..MemoryCharacter::default()
        };
        self.characters.insert(template.name.clone(), character);
    }

    /// Make `path` importable as `template`. The template's link id stands in
    /// for whatever id the file itself carries.
    pub fn stage_import(&mut self, path: impl Into<String>, template: TemplateActor) {
        self.staged.insert(path.into(), template);
    }

    pub fn character(&self, name: &str) -> Option<&MemoryCharacter> {
        self.characters.get(name)
    }

    pub fn characters(&self) -> impl Iterator<Item = &MemoryCharacter> {
        self.characters.values()
    }

    pub fn keyframes(&self, action: &str, channel: &Channel) -> Option<&[f32]> {
        self.actions.get(action)?.get(channel).map(Vec::as_slice)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn lights(&self) -> Option<&Lights> {
        self.lights.as_ref()
    }

    pub fn set_camera(&mut self, camera: CameraSync) {
        self.camera = Some(camera);
    }

    pub fn notifications(&self) -> &[String] {
        &self.notifications
    }

    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn imported(&self) -> &[ActorExport] {
        &self.imported
    }

    pub fn exported(&self) -> &[(String, String)] {
        &self.exported
    }

    pub fn morphs(&self) -> &[(String, String)] {
        &self.morphs
    }

    pub fn rigified(&self) -> &[String] {
        &self.rigified
    }

    fn character_of(&self, actor: &Actor) -> Result<&MemoryCharacter> {
        self.characters
            .get(&actor.name)
            .ok_or_else(|| LinkError::Scene(format!("no scene object for '{}'", actor.name)))
    }
}

impl Scene for MemoryScene {
    type Rig = String;
    type Mesh = MeshHandle;
    type Action = String;

    fn actor_rig(&mut self, actor: &Actor) -> Option<String> {
        self.characters
            .get(&actor.name)
            .filter(|c| !c.bones.is_empty())
            .map(|c| c.name.clone())
    }

    fn actor_sequence_objects(&mut self, actor: &Actor) -> SequenceObjects<String, MeshHandle> {
        let rig = self.actor_rig(actor);
        let meshes = match self.characters.get(&actor.name) {
            Some(c) => actor
                .meshes
                .iter()
                .map(|m| {
                    c.meshes.contains(m).then(|| MeshHandle {
                        character: c.name.clone(),
                        mesh: m.clone(),
                    })
                })
                .collect(),
            None => Vec::new(),
        };
        SequenceObjects { rig, meshes }
    }

    fn apply_root_transform(&mut self, actor: &Actor, transform: &Transform) {
        if let Some(c) = self.characters.get_mut(&actor.name) {
            c.root = *transform;
        }
    }

    fn apply_bone_transform(&mut self, rig: &String, bone: &str, transform: &Transform) {
        if let Some(c) = self.characters.get_mut(rig) {
            if c.bones.iter().any(|b| b == bone) {
                c.bone_pose.insert(bone.to_string(), *transform);
            }
        }
    }

    fn apply_mesh_transform(&mut self, mesh: &MeshHandle, transform: &Transform) {
        if let Some(c) = self.characters.get_mut(&mesh.character) {
            c.mesh_pose.insert(mesh.mesh.clone(), *transform);
        }
    }

    fn apply_shape_key_weight(&mut self, mesh: &MeshHandle, key: &str, weight: f32) {
        if let Some(c) = self.characters.get_mut(&mesh.character) {
            if c.shape_keys.iter().any(|k| k == key) {
                c.weights.insert(key.to_string(), weight);
            }
        }
    }

    fn create_or_get_action(&mut self, _actor: &Actor, name: &str) -> Result<String> {
        self.actions.entry(name.to_string()).or_default();
        Ok(name.to_string())
    }

    fn write_keyframes(&mut self, action: &String, channel: &Channel, pairs: &[f32]) -> Result<()> {
        let curves = self
            .actions
            .get_mut(action)
            .ok_or_else(|| LinkError::Scene(format!("unknown action '{action}'")))?;
        curves.insert(channel.clone(), pairs.to_vec());
        Ok(())
    }

    fn import_character(&mut self, request: &ActorExport) -> Result<TemplateActor> {
        let mut template = self
            .staged
            .remove(&request.path)
            .unwrap_or_else(|| TemplateActor {
                name: request.name.clone(),
                kind: request.kind,
                link_id: request.link_id.clone(),
                bones: Vec::new(),
                meshes: Vec::new(),
                expressions: Vec::new(),
                visemes: Vec::new(),
                morphs: Vec::new(),
            });
        template.name = request.name.clone();
        template.kind = request.kind;

        self.add_character(&template);
        self.imported.push(request.clone());
        debug!(path = %request.path, name = %request.name, "imported character");
        Ok(template)
    }

    fn export_character(&mut self, actor: &Actor, path: &str) -> Result<()> {
        let name = self
            .characters
            .get(&actor.name)
            .map(|c| c.name.clone())
            .ok_or_else(|| LinkError::Encoding(format!("no scene object for '{}'", actor.name)))?;
        self.exported.push((name, path.to_string()));
        Ok(())
    }

    fn set_frame(&mut self, frame: i32) {
        self.frame = frame;
    }

    fn current_frame(&self) -> i32 {
        self.frame
    }

    fn fps(&self) -> f32 {
        self.fps
    }

    fn frame_range(&self) -> (i32, i32) {
        self.range
    }

    fn set_timeline(&mut self, fps: f32, start_frame: i32, end_frame: i32) {
        self.fps = fps;
        self.range = (start_frame, end_frame);
    }

    fn read_actor_pose(&mut self, actor: &Actor) -> Result<ActorPose> {
        let frame = self.frame;
        let c = self
            .characters
            .get(&actor.name)
            .ok_or_else(|| LinkError::Encoding(format!("no scene object for '{}'", actor.name)))?;

        let mut pose = ActorPose::new(actor.name.clone(), actor.kind, actor.link_id.clone());
        pose.root = c.root;
        pose.root.translation.z += frame as f32 * 0.01;
        pose.bones = actor
            .bones
            .iter()
            .map(|b| c.bone_pose.get(b).copied().unwrap_or(Transform::IDENTITY))
            .collect();
        pose.meshes = actor
            .meshes
            .iter()
            .map(|m| c.mesh_pose.get(m).copied().unwrap_or(Transform::IDENTITY))
            .collect();
        pose.expressions = actor
            .expressions
            .iter()
            .map(|k| c.weights.get(k).copied().unwrap_or(0.0))
            .collect();
        pose.visemes = actor
            .visemes
            .iter()
            .map(|k| c.weights.get(k).copied().unwrap_or(0.0))
            .collect();
        Ok(pose)
    }

    fn import_morph(&mut self, actor: &Actor, request: &MorphExport) -> Result<()> {
        self.character_of(actor)?;
        if let Some(c) = self.characters.get_mut(&actor.name) {
            if !c.shape_keys.contains(&request.morph_name) {
                c.shape_keys.push(request.morph_name.clone());
            }
        }
        self.morphs
            .push((actor.name.clone(), request.morph_name.clone()));
        Ok(())
    }

    fn rigify_actor(&mut self, actor: &Actor) -> Result<()> {
        let c = self.character_of(actor)?;
        if c.bones.is_empty() {
            return Err(LinkError::Scene(format!("'{}' has no rig", actor.name)));
        }
        self.rigified.push(actor.name.clone());
        Ok(())
    }

    fn save_scene(&mut self) -> Result<()> {
        self.saves += 1;
        Ok(())
    }

    fn apply_lights(&mut self, lights: &Lights) -> Result<()> {
        self.lights = Some(lights.clone());
        Ok(())
    }

    fn apply_camera(&mut self, camera: &CameraSync) -> Result<()> {
        self.camera = Some(camera.clone());
        Ok(())
    }

    fn camera_state(&self) -> Option<CameraSync> {
        self.camera.clone()
    }

    fn notify(&mut self, message: &str) {
        self.notifications.push(message.to_string());
    }
}
