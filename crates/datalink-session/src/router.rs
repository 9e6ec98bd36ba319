//! Inbound message dispatch.
//!
//! One handler per opcode. Handlers decode the payload, resolve actors and
//! call into the scene or the sequence controller. A handler failure never
//! reaches the caller: it is logged and the message is dropped. Lifecycle
//! changes (handshake, stop) are returned as a [`Dispatch`] for the session
//! to act on.

use std::collections::VecDeque;
use std::time::Instant;

use datalink_frame::payload::{
    ActorExport, ActorRef, ActorUpdate, CameraSync, FrameSync, Hello, Lights, MorphExport, Notify,
    SequenceAck, SequenceEnd, SequenceMeta, Template,
};
use datalink_frame::{decode_json, decode_pose_frame, encode_json, ActorPose, Message, OpCode, PoseFrame};
use tracing::{debug, info, warn};

use crate::actor::{Actor, ActorDirectory, ActorId};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::handshake::{accept_hello, RemoteIdentity};
use crate::import::PendingImport;
use crate::scene::Scene;
use crate::sequence::SequenceController;

/// What the session should do after a message was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Continue,
    /// Stop draining for this tick (import queued or a frame to preview).
    Yield,
    /// A valid HELLO arrived.
    Handshake(RemoteIdentity),
    /// Peer STOP: tear down and forget the remain-connected intent.
    Stop,
    /// Peer DISCONNECT: tear down, keep the intent.
    Disconnect,
}

/// Session state the handlers may touch, borrowed for one dispatch.
pub struct RouterContext<'a, S: Scene> {
    pub config: &'a LinkConfig,
    pub scene: &'a mut S,
    pub directory: &'a mut ActorDirectory,
    pub sequence: &'a mut SequenceController,
    pub imports: &'a mut VecDeque<PendingImport>,
    /// Replies queued by handlers, flushed by the session.
    pub outbox: &'a mut Vec<Message>,
    /// Set when a handler changes the user-visible status.
    pub status: &'a mut Option<String>,
    pub connected: bool,
    pub now: Instant,
}

/// Route one inbound message.
pub fn dispatch<S: Scene>(ctx: &mut RouterContext<'_, S>, message: &Message) -> Dispatch {
    let Some(op) = message.op() else {
        debug!(opcode = message.opcode, "ignoring unknown opcode");
        return Dispatch::Continue;
    };

    if !ctx.connected && !matches!(op, OpCode::Hello | OpCode::Stop | OpCode::Disconnect) {
        warn!(opcode = %op, "dropping message received before HELLO");
        return Dispatch::Continue;
    }

    match handle(ctx, op, message) {
        Ok(next) => next,
        Err(err @ LinkError::ActorNotFound { .. }) => {
            info!(opcode = %op, error = %err, "skipping message for unknown actor");
            Dispatch::Continue
        }
        Err(err) => {
            warn!(opcode = %op, error = %err, "dropping message");
            Dispatch::Continue
        }
    }
}

fn handle<S: Scene>(ctx: &mut RouterContext<'_, S>, op: OpCode, message: &Message) -> Result<Dispatch> {
    let payload = message.payload.as_ref();
    match op {
        OpCode::Hello => {
            let hello: Hello = decode_json(payload)?;
            let remote = accept_hello(hello, ctx.config)?;
            Ok(Dispatch::Handshake(remote))
        }
        OpCode::Ping => Ok(Dispatch::Continue),
        OpCode::Stop => Ok(Dispatch::Stop),
        OpCode::Disconnect => Ok(Dispatch::Disconnect),
        OpCode::Notify => {
            let notify: Notify = decode_json(payload)?;
            info!(message = %notify.message, "peer notification");
            ctx.scene.notify(&notify.message);
            *ctx.status = Some(notify.message);
            Ok(Dispatch::Continue)
        }
        OpCode::Save => {
            ctx.scene.save_scene()?;
            Ok(Dispatch::Continue)
        }
        OpCode::Character | OpCode::Prop => {
            let request: ActorExport = decode_json(payload)?;
            debug!(name = %request.name, path = %request.path, "queueing actor import");
            ctx.imports.push_back(PendingImport::Actor(request));
            Ok(Dispatch::Yield)
        }
        OpCode::CharacterUpdate | OpCode::PropUpdate => {
            let update: ActorUpdate = decode_json(payload)?;
            let id = ctx.directory.require(&update.link_id, &update.name, update.kind)?;
            ctx.directory.rename(id, &update.new_name, &update.new_link_id)?;
            Ok(Dispatch::Continue)
        }
        OpCode::Morph | OpCode::MorphUpdate => {
            let request: MorphExport = decode_json(payload)?;
            debug!(name = %request.name, morph = %request.morph_name, "queueing morph import");
            ctx.imports.push_back(PendingImport::Morph(request));
            Ok(Dispatch::Yield)
        }
        OpCode::Rigify => {
            let target: ActorRef = decode_json(payload)?;
            let id = ctx.directory.require(&target.link_id, &target.name, target.kind)?;
            let actor = lookup(ctx.directory, id)?;
            ctx.scene.rigify_actor(actor)?;
            info!(actor = %actor.name, "actor rigified");
            Ok(Dispatch::Continue)
        }
        OpCode::Template => {
            let template: Template = decode_json(payload)?;
            for entry in &template.actors {
                ctx.directory.apply_template(entry);
            }
            debug!(actors = template.actors.len(), "template applied");
            Ok(Dispatch::Continue)
        }
        OpCode::Pose => {
            let meta: SequenceMeta = decode_json(payload)?;
            ctx.sequence.begin_pose(&meta);
            ctx.scene
                .set_frame(meta.current_frame.unwrap_or(meta.start_frame));
            Ok(Dispatch::Continue)
        }
        OpCode::PoseFrame => {
            let frame = decode_pose_frame(payload)?;
            apply_frame(ctx.scene, ctx.directory, &frame);
            Ok(Dispatch::Continue)
        }
        OpCode::Sequence => {
            let meta: SequenceMeta = decode_json(payload)?;
            ctx.sequence.begin_receive(&meta, ctx.directory, ctx.scene)?;
            Ok(Dispatch::Continue)
        }
        OpCode::SequenceFrame => {
            let frame = decode_pose_frame(payload)?;
            ctx.scene.set_frame(frame.frame);
            let resolved = apply_frame(ctx.scene, ctx.directory, &frame);
            if let Some(ack) = ctx.sequence.record(&frame, &resolved, ctx.now) {
                ctx.outbox
                    .push(Message::new(OpCode::SequenceAck, encode_json(&ack)?));
            }
            Ok(Dispatch::Yield)
        }
        OpCode::SequenceEnd => {
            let end: SequenceEnd = decode_json(payload)?;
            if end.aborted {
                info!(frame = end.frame, "peer aborted sequence");
            }
            ctx.sequence.finish_receive(ctx.scene, ctx.directory)?;
            Ok(Dispatch::Continue)
        }
        OpCode::SequenceAck => {
            let ack: SequenceAck = decode_json(payload)?;
            ctx.sequence.on_ack(ack);
            Ok(Dispatch::Continue)
        }
        OpCode::Lights => {
            let lights: Lights = decode_json(payload)?;
            ctx.scene.apply_lights(&lights)?;
            Ok(Dispatch::Continue)
        }
        OpCode::CameraSync => {
            let camera: CameraSync = decode_json(payload)?;
            ctx.scene.apply_camera(&camera)?;
            Ok(Dispatch::Continue)
        }
        OpCode::FrameSync => {
            let sync: FrameSync = decode_json(payload)?;
            ctx.scene
                .set_timeline(sync.fps, sync.start_frame, sync.end_frame);
            ctx.scene.set_frame(sync.current_frame);
            Ok(Dispatch::Continue)
        }
    }
}

fn lookup(directory: &ActorDirectory, id: ActorId) -> Result<&Actor> {
    directory
        .get(id)
        .ok_or_else(|| LinkError::Scene(format!("actor {id} vanished")))
}

/// Apply every resolvable actor in `frame`. Returns the local id per entry.
pub fn apply_frame<S: Scene>(
    scene: &mut S,
    directory: &mut ActorDirectory,
    frame: &PoseFrame,
) -> Vec<Option<ActorId>> {
    let mut resolved = Vec::with_capacity(frame.actors.len());
    for pose in &frame.actors {
        let id = directory.resolve(&pose.link_id, Some(&pose.name), Some(pose.kind));
        match id.and_then(|id| directory.get(id)) {
            Some(actor) => apply_pose(scene, actor, pose),
            None => debug!(
                actor = %pose.name,
                link_id = %pose.link_id,
                frame = frame.frame,
                "no local actor for pose, skipped"
            ),
        }
        resolved.push(id);
    }
    resolved
}

/// Push one actor's pose into its root, rig and meshes. Entries beyond the
/// actor's name tables are ignored.
pub fn apply_pose<S: Scene>(scene: &mut S, actor: &Actor, pose: &ActorPose) {
    let objects = scene.actor_sequence_objects(actor);

    scene.apply_root_transform(actor, &pose.root);
    if let Some(rig) = &objects.rig {
        for (bone, transform) in actor.bones.iter().zip(&pose.bones) {
            scene.apply_bone_transform(rig, bone, transform);
        }
    }

    // Slot i always pairs with pose.meshes[i], even when earlier meshes are missing.
    for (mesh, transform) in objects.meshes.iter().zip(&pose.meshes) {
        if let Some(mesh) = mesh {
            scene.apply_mesh_transform(mesh, transform);
        }
    }

    for mesh in objects.meshes.iter().flatten() {
        for (key, weight) in actor.expressions.iter().zip(&pose.expressions) {
            scene.apply_shape_key_weight(mesh, key, *weight);
        }
        for (key, weight) in actor.visemes.iter().zip(&pose.visemes) {
            scene.apply_shape_key_weight(mesh, key, *weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use datalink_frame::payload::TemplateActor;
    use datalink_frame::{decode_json, encode_pose_frame, ActorKind, Quat, Transform, Vec3};

    use super::*;
    use crate::scene::MemoryScene;

    struct Harness {
        config: LinkConfig,
        scene: MemoryScene,
        directory: ActorDirectory,
        sequence: SequenceController,
        imports: VecDeque<PendingImport>,
        outbox: Vec<Message>,
        status: Option<String>,
        connected: bool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                config: LinkConfig::default(),
                scene: MemoryScene::new(),
                directory: ActorDirectory::new(),
                sequence: SequenceController::new(true, 5),
                imports: VecDeque::new(),
                outbox: Vec::new(),
                status: None,
                connected: true,
            }
        }

        fn with_kevin() -> Self {
            let mut h = Self::new();
            let template = kevin();
            h.scene.add_character(&template);
            h.directory.apply_template(&template);
            h
        }

        fn dispatch(&mut self, message: Message) -> Dispatch {
            let mut ctx = RouterContext {
                config: &self.config,
                scene: &mut self.scene,
                directory: &mut self.directory,
                sequence: &mut self.sequence,
                imports: &mut self.imports,
                outbox: &mut self.outbox,
                status: &mut self.status,
                connected: self.connected,
                now: Instant::now(),
            };
            dispatch(&mut ctx, &message)
        }
    }

    fn kevin() -> TemplateActor {
        TemplateActor {
            name: "Kevin".into(),
            kind: ActorKind::Avatar,
            link_id: "LINK-K".into(),
            bones: vec!["root".into(), "hip".into()],
            meshes: vec!["Body".into()],
            expressions: vec!["Smile".into()],
            visemes: vec!["Open".into()],
            morphs: vec![],
        }
    }

    fn json<T: serde::Serialize>(op: OpCode, value: &T) -> Message {
        Message::new(op, encode_json(value).unwrap())
    }

    fn hello() -> Message {
        json(
            OpCode::Hello,
            &Hello {
                application: "iClone".into(),
                version: [8, 5, 0],
                path: String::new(),
                exe: String::new(),
                plugin: None,
            },
        )
    }

    fn moved() -> Transform {
        Transform::new(Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY, Vec3::ONE)
    }

    fn pose(name: &str, link_id: &str) -> ActorPose {
        let mut pose = ActorPose::new(name, ActorKind::Avatar, link_id);
        pose.bones = vec![Transform::IDENTITY, moved()];
        pose.meshes = vec![Transform::IDENTITY];
        pose.expressions = vec![0.5];
        pose.visemes = vec![0.25];
        pose
    }

    #[test]
    fn messages_before_hello_are_dropped() {
        let mut h = Harness::with_kevin();
        h.connected = false;

        let notify = json(OpCode::Notify, &Notify { message: "hi".into() });
        assert_eq!(h.dispatch(notify), Dispatch::Continue);
        assert!(h.status.is_none());
        assert!(h.scene.notifications().is_empty());

        assert!(matches!(h.dispatch(hello()), Dispatch::Handshake(r) if r.application == "iClone"));
        assert_eq!(h.dispatch(Message::empty(OpCode::Stop)), Dispatch::Stop);
        assert_eq!(h.dispatch(Message::empty(OpCode::Disconnect)), Dispatch::Disconnect);
    }

    #[test]
    fn invalid_hello_is_dropped() {
        let mut h = Harness::new();
        h.connected = false;
        let bad = json(
            OpCode::Hello,
            &Hello {
                application: String::new(),
                version: [1, 0, 0],
                path: String::new(),
                exe: String::new(),
                plugin: None,
            },
        );
        assert_eq!(h.dispatch(bad), Dispatch::Continue);
        assert_eq!(
            h.dispatch(Message::new(OpCode::Hello, &b"{not json"[..])),
            Dispatch::Continue
        );
    }

    #[test]
    fn unknown_opcode_and_bad_payload_are_ignored() {
        let mut h = Harness::with_kevin();
        assert_eq!(h.dispatch(Message::new(999u32, &b"zzz"[..])), Dispatch::Continue);
        assert_eq!(
            h.dispatch(Message::new(OpCode::PoseFrame, &[0u8, 0, 0][..])),
            Dispatch::Continue
        );
        assert_eq!(
            h.dispatch(Message::new(OpCode::Notify, &br#"{"message":"x","extra":1}"#[..])),
            Dispatch::Continue
        );
        assert!(h.status.is_none());
    }

    #[test]
    fn notify_sets_status() {
        let mut h = Harness::new();
        h.dispatch(json(OpCode::Notify, &Notify { message: "Exporting".into() }));
        assert_eq!(h.status.as_deref(), Some("Exporting"));
        assert_eq!(h.scene.notifications(), &["Exporting".to_string()]);
    }

    #[test]
    fn pose_frame_skips_unresolvable_actor() {
        let mut h = Harness::with_kevin();
        let mut frame = PoseFrame::new(7);
        frame.actors.push(pose("Stranger", "LINK-X"));
        frame.actors.push(pose("Kevin", "LINK-K"));

        let before = h.directory.len();
        assert_eq!(
            h.dispatch(Message::new(OpCode::PoseFrame, encode_pose_frame(&frame))),
            Dispatch::Continue
        );

        let kevin = h.scene.character("Kevin").unwrap();
        assert_eq!(kevin.bone_pose.get("hip"), Some(&moved()));
        assert_eq!(kevin.weights.get("Smile"), Some(&0.5));
        assert_eq!(kevin.weights.get("V_Open"), Some(&0.25));
        assert!(h.scene.character("Stranger").is_none());
        assert_eq!(h.directory.len(), before);
    }

    #[test]
    fn template_then_update_renames() {
        let mut h = Harness::new();
        h.dispatch(json(OpCode::Template, &Template { actors: vec![kevin()] }));
        assert_eq!(h.directory.len(), 1);

        h.dispatch(json(
            OpCode::CharacterUpdate,
            &ActorUpdate {
                name: "Kevin".into(),
                kind: ActorKind::Avatar,
                link_id: "LINK-K".into(),
                new_name: "Kevin_2".into(),
                new_link_id: "LINK-K2".into(),
            },
        ));
        let actor = h.directory.iter().next().unwrap();
        assert_eq!(actor.name, "Kevin_2");
        assert_eq!(actor.link_id, "LINK-K2");
    }

    #[test]
    fn imports_are_queued_and_yield() {
        let mut h = Harness::new();
        let request = ActorExport {
            path: "/tmp/kevin.fbx".into(),
            name: "Kevin".into(),
            kind: ActorKind::Avatar,
            link_id: "LINK-K".into(),
        };
        assert_eq!(h.dispatch(json(OpCode::Character, &request)), Dispatch::Yield);
        assert_eq!(h.imports.len(), 1);
        assert!(h.directory.is_empty());
    }

    #[test]
    fn sequence_frames_are_recorded_and_acked() {
        let mut h = Harness::with_kevin();
        let meta = SequenceMeta {
            fps: 30.0,
            start_time: 0.0,
            end_time: 0.1,
            start_frame: 1,
            end_frame: 2,
            current_frame: None,
            actors: vec![ActorRef::new("Kevin", ActorKind::Avatar, "LINK-K")],
        };
        h.dispatch(json(OpCode::Sequence, &meta));
        assert!(h.sequence.is_receiving());

        for f in 1..=2 {
            let mut frame = PoseFrame::new(f);
            frame.actors.push(pose("Kevin", "LINK-K"));
            assert_eq!(
                h.dispatch(Message::new(OpCode::SequenceFrame, encode_pose_frame(&frame))),
                Dispatch::Yield
            );
        }
        assert_eq!(h.outbox.len(), 2);
        let ack: SequenceAck = decode_json(&h.outbox[1].payload).unwrap();
        assert_eq!(ack.frame, 2);

        h.dispatch(json(OpCode::SequenceEnd, &SequenceEnd { frame: 2, aborted: false }));
        assert!(!h.sequence.is_receiving());
        assert!(h.scene.action_names().any(|a| a == "Kevin_Sequence"));
    }

    #[test]
    fn frame_sync_sets_timeline() {
        let mut h = Harness::new();
        h.dispatch(json(
            OpCode::FrameSync,
            &FrameSync {
                fps: 24.0,
                start_frame: 0,
                end_frame: 48,
                current_frame: 12,
            },
        ));
        assert_eq!(h.scene.frame_range(), (0, 48));
        assert_eq!(h.scene.current_frame(), 12);
        assert_eq!(h.scene.fps(), 24.0);
    }

    #[test]
    fn rigify_unknown_actor_is_skipped() {
        let mut h = Harness::with_kevin();
        let target = ActorRef::new("Nobody", ActorKind::Avatar, "NOPE");
        assert_eq!(h.dispatch(json(OpCode::Rigify, &target)), Dispatch::Continue);
        assert!(h.scene.rigified().is_empty());

        let target = ActorRef::new("Kevin", ActorKind::Avatar, "LINK-K");
        h.dispatch(json(OpCode::Rigify, &target));
        assert_eq!(h.scene.rigified(), &["Kevin".to_string()]);
    }

    fn shifted(x: f32) -> Transform {
        Transform::new(Vec3::new(x, 0.0, 0.0), Quat::IDENTITY, Vec3::ONE)
    }

    #[test]
    fn mesh_transforms_stay_aligned_when_a_mesh_is_missing() {
        let mut scene = MemoryScene::new();
        let mut in_scene = kevin();
        in_scene.meshes = vec!["A".into(), "C".into()];
        scene.add_character(&in_scene);

        let mut directory = ActorDirectory::new();
        let mut linked = kevin();
        linked.meshes = vec!["A".into(), "B".into(), "C".into()];
        let id = directory.apply_template(&linked);

        let mut p = pose("Kevin", "LINK-K");
        p.meshes = vec![shifted(1.0), shifted(2.0), shifted(3.0)];
        apply_pose(&mut scene, directory.get(id).unwrap(), &p);

        let kevin = scene.character("Kevin").unwrap();
        assert_eq!(kevin.mesh_pose["A"].translation.x, 1.0);
        assert_eq!(kevin.mesh_pose["C"].translation.x, 3.0);
        assert!(!kevin.mesh_pose.contains_key("B"));
        assert_eq!(kevin.weights["Smile"], 0.5);
    }

    #[test]
    fn boneless_prop_still_gets_root_transform() {
        let mut scene = MemoryScene::new();
        let chair = TemplateActor {
            name: "Chair".into(),
            kind: ActorKind::Prop,
            link_id: "LINK-C".into(),
            bones: vec![],
            meshes: vec!["Seat".into()],
            expressions: vec![],
            visemes: vec![],
            morphs: vec![],
        };
        scene.add_character(&chair);
        let mut directory = ActorDirectory::new();
        let id = directory.apply_template(&chair);
        let actor = directory.get(id).unwrap();
        assert!(scene.actor_rig(actor).is_none());

        let mut p = ActorPose::new("Chair", ActorKind::Prop, "LINK-C");
        p.root = shifted(4.5);
        p.meshes = vec![shifted(0.5)];
        apply_pose(&mut scene, actor, &p);

        let chair = scene.character("Chair").unwrap();
        assert_eq!(chair.root.translation.x, 4.5);
        assert_eq!(chair.mesh_pose["Seat"].translation.x, 0.5);
    }
}
