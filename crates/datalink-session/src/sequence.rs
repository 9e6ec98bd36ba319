//! Sequence streaming in both directions.
//!
//! The sender pushes one frame per [`SequenceController::send_tick`] and the
//! scheduler calls it [`burst`](SequenceController::burst) times per tick.
//! The receiver applies, records and acknowledges each frame; its ACKs move
//! `last_acked` on the sender, which shrinks the burst when the receiver
//! falls behind.

use std::time::Instant;

use datalink_frame::payload::{ActorRef, SequenceAck, SequenceEnd, SequenceMeta};
use datalink_frame::{encode_json, encode_pose_frame, Message, OpCode, PoseFrame};
use tracing::{debug, info, warn};

use crate::actor::{ActorDirectory, ActorId};
use crate::error::{LinkError, Result};
use crate::keyframes::ActorKeyframes;
use crate::rate::{burst_for_delta, lerp, RateMeter, RATE_SMOOTHING};
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Idle,
    Streaming,
    Aborted,
}

impl SequenceState {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceState::Idle => "idle",
            SequenceState::Streaming => "streaming",
            SequenceState::Aborted => "aborted",
        }
    }
}

/// Timing announced by the last POSE message.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseContext {
    pub fps: f32,
    pub frame: i32,
    pub actors: Vec<ActorRef>,
}

#[derive(Debug)]
struct Outgoing {
    start_frame: i32,
    end_frame: i32,
    actors: Vec<ActorId>,
    cursor: i32,
    last_acked: i32,
    ack_rate: f32,
    done: bool,
}

#[derive(Debug)]
struct Incoming {
    start_frame: i32,
    end_frame: i32,
    caches: Vec<ActorKeyframes>,
    meter: RateMeter,
    frames: usize,
}

#[derive(Debug)]
enum Role {
    Idle,
    Sending(Outgoing),
    Receiving(Incoming),
}

/// At most one sequence per session, sent or received.
#[derive(Debug)]
pub struct SequenceController {
    role: Role,
    adaptive: bool,
    fixed_burst: usize,
    pose: Option<PoseContext>,
}

impl SequenceController {
    pub fn new(adaptive: bool, fixed_burst: usize) -> Self {
        Self {
            role: Role::Idle,
            adaptive,
            fixed_burst,
            pose: None,
        }
    }

    pub fn state(&self) -> SequenceState {
        match &self.role {
            Role::Sending(tx) if !tx.done => SequenceState::Streaming,
            Role::Receiving(_) => SequenceState::Streaming,
            _ => SequenceState::Idle,
        }
    }

    pub fn is_sending(&self) -> bool {
        matches!(&self.role, Role::Sending(tx) if !tx.done)
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.role, Role::Receiving(_))
    }

    /// Next frame to send, or the last one sent once finished.
    pub fn cursor(&self) -> Option<i32> {
        match &self.role {
            Role::Sending(tx) => Some(tx.cursor),
            _ => None,
        }
    }

    /// Smoothed receiver rate as reported by its ACKs.
    pub fn ack_rate(&self) -> Option<f32> {
        match &self.role {
            Role::Sending(tx) => Some(tx.ack_rate),
            _ => None,
        }
    }

    /// Frames received so far in the current incoming sequence.
    pub fn received_frames(&self) -> usize {
        match &self.role {
            Role::Receiving(rx) => rx.frames,
            _ => 0,
        }
    }

    pub fn pose(&self) -> Option<&PoseContext> {
        self.pose.as_ref()
    }

    pub fn begin_pose(&mut self, meta: &SequenceMeta) {
        self.pose = Some(PoseContext {
            fps: meta.fps,
            frame: meta.current_frame.unwrap_or(meta.start_frame),
            actors: meta.actors.clone(),
        });
    }

    /// Frames to push this scheduler tick.
    pub fn burst(&self) -> usize {
        match &self.role {
            Role::Sending(tx) if !tx.done => {
                if self.adaptive {
                    burst_for_delta(tx.cursor - tx.last_acked, true)
                } else {
                    self.fixed_burst
                }
            }
            _ => 0,
        }
    }

    // --- sender ---

    pub fn begin_send(&mut self, meta: &SequenceMeta, actors: Vec<ActorId>) -> Result<()> {
        if self.state() == SequenceState::Streaming {
            return Err(LinkError::SequenceActive);
        }
        info!(
            start = meta.start_frame,
            end = meta.end_frame,
            actors = actors.len(),
            "sequence send started"
        );
        self.role = Role::Sending(Outgoing {
            start_frame: meta.start_frame,
            end_frame: meta.end_frame.max(meta.start_frame),
            actors,
            cursor: meta.start_frame,
            last_acked: meta.start_frame - 1,
            ack_rate: meta.fps,
            done: false,
        });
        Ok(())
    }

    pub fn on_ack(&mut self, ack: SequenceAck) {
        match &mut self.role {
            Role::Sending(tx) => {
                tx.last_acked = tx.last_acked.max(ack.frame);
                tx.ack_rate = lerp(tx.ack_rate, ack.rate, RATE_SMOOTHING);
                debug!(
                    frame = ack.frame,
                    rate = tx.ack_rate,
                    delta = tx.cursor - tx.last_acked,
                    "sequence ack"
                );
            }
            _ => debug!(frame = ack.frame, "ack without outgoing sequence"),
        }
    }

    /// Sample and send the frame under the cursor.
    ///
    /// Returns `false` once the end frame has gone out; the call that sends
    /// the end frame also emits the single SEQUENCE_END.
    pub fn send_tick<S: Scene>(
        &mut self,
        scene: &mut S,
        directory: &ActorDirectory,
        outbox: &mut Vec<Message>,
    ) -> Result<bool> {
        let Role::Sending(tx) = &mut self.role else {
            return Ok(false);
        };
        if tx.done {
            return Ok(false);
        }

        scene.set_frame(tx.cursor);
        let mut frame = PoseFrame::new(tx.cursor);
        for id in &tx.actors {
            let Some(actor) = directory.get(*id) else {
                continue;
            };
            match scene.read_actor_pose(actor) {
                Ok(mut pose) => {
                    pose.name.clone_from(&actor.name);
                    pose.kind = actor.kind;
                    pose.link_id.clone_from(&actor.link_id);
                    frame.actors.push(pose);
                }
                Err(err) => warn!(actor = %actor.name, frame = tx.cursor, error = %err, "skipping actor in frame"),
            }
        }
        outbox.push(Message::new(OpCode::SequenceFrame, encode_pose_frame(&frame)));

        if tx.cursor >= tx.end_frame {
            tx.done = true;
            let end = SequenceEnd {
                frame: tx.cursor,
                aborted: false,
            };
            outbox.push(Message::new(OpCode::SequenceEnd, encode_json(&end)?));
            info!(
                frames = tx.end_frame - tx.start_frame + 1,
                "sequence send finished"
            );
        } else {
            tx.cursor += 1;
        }
        Ok(true)
    }

    /// Push up to one burst of frames. Returns how many went out.
    pub fn pump<S: Scene>(
        &mut self,
        scene: &mut S,
        directory: &ActorDirectory,
        outbox: &mut Vec<Message>,
    ) -> Result<usize> {
        let burst = self.burst();
        let mut sent = 0;
        while sent < burst && self.send_tick(scene, directory, outbox)? {
            sent += 1;
        }
        Ok(sent)
    }

    /// Cut an outgoing sequence short and tell the peer.
    pub fn stop_send(&mut self, outbox: &mut Vec<Message>) -> Result<bool> {
        match &mut self.role {
            Role::Sending(tx) if !tx.done => {
                tx.done = true;
                let end = SequenceEnd {
                    frame: tx.cursor,
                    aborted: true,
                };
                outbox.push(Message::new(OpCode::SequenceEnd, encode_json(&end)?));
                info!(frame = tx.cursor, state = SequenceState::Aborted.as_str(), "sequence send stopped");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // --- receiver ---

    /// Prepare keyframe caches for every resolvable actor in `meta`.
    pub fn begin_receive<S: Scene>(
        &mut self,
        meta: &SequenceMeta,
        directory: &mut ActorDirectory,
        scene: &mut S,
    ) -> Result<()> {
        if self.is_sending() {
            return Err(LinkError::SequenceActive);
        }
        if self.is_receiving() {
            warn!("new sequence while receiving; keeping partial data");
            self.abort(scene, directory);
        }

        let end_frame = meta.end_frame.max(meta.start_frame);
        scene.set_timeline(meta.fps, meta.start_frame, end_frame);
        scene.set_frame(meta.start_frame);

        let mut caches = Vec::with_capacity(meta.actors.len());
        for actor_ref in &meta.actors {
            match directory.resolve_ref(actor_ref) {
                Some(id) => {
                    if let Some(actor) = directory.get(id) {
                        caches.push(ActorKeyframes::new(actor, meta.start_frame, end_frame));
                    }
                }
                None => debug!(
                    actor = %actor_ref.name,
                    link_id = %actor_ref.link_id,
                    "sequence actor not found, not recording"
                ),
            }
        }

        info!(
            start = meta.start_frame,
            end = end_frame,
            recording = caches.len(),
            "sequence receive started"
        );
        self.role = Role::Receiving(Incoming {
            start_frame: meta.start_frame,
            end_frame,
            caches,
            meter: RateMeter::new(),
            frames: 0,
        });
        Ok(())
    }

    /// Record an already-applied frame and build its acknowledgement.
    ///
    /// `resolved[i]` is the local actor for `frame.actors[i]`, if any.
    pub fn record(
        &mut self,
        frame: &PoseFrame,
        resolved: &[Option<ActorId>],
        now: Instant,
    ) -> Option<SequenceAck> {
        let Role::Receiving(rx) = &mut self.role else {
            debug!(frame = frame.frame, "sequence frame without sequence");
            return None;
        };
        if frame.frame < rx.start_frame || frame.frame > rx.end_frame {
            warn!(frame = frame.frame, "sequence frame outside announced range");
        }

        for (pose, id) in frame.actors.iter().zip(resolved) {
            let Some(id) = id else { continue };
            if let Some(cache) = rx.caches.iter_mut().find(|c| c.actor() == *id) {
                cache.record(frame.frame, pose);
            }
        }
        rx.frames += 1;

        Some(SequenceAck {
            frame: frame.frame,
            rate: rx.meter.tick(now),
        })
    }

    /// Flush recorded curves at SEQUENCE_END. Returns the number of curves written.
    pub fn finish_receive<S: Scene>(
        &mut self,
        scene: &mut S,
        directory: &ActorDirectory,
    ) -> Result<usize> {
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Receiving(rx) => {
                let frames = rx.frames;
                let curves = flush_caches(rx, scene, directory)?;
                info!(frames, curves, "sequence receive finished");
                Ok(curves)
            }
            other => {
                self.role = other;
                Ok(0)
            }
        }
    }

    /// Drop any sequence after the link went away. Partial recordings are kept.
    pub fn abort<S: Scene>(&mut self, scene: &mut S, directory: &ActorDirectory) {
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Sending(tx) if !tx.done => {
                info!(frame = tx.cursor, state = SequenceState::Aborted.as_str(), "sequence send aborted");
            }
            Role::Receiving(rx) => {
                let frames = rx.frames;
                match flush_caches(rx, scene, directory) {
                    Ok(curves) => info!(
                        frames,
                        curves,
                        state = SequenceState::Aborted.as_str(),
                        "sequence receive aborted, partial data kept"
                    ),
                    Err(err) => warn!(error = %err, "flushing aborted sequence failed"),
                }
            }
            _ => {}
        }
        self.pose = None;
    }
}

fn flush_caches<S: Scene>(rx: Incoming, scene: &mut S, directory: &ActorDirectory) -> Result<usize> {
    let mut curves = 0;
    for cache in &rx.caches {
        let Some(actor) = directory.get(cache.actor()) else {
            continue;
        };
        if cache.recorded_frames() == 0 {
            continue;
        }
        let action = scene.create_or_get_action(actor, &format!("{}_Sequence", actor.name))?;
        curves += cache.flush(scene, &action)?;
    }
    Ok(curves)
}
