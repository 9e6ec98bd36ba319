//! The data-link session and its cooperative scheduler.
//!
//! A [`Session`] owns the connection, the actor directory, the sequence
//! controller and the host scene adapter. Nothing runs in the background:
//! the host calls [`Session::tick`] from its own loop and sleeps for the
//! returned duration. Every step inside a tick is a non-blocking poll or one
//! bounded connect attempt.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use datalink_frame::payload::{ActorExport, FrameSync, Notify, SequenceMeta, Template};
use datalink_frame::{encode_json, encode_pose_frame, ActorKind, FrameConfig, Message, MessageReader, MessageWriter, OpCode, PoseFrame};
use datalink_transport::{LinkListener, LinkStream};
use tracing::{debug, info, warn};

use crate::actor::{Actor, ActorDirectory, ActorId};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::event::{LinkEvent, Observer};
use crate::handshake::{local_hello, RemoteIdentity};
use crate::import::{run_import, PendingImport};
use crate::rate::RateMeter;
use crate::router::{dispatch, Dispatch, RouterContext};
use crate::scene::Scene;
use crate::sequence::{SequenceController, SequenceState};

/// How long `disconnect` keeps trying to get its DISCONNECT out.
const DISCONNECT_GRACE: Duration = Duration::from_millis(100);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Listening,
    /// Socket open, waiting for the peer's HELLO.
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Listening => "listening",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Teardown {
    Stopped,
    Lost(String),
}

struct Connection {
    reader: MessageReader<LinkStream>,
    writer: MessageWriter<LinkStream>,
    peer: SocketAddr,
}

impl Connection {
    fn close(&self) {
        self.reader.get_ref().close();
    }
}

/// One data link to one peer application.
pub struct Session<S: Scene> {
    config: LinkConfig,
    scene: S,
    directory: ActorDirectory,
    sequence: SequenceController,
    imports: VecDeque<PendingImport>,
    outbox: Vec<Message>,
    observer: Option<Box<dyn Observer>>,

    state: LinkState,
    listener: Option<LinkListener>,
    conn: Option<Connection>,
    remote: Option<RemoteIdentity>,
    status: String,

    remain_connected: bool,
    stop: Arc<AtomicBool>,
    handshake_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
    ping_deadline: Option<Instant>,
    next_reconnect: Option<Instant>,
    loop_rate: RateMeter,
}

impl<S: Scene> Session<S> {
    pub fn new(config: LinkConfig, scene: S) -> Self {
        let sequence = SequenceController::new(config.adaptive_rate, config.fixed_burst);
        Self {
            config,
            scene,
            directory: ActorDirectory::new(),
            sequence,
            imports: VecDeque::new(),
            outbox: Vec::new(),
            observer: None,
            state: LinkState::Idle,
            listener: None,
            conn: None,
            remote: None,
            status: "Idle".to_string(),
            remain_connected: false,
            stop: Arc::new(AtomicBool::new(false)),
            handshake_deadline: None,
            keepalive_deadline: None,
            ping_deadline: None,
            next_reconnect: None,
            loop_rate: RateMeter::new(),
        }
    }

    /// Deliver events to `observer` (a closure or a [`ChannelObserver`](crate::ChannelObserver)).
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn set_observer(&mut self, observer: Box<dyn Observer>) {
        self.observer = Some(observer);
    }

    /// Flag checked at the start of every tick; set it from any thread to stop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    // --- accessors ---

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// True while linked or while the session intends to reconnect.
    pub fn is_active(&self) -> bool {
        self.state != LinkState::Idle || self.remain_connected
    }

    pub fn remain_connected(&self) -> bool {
        self.remain_connected
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn remote(&self) -> Option<&RemoteIdentity> {
        self.remote.as_ref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn directory(&self) -> &ActorDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut ActorDirectory {
        &mut self.directory
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn sequence(&self) -> &SequenceController {
        &self.sequence
    }

    /// Pending imports not yet run.
    pub fn pending_imports(&self) -> usize {
        self.imports.len()
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(LinkListener::local_addr)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|c| c.peer)
    }

    /// Smoothed scheduler ticks per second.
    pub fn loop_rate(&self) -> f32 {
        self.loop_rate.rate()
    }

    // --- lifecycle ---

    /// Connect according to the role policy and remember to stay connected.
    ///
    /// The client role is tried first (one immediate retry), then the server
    /// role if the policy allows it.
    pub fn start(&mut self) -> Result<()> {
        self.remain_connected = true;
        self.next_reconnect = None;
        self.open()
    }

    /// Client role only.
    pub fn connect(&mut self) -> Result<()> {
        self.remain_connected = true;
        self.next_reconnect = None;
        if self.state != LinkState::Idle {
            return Ok(());
        }
        self.connect_with_retry()
    }

    /// Server role only.
    pub fn listen(&mut self) -> Result<()> {
        self.remain_connected = true;
        self.next_reconnect = None;
        if self.state != LinkState::Idle {
            return Ok(());
        }
        self.bind_listener()
    }

    /// Drop the current link, if any, and start again.
    pub fn reconnect(&mut self) -> Result<()> {
        if self.state != LinkState::Idle {
            self.teardown(Teardown::Stopped);
        }
        self.start()
    }

    /// Ask the next tick to stop. Safe to call from a signal handler thread.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Tell the peer we are leaving and go idle without reconnecting.
    pub fn disconnect(&mut self) {
        self.remain_connected = false;
        self.next_reconnect = None;
        if let Some(conn) = self.conn.as_mut() {
            let bye = Message::empty(OpCode::Disconnect);
            let delivered = conn
                .writer
                .enqueue(&bye)
                .and_then(|()| conn.writer.flush_within(DISCONNECT_GRACE));
            match delivered {
                Ok(true) => self.emit(LinkEvent::Sent { opcode: bye.opcode }),
                Ok(false) => debug!(pending = conn.writer.pending(), "DISCONNECT still queued at close"),
                Err(err) => debug!(error = %err, "DISCONNECT not delivered"),
            }
        }
        if self.state != LinkState::Idle {
            self.teardown(Teardown::Stopped);
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.state != LinkState::Idle {
            return Ok(());
        }
        let role = self.config.role;
        if role.allows_client() {
            match self.connect_with_retry() {
                Ok(()) => return Ok(()),
                Err(err) if role.allows_server() => {
                    info!(error = %err, "no peer to connect to, falling back to listening");
                }
                Err(err) => return Err(err),
            }
        }
        self.bind_listener()
    }

    fn connect_with_retry(&mut self) -> Result<()> {
        let first = match self.try_connect() {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        debug!(error = %first, "connect failed, retrying once");
        match self.try_connect() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.schedule_reconnect();
                self.set_status(format!("Not connected: {err}"));
                Err(err)
            }
        }
    }

    fn try_connect(&mut self) -> Result<()> {
        let addr = datalink_transport::resolve(&self.config.host, self.config.port)?;
        self.state = LinkState::Connecting;
        self.emit(LinkEvent::Connecting(addr));
        match datalink_transport::connect(addr, self.config.connect_timeout) {
            Ok(stream) => {
                info!(%addr, "connected, waiting for HELLO");
                self.attach(stream)
            }
            Err(err) => {
                self.state = LinkState::Idle;
                Err(err.into())
            }
        }
    }

    fn bind_listener(&mut self) -> Result<()> {
        let addr = datalink_transport::resolve(&self.config.host, self.config.listen_port)?;
        let listener = match LinkListener::bind(addr) {
            Ok(listener) => listener,
            Err(err) => {
                self.schedule_reconnect();
                return Err(err.into());
            }
        };
        let bound = listener.local_addr();
        self.listener = Some(listener);
        self.state = LinkState::Listening;
        self.next_reconnect = None;
        self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);
        self.emit(LinkEvent::Listening(bound));
        self.set_status(format!("Listening on {bound}"));
        Ok(())
    }

    /// Wrap a fresh socket and send our HELLO.
    fn attach(&mut self, stream: LinkStream) -> Result<()> {
        let peer = stream.peer_addr();
        let frame_config = FrameConfig::with_max_payload(self.config.max_payload);
        let reader = MessageReader::with_config(stream.try_clone()?, &frame_config);
        let writer = MessageWriter::with_config(stream, &frame_config);
        self.conn = Some(Connection { reader, writer, peer });

        let now = Instant::now();
        self.state = LinkState::Connecting;
        self.handshake_deadline = Some(now + self.config.handshake_timeout);
        self.keepalive_deadline = Some(now + self.config.keepalive_timeout);

        let hello = local_hello(&self.config.identity);
        self.outbox.push(Message::new(OpCode::Hello, encode_json(&hello)?));
        if let Err(err) = self.flush_outbox() {
            self.teardown(Teardown::Lost(err.to_string()));
            return Err(err);
        }
        self.set_status(format!("Connecting to {peer}"));
        Ok(())
    }

    fn schedule_reconnect(&mut self) {
        if self.remain_connected {
            self.next_reconnect = Some(Instant::now() + self.config.reconnect_interval);
        }
    }

    fn teardown(&mut self, how: Teardown) {
        self.sequence.abort(&mut self.scene, &self.directory);

        if let Some(conn) = self.conn.take() {
            conn.close();
        }
        self.listener = None;
        self.remote = None;
        self.outbox.clear();
        self.directory.set_single_scene(false);
        self.handshake_deadline = None;
        self.keepalive_deadline = None;
        self.ping_deadline = None;

        let previous = self.state;
        self.state = LinkState::Idle;
        match how {
            Teardown::Stopped => {
                info!(from = %previous, "link stopped");
                self.emit(LinkEvent::Stopped);
                self.set_status("Disconnected".to_string());
            }
            Teardown::Lost(reason) => {
                warn!(from = %previous, %reason, "link lost");
                self.set_status(format!("Connection lost: {reason}"));
                self.emit(LinkEvent::Lost { reason });
            }
        }
        self.schedule_reconnect();
    }

    // --- scheduler ---

    /// Run one scheduler step and return how long the caller should wait.
    ///
    /// Order: stop request, reconnect/accept, inbound drain, one pending
    /// import, sequence burst, outbound flush, deadlines.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();

        if self.stop.swap(false, Ordering::SeqCst) {
            self.disconnect();
        }

        if self.state == LinkState::Idle && self.remain_connected {
            if let Some(at) = self.next_reconnect {
                if at <= now {
                    self.next_reconnect = None;
                    if let Err(err) = self.open() {
                        debug!(error = %err, "reconnect attempt failed");
                    }
                }
            }
        }
        if self.state == LinkState::Listening {
            self.poll_accept();
        }

        let mut busy = self.drain(now);

        if let Some(import) = self.imports.pop_front() {
            if let Err(err) = run_import(&import, &mut self.scene, &mut self.directory) {
                warn!(path = %import.path(), error = %err, "import failed");
            }
            busy |= !self.imports.is_empty();
        }

        if self.state == LinkState::Connected && self.sequence.is_sending() {
            if let Err(err) = self.sequence.pump(&mut self.scene, &self.directory, &mut self.outbox) {
                warn!(error = %err, "sequence frame not sent");
                self.outbox.clear();
            }
            busy |= self.sequence.burst() > 0;
        }

        // Bytes a slow peer could not take last time go out here.
        if self.conn.is_some() {
            if let Err(err) = self.flush_outbox() {
                self.fail(err);
            }
        }

        self.check_deadlines(Instant::now());
        self.loop_rate.tick(now);

        if busy {
            Duration::ZERO
        } else {
            self.config.tick_interval
        }
    }

    fn poll_accept(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        match listener.try_accept() {
            Ok(Some(stream)) => {
                let peer = stream.peer_addr();
                // One peer at a time.
                self.listener = None;
                self.emit(LinkEvent::Accepted(peer));
                if let Err(err) = self.attach(stream) {
                    warn!(%peer, error = %err, "could not set up accepted connection");
                }
            }
            Ok(None) => {}
            Err(err) => self.teardown(Teardown::Lost(err.to_string())),
        }
    }

    /// Handle up to `max_messages_per_poll` messages. True if more may be waiting.
    fn drain(&mut self, now: Instant) -> bool {
        let mut handled = 0;
        while handled < self.config.max_messages_per_poll {
            let Some(conn) = self.conn.as_mut() else {
                return false;
            };
            let message = match conn.reader.poll_message() {
                Ok(Some(message)) => message,
                Ok(None) => return false,
                Err(err) => {
                    let err = LinkError::from(err);
                    if err.is_transport() {
                        self.fail(err);
                        return false;
                    }
                    // The reader already discarded the message body.
                    handled += 1;
                    self.keepalive_deadline = Some(now + self.config.keepalive_timeout);
                    warn!(error = %err, "skipping inbound message");
                    continue;
                }
            };
            handled += 1;
            self.keepalive_deadline = Some(now + self.config.keepalive_timeout);
            self.emit(LinkEvent::Received {
                opcode: message.opcode,
            });

            let next = self.route(&message, now);
            if let Err(err) = self.flush_outbox() {
                self.fail(err);
                return false;
            }
            match next {
                Dispatch::Continue => {}
                Dispatch::Yield => return true,
                Dispatch::Handshake(remote) => self.complete_handshake(remote, now),
                Dispatch::Stop => {
                    self.remain_connected = false;
                    self.next_reconnect = None;
                    self.teardown(Teardown::Stopped);
                    return false;
                }
                Dispatch::Disconnect => {
                    self.teardown(Teardown::Stopped);
                    return false;
                }
            }
        }
        true
    }

    fn route(&mut self, message: &Message, now: Instant) -> Dispatch {
        let mut status = None;
        let next = {
            let mut ctx = RouterContext {
                config: &self.config,
                scene: &mut self.scene,
                directory: &mut self.directory,
                sequence: &mut self.sequence,
                imports: &mut self.imports,
                outbox: &mut self.outbox,
                status: &mut status,
                connected: self.state == LinkState::Connected,
                now,
            };
            dispatch(&mut ctx, message)
        };
        if let Some(status) = status {
            self.set_status(status);
        }
        next
    }

    fn complete_handshake(&mut self, remote: RemoteIdentity, now: Instant) {
        self.directory.set_single_scene(remote.single_scene);
        if self.state == LinkState::Connected {
            debug!(application = %remote.application, "peer re-sent HELLO");
            self.remote = Some(remote);
            return;
        }

        info!(
            application = %remote.application,
            version = %remote.version_string(),
            single_scene = remote.single_scene,
            "handshake complete"
        );
        self.state = LinkState::Connected;
        self.handshake_deadline = None;
        self.next_reconnect = None;
        if self.config.ping_enabled {
            self.ping_deadline = Some(now + self.config.ping_interval);
        }
        let application = remote.application.clone();
        let status = format!("Connected to {} {}", remote.application, remote.version_string());
        self.remote = Some(remote);
        self.emit(LinkEvent::Connected { application });
        self.set_status(status);
    }

    fn check_deadlines(&mut self, now: Instant) {
        let stalled = self.conn.as_ref().and_then(|c| c.writer.stalled_for(now));
        if stalled.is_some_and(|waited| waited >= self.config.write_stall_timeout) {
            let err = LinkError::WriteStalled(self.config.write_stall_timeout);
            self.teardown(Teardown::Lost(err.to_string()));
            return;
        }
        match self.state {
            LinkState::Listening | LinkState::Connecting => {
                if self.handshake_deadline.is_some_and(|at| at <= now) {
                    let err = LinkError::PeerTimeout(self.config.handshake_timeout);
                    self.teardown(Teardown::Lost(format!("no handshake: {err}")));
                }
            }
            LinkState::Connected => {
                if self.keepalive_deadline.is_some_and(|at| at <= now) {
                    let err = LinkError::PeerTimeout(self.config.keepalive_timeout);
                    self.teardown(Teardown::Lost(err.to_string()));
                } else if self.ping_deadline.is_some_and(|at| at <= now) {
                    self.outbox.push(Message::empty(OpCode::Ping));
                    if let Err(err) = self.flush_outbox() {
                        self.fail(err);
                    }
                }
            }
            LinkState::Idle => {}
        }
    }

    /// Tear down after a transport failure; other errors are only logged.
    fn fail(&mut self, err: LinkError) {
        if err.is_transport() {
            self.teardown(Teardown::Lost(err.to_string()));
        } else {
            warn!(error = %err, "send failed");
        }
    }

    /// Move the outbox onto the writer queue and write what the socket takes.
    ///
    /// Never waits: whatever the peer cannot accept yet stays queued for the
    /// next tick.
    fn flush_outbox(&mut self) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            if self.outbox.is_empty() {
                return Ok(());
            }
            self.outbox.clear();
            return Err(LinkError::NotConnected);
        };

        let mut sent = Vec::with_capacity(self.outbox.len());
        let mut result = Ok(());
        for message in self.outbox.drain(..) {
            if let Err(err) = conn.writer.enqueue(&message) {
                result = Err(LinkError::from(err));
                break;
            }
            sent.push(message.opcode);
        }
        if let Err(err) = conn.writer.poll_flush() {
            result = Err(err.into());
        }

        if !sent.is_empty() && self.config.ping_enabled && self.state == LinkState::Connected {
            self.ping_deadline = Some(Instant::now() + self.config.ping_interval);
        }
        for opcode in sent {
            self.emit(LinkEvent::Sent { opcode });
        }
        result
    }

    fn emit(&mut self, event: LinkEvent) {
        debug!(event = event.kind(), detail = %event.detail(), "link event");
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(event);
        }
    }

    fn set_status(&mut self, status: String) {
        if self.status != status {
            self.status.clone_from(&status);
            self.emit(LinkEvent::Changed { status });
        }
    }

    // --- outbound operations ---

    fn require_connected(&self) -> Result<()> {
        if self.state == LinkState::Connected {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    fn send_now(&mut self, messages: Vec<Message>) -> Result<()> {
        self.outbox.extend(messages);
        match self.flush_outbox() {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_transport() {
                    self.teardown(Teardown::Lost(err.to_string()));
                }
                Err(err)
            }
        }
    }

    pub fn send_notify(&mut self, message: &str) -> Result<()> {
        self.require_connected()?;
        let notify = Notify {
            message: message.to_string(),
        };
        self.send_now(vec![Message::new(OpCode::Notify, encode_json(&notify)?)])
    }

    pub fn send_template(&mut self, actors: &[ActorId]) -> Result<()> {
        self.require_connected()?;
        let template = self.template_message(actors)?;
        self.send_now(vec![template])
    }

    /// Send the current pose of `actors`: TEMPLATE, POSE, POSE_FRAME.
    ///
    /// Nothing is sent if any actor cannot be sampled.
    pub fn send_pose(&mut self, actors: &[ActorId]) -> Result<()> {
        self.require_connected()?;
        let template = self.template_message(actors)?;
        let meta = self.sequence_meta(actors)?;

        let mut frame = PoseFrame::new(self.scene.current_frame());
        for id in actors {
            let actor = find_actor(&self.directory, *id)?;
            let pose = self.scene.read_actor_pose(actor)?;
            frame.actors.push(pose);
        }

        self.send_now(vec![
            template,
            Message::new(OpCode::Pose, encode_json(&meta)?),
            Message::new(OpCode::PoseFrame, encode_pose_frame(&frame)),
        ])
    }

    /// Announce and begin streaming the scene's frame range for `actors`.
    pub fn start_sequence(&mut self, actors: &[ActorId]) -> Result<()> {
        self.require_connected()?;
        if self.sequence.state() == SequenceState::Streaming {
            return Err(LinkError::SequenceActive);
        }
        let template = self.template_message(actors)?;
        let meta = self.sequence_meta(actors)?;
        let announce = Message::new(OpCode::Sequence, encode_json(&meta)?);
        self.sequence.begin_send(&meta, actors.to_vec())?;
        self.send_now(vec![template, announce])
    }

    /// Cut the outgoing sequence short. Returns false if none was running.
    pub fn stop_sequence(&mut self) -> Result<bool> {
        let stopped = self.sequence.stop_send(&mut self.outbox)?;
        if stopped {
            self.send_now(Vec::new())?;
        }
        Ok(stopped)
    }

    /// Export `actor` to `path` and offer it to the peer.
    pub fn send_character(&mut self, actor: ActorId, path: &str) -> Result<()> {
        self.require_connected()?;
        let actor = find_actor(&self.directory, actor)?;
        self.scene.export_character(actor, path)?;
        let export = ActorExport {
            path: path.to_string(),
            name: actor.name.clone(),
            kind: actor.kind,
            link_id: actor.link_id.clone(),
        };
        let opcode = match actor.kind {
            ActorKind::Avatar => OpCode::Character,
            _ => OpCode::Prop,
        };
        self.send_now(vec![Message::new(opcode, encode_json(&export)?)])
    }

    pub fn send_camera_sync(&mut self) -> Result<()> {
        self.require_connected()?;
        let camera = self
            .scene
            .camera_state()
            .ok_or_else(|| LinkError::Encoding("scene has no view camera".to_string()))?;
        self.send_now(vec![Message::new(OpCode::CameraSync, encode_json(&camera)?)])
    }

    pub fn send_frame_sync(&mut self) -> Result<()> {
        self.require_connected()?;
        let (start_frame, end_frame) = self.scene.frame_range();
        let sync = FrameSync {
            fps: self.scene.fps(),
            start_frame,
            end_frame,
            current_frame: self.scene.current_frame(),
        };
        self.send_now(vec![Message::new(OpCode::FrameSync, encode_json(&sync)?)])
    }

    fn template_message(&self, actors: &[ActorId]) -> Result<Message> {
        let template = Template {
            actors: actors
                .iter()
                .map(|id| find_actor(&self.directory, *id).map(|a| a.to_template()))
                .collect::<Result<_>>()?,
        };
        Ok(Message::new(OpCode::Template, encode_json(&template)?))
    }

    fn sequence_meta(&self, actors: &[ActorId]) -> Result<SequenceMeta> {
        let fps = self.scene.fps();
        let (start_frame, end_frame) = self.scene.frame_range();
        let seconds = |frame: i32| if fps > 0.0 { frame as f32 / fps } else { 0.0 };
        Ok(SequenceMeta {
            fps,
            start_time: seconds(start_frame),
            end_time: seconds(end_frame),
            start_frame,
            end_frame,
            current_frame: Some(self.scene.current_frame()),
            actors: actors
                .iter()
                .map(|id| find_actor(&self.directory, *id).map(|a| a.to_ref()))
                .collect::<Result<_>>()?,
        })
    }
}

fn find_actor(directory: &ActorDirectory, id: ActorId) -> Result<&Actor> {
    directory.get(id).ok_or_else(|| LinkError::ActorNotFound {
        name: id.to_string(),
        link_id: String::new(),
    })
}

impl<S: Scene> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("peer", &self.peer_addr())
            .field("remote", &self.remote)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{channel, Receiver};
    use std::thread;

    use datalink_frame::payload::TemplateActor;

    use super::*;
    use crate::config::{LocalIdentity, RolePolicy};
    use crate::event::ChannelObserver;
    use crate::keyframes::Channel;
    use crate::scene::MemoryScene;

    type TestSession = Session<MemoryScene>;

    fn kevin() -> TemplateActor {
        TemplateActor {
            name: "Kevin".into(),
            kind: ActorKind::Avatar,
            link_id: "LINK-K".into(),
            bones: vec!["root".into(), "hip".into()],
            meshes: vec!["Body".into()],
            expressions: vec!["Smile".into()],
            visemes: vec![],
            morphs: vec![],
        }
    }

    fn server_config() -> LinkConfig {
        LinkConfig::default()
            .with_host("127.0.0.1")
            .with_listen_port(0)
            .with_role(RolePolicy::ServerOnly)
    }

    fn client_config(port: u16) -> LinkConfig {
        LinkConfig::default()
            .with_host("127.0.0.1")
            .with_port(port)
            .with_role(RolePolicy::ClientOnly)
    }

    fn observed(config: LinkConfig) -> (TestSession, Receiver<LinkEvent>) {
        let (tx, rx) = channel();
        let session = Session::new(config, MemoryScene::new()).with_observer(ChannelObserver(tx));
        (session, rx)
    }

    fn tick_until(
        server: &mut TestSession,
        client: &mut TestSession,
        mut done: impl FnMut(&TestSession, &TestSession) -> bool,
    ) -> bool {
        for _ in 0..2000 {
            client.tick();
            server.tick();
            if done(server, client) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn connected_pair(
        server_cfg: LinkConfig,
    ) -> (TestSession, Receiver<LinkEvent>, TestSession, Receiver<LinkEvent>) {
        connected_pair_with(server_cfg, client_config)
    }

    fn connected_pair_with(
        server_cfg: LinkConfig,
        client_cfg: impl FnOnce(u16) -> LinkConfig,
    ) -> (TestSession, Receiver<LinkEvent>, TestSession, Receiver<LinkEvent>) {
        let (mut server, server_rx) = observed(server_cfg);
        server.listen().unwrap();
        let port = server.local_addr().unwrap().port();

        let (mut client, client_rx) = observed(client_cfg(port));
        client.start().unwrap();
        assert_eq!(client.state(), LinkState::Connecting);

        assert!(tick_until(&mut server, &mut client, |s, c| {
            s.is_connected() && c.is_connected()
        }));
        (server, server_rx, client, client_rx)
    }

    fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn count_received(rx: &Receiver<LinkEvent>, op: OpCode) -> usize {
        rx.try_iter()
            .filter(|e| matches!(e, LinkEvent::Received { opcode } if *opcode == op.as_u32()))
            .count()
    }

    fn kinds(rx: &Receiver<LinkEvent>) -> Vec<&'static str> {
        rx.try_iter()
            .map(|e| e.kind())
            .filter(|k| *k != "sent" && *k != "received")
            .collect()
    }

    #[test]
    fn handshake_over_loopback() {
        let (server, server_rx, client, client_rx) = connected_pair(server_config());

        assert_eq!(server.remote().unwrap().application, "datalink");
        assert_eq!(client.remote().unwrap().application, "datalink");
        assert!(server.status().starts_with("Connected to datalink"));

        let server_events = kinds(&server_rx);
        assert_eq!(server_events.first(), Some(&"listening"));
        assert!(server_events.contains(&"accepted"));
        assert!(server_events.contains(&"connected"));

        let client_events = kinds(&client_rx);
        assert_eq!(client_events.first(), Some(&"connecting"));
        assert!(client_events.contains(&"connected"));
    }

    #[test]
    fn notify_reaches_peer_status() {
        let (mut server, _srx, mut client, _crx) = connected_pair(server_config());
        client.send_notify("Exporting Kevin").unwrap();
        assert!(tick_until(&mut server, &mut client, |s, _| {
            s.status() == "Exporting Kevin"
        }));
        assert_eq!(server.scene().notifications(), &["Exporting Kevin".to_string()]);
    }

    #[test]
    fn sequence_streams_and_flushes_keyframes() {
        let (mut server, _srx, mut client, _crx) = connected_pair(server_config());

        client.scene_mut().add_character(&kevin());
        client.scene_mut().set_timeline(30.0, 1, 12);
        let id = client.directory_mut().apply_template(&kevin());
        client.start_sequence(&[id]).unwrap();
        assert!(matches!(
            client.start_sequence(&[id]),
            Err(LinkError::SequenceActive)
        ));

        assert!(tick_until(&mut server, &mut client, |s, _| {
            s.scene().action_names().any(|a| a == "Kevin_Sequence")
        }));

        assert!(!client.sequence().is_sending());
        assert!(!server.sequence().is_receiving());
        assert_eq!(server.scene().frame_range(), (1, 12));
        let hip = server
            .scene()
            .keyframes(
                "Kevin_Sequence",
                &Channel::Rotation {
                    bone: "hip".into(),
                    axis: 3,
                },
            )
            .unwrap();
        assert_eq!(hip.len(), 24);
        assert_eq!(hip[0], 1.0);
        assert_eq!(hip[22], 12.0);
        assert!(server.is_connected() && client.is_connected());
    }

    #[test]
    fn pose_applies_on_peer() {
        let (mut server, _srx, mut client, _crx) = connected_pair(server_config());
        server.scene_mut().add_character(&kevin());
        client.scene_mut().add_character(&kevin());
        client.scene_mut().set_frame(100);
        let id = client.directory_mut().apply_template(&kevin());

        client.send_pose(&[id]).unwrap();
        assert!(tick_until(&mut server, &mut client, |s, _| {
            s.scene().current_frame() == 100
                && s.scene()
                    .character("Kevin")
                    .is_some_and(|c| c.root.translation.z > 0.5)
        }));
        assert_eq!(server.directory().len(), 1);
    }

    #[test]
    fn keepalive_expiry_is_lost_exactly_once() {
        let cfg = server_config().with_keepalive_timeout(Duration::from_millis(150));
        let (mut server, server_rx, _client, _crx) = connected_pair(cfg);
        let _ = kinds(&server_rx);

        // The client goes silent: only the server ticks from here on.
        let deadline = Instant::now() + Duration::from_secs(5);
        while server.state() != LinkState::Idle && Instant::now() < deadline {
            server.tick();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.state(), LinkState::Idle);
        for _ in 0..20 {
            server.tick();
        }

        let events: Vec<LinkEvent> = server_rx.try_iter().collect();
        let lost = events.iter().filter(|e| e.kind() == "lost").count();
        assert_eq!(lost, 1);
        assert!(!events.iter().any(|e| e.kind() == "stopped"));
        assert!(server.status().starts_with("Connection lost"));
    }

    #[test]
    fn local_stop_disconnects_peer_but_peer_keeps_intent() {
        let (mut server, server_rx, mut client, client_rx) = connected_pair(server_config());
        let _ = (kinds(&server_rx), kinds(&client_rx));

        client.stop_handle().store(true, Ordering::SeqCst);
        assert!(tick_until(&mut server, &mut client, |s, c| {
            s.state() == LinkState::Idle && c.state() == LinkState::Idle
        }));

        assert!(!client.remain_connected());
        assert!(!client.is_active());
        assert!(kinds(&client_rx).contains(&"stopped"));

        assert!(server.remain_connected());
        assert!(kinds(&server_rx).contains(&"stopped"));
    }

    #[test]
    fn start_without_peer_stays_idle_and_schedules_reconnect() {
        let port = unused_port();
        let (mut client, rx) = observed(client_config(port));

        assert!(client.start().is_err());
        assert_eq!(client.state(), LinkState::Idle);
        assert!(client.is_active());
        assert!(client.status().starts_with("Not connected"));
        let connecting = rx.try_iter().filter(|e| e.kind() == "connecting").count();
        assert_eq!(connecting, 2);
    }

    #[test]
    fn either_role_falls_back_to_listening() {
        let port = unused_port();
        let cfg = LinkConfig::default()
            .with_host("127.0.0.1")
            .with_port(port)
            .with_listen_port(0)
            .with_role(RolePolicy::Either);
        let mut session = Session::new(cfg, MemoryScene::new());
        session.start().unwrap();
        assert_eq!(session.state(), LinkState::Listening);
        assert!(session.local_addr().is_some());
    }

    #[test]
    fn handshake_timeout_while_listening() {
        let cfg = server_config().with_handshake_timeout(Duration::from_millis(20));
        let (mut server, rx) = observed(cfg);
        server.listen().unwrap();
        thread::sleep(Duration::from_millis(30));
        server.tick();
        assert_eq!(server.state(), LinkState::Idle);
        assert!(server.local_addr().is_none());
        assert_eq!(rx.try_iter().filter(|e| e.kind() == "lost").count(), 1);
    }

    #[test]
    fn peer_that_never_reads_is_dropped_without_blocking_ticks() {
        let cfg = server_config().with_write_stall_timeout(Duration::from_millis(300));
        let (mut server, rx) = observed(cfg);
        server.listen().unwrap();
        let port = server.local_addr().unwrap().port();

        // Raw peer: says HELLO, then never reads a byte.
        let peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        let hello = local_hello(&LocalIdentity::default());
        MessageWriter::new(peer.try_clone().unwrap())
            .write_message(&Message::new(OpCode::Hello, encode_json(&hello).unwrap()))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !server.is_connected() && Instant::now() < deadline {
            server.tick();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(server.is_connected());

        let started = Instant::now();
        server.send_notify(&"x".repeat(48 * 1024 * 1024)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(server.is_connected());

        let deadline = Instant::now() + Duration::from_secs(10);
        while server.state() != LinkState::Idle && Instant::now() < deadline {
            let tick = Instant::now();
            server.tick();
            assert!(tick.elapsed() < Duration::from_secs(1));
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.state(), LinkState::Idle);

        let lost: Vec<String> = rx
            .try_iter()
            .filter_map(|e| match e {
                LinkEvent::Lost { reason } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(lost.len(), 1);
        assert!(lost[0].contains("stopped reading"), "{}", lost[0]);
        drop(peer);
    }

    #[test]
    fn oversized_inbound_message_is_skipped_and_link_survives() {
        let mut cfg = server_config();
        cfg.max_payload = 1024;
        let (mut server, _srx, mut client, _crx) = connected_pair(cfg);

        client.send_notify(&"y".repeat(4000)).unwrap();
        client.send_notify("after the big one").unwrap();
        assert!(tick_until(&mut server, &mut client, |s, _| {
            s.status() == "after the big one"
        }));

        assert!(server.is_connected() && client.is_connected());
        assert_eq!(
            server.scene().notifications(),
            &["after the big one".to_string()]
        );
    }

    #[test]
    fn ping_fills_outbound_silence() {
        let (mut server, server_rx, mut client, client_rx) =
            connected_pair_with(server_config(), |port| {
                client_config(port).with_ping(Duration::from_millis(40))
            });
        let _ = (kinds(&server_rx), kinds(&client_rx));

        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(400) {
            client.tick();
            server.tick();
            thread::sleep(Duration::from_millis(5));
        }

        assert!(count_received(&server_rx, OpCode::Ping) >= 3);
        // Only the client has PING turned on.
        assert_eq!(count_received(&client_rx, OpCode::Ping), 0);
        assert!(server.is_connected() && client.is_connected());
    }

    #[test]
    fn periodic_reconnect_finds_a_late_listener() {
        let port = unused_port();
        let (mut client, client_rx) =
            observed(client_config(port).with_reconnect_interval(Duration::from_millis(50)));
        assert!(client.start().is_err());
        assert_eq!(client.state(), LinkState::Idle);

        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(200) {
            client.tick();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client.state(), LinkState::Idle);
        let attempts = client_rx.try_iter().filter(|e| e.kind() == "connecting").count();
        assert!(attempts > 2, "only {attempts} connect attempts");

        let (mut server, _srx) = observed(server_config().with_listen_port(port));
        server.listen().unwrap();
        assert!(tick_until(&mut server, &mut client, |s, c| {
            s.is_connected() && c.is_connected()
        }));
        assert!(kinds(&client_rx).contains(&"connected"));
    }

    #[test]
    fn disconnect_mid_sequence_keeps_partial_keyframes() {
        let (mut server, server_rx, mut client, _crx) =
            connected_pair_with(server_config(), |port| {
                let mut cfg = client_config(port).with_adaptive_rate(false);
                cfg.fixed_burst = 1;
                cfg
            });
        client.scene_mut().add_character(&kevin());
        client.scene_mut().set_timeline(30.0, 1, 500);
        let id = client.directory_mut().apply_template(&kevin());
        client.start_sequence(&[id]).unwrap();

        assert!(tick_until(&mut server, &mut client, |s, _| {
            s.sequence().received_frames() >= 5
        }));
        let _ = kinds(&server_rx);

        client.disconnect();
        assert_eq!(client.state(), LinkState::Idle);
        assert!(!client.sequence().is_sending());

        let deadline = Instant::now() + Duration::from_secs(5);
        while server.state() != LinkState::Idle && Instant::now() < deadline {
            server.tick();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(server.state(), LinkState::Idle);
        assert!(!server.sequence().is_receiving());
        assert!(kinds(&server_rx).contains(&"stopped"));

        let hip = server
            .scene()
            .keyframes(
                "Kevin_Sequence",
                &Channel::Rotation {
                    bone: "hip".into(),
                    axis: 3,
                },
            )
            .unwrap();
        assert!(hip.len() >= 10 && hip.len() < 1000, "{} values", hip.len());
        assert_eq!(hip[0], 1.0);
    }

    #[test]
    fn outbound_requires_connection() {
        let mut session = Session::new(LinkConfig::default(), MemoryScene::new());
        assert!(matches!(session.send_notify("x"), Err(LinkError::NotConnected)));
        assert!(matches!(session.send_frame_sync(), Err(LinkError::NotConnected)));
        assert!(!session.stop_sequence().unwrap());
        assert_eq!(session.tick(), session.config().tick_interval);
    }
}
