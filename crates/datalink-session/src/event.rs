use std::net::SocketAddr;
use std::sync::mpsc::Sender;

/// Lifecycle and traffic notifications, delivered to one observer.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Server role started on this address.
    Listening(SocketAddr),
    /// Client role is attempting this address.
    Connecting(SocketAddr),
    /// Handshake completed with the named application.
    Connected { application: String },
    /// The peer went silent past the keepalive deadline or the stream broke.
    Lost { reason: String },
    /// Orderly teardown (local stop, peer STOP or DISCONNECT).
    Stopped,
    /// An inbound connection was accepted (handshake pending).
    Accepted(SocketAddr),
    /// A message went out.
    Sent { opcode: u32 },
    /// A message came in.
    Received { opcode: u32 },
    /// The user-visible status string changed.
    Changed { status: String },
}

impl LinkEvent {
    /// Short tag for logs and tables.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkEvent::Listening(_) => "listening",
            LinkEvent::Connecting(_) => "connecting",
            LinkEvent::Connected { .. } => "connected",
            LinkEvent::Lost { .. } => "lost",
            LinkEvent::Stopped => "stopped",
            LinkEvent::Accepted(_) => "accepted",
            LinkEvent::Sent { .. } => "sent",
            LinkEvent::Received { .. } => "received",
            LinkEvent::Changed { .. } => "changed",
        }
    }

    /// Human-readable detail for CLI output.
    pub fn detail(&self) -> String {
        match self {
            LinkEvent::Listening(addr) | LinkEvent::Connecting(addr) | LinkEvent::Accepted(addr) => {
                addr.to_string()
            }
            LinkEvent::Connected { application } => application.clone(),
            LinkEvent::Lost { reason } => reason.clone(),
            LinkEvent::Stopped => String::new(),
            LinkEvent::Sent { opcode } | LinkEvent::Received { opcode } => {
                datalink_frame::opcode_name(*opcode).to_string()
            }
            LinkEvent::Changed { status } => status.clone(),
        }
    }
}

/// Receives session events.
pub trait Observer {
    fn on_event(&mut self, event: LinkEvent);
}

impl<F: FnMut(LinkEvent)> Observer for F {
    fn on_event(&mut self, event: LinkEvent) {
        self(event)
    }
}

/// Forwards events over a channel. A dropped receiver is ignored.
pub struct ChannelObserver(pub Sender<LinkEvent>);

impl Observer for ChannelObserver {
    fn on_event(&mut self, event: LinkEvent) {
        let _ = self.0.send(event);
    }
}

impl From<Sender<LinkEvent>> for Box<dyn Observer> {
    fn from(tx: Sender<LinkEvent>) -> Self {
        Box::new(ChannelObserver(tx))
    }
}
