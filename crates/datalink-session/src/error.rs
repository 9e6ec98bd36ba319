use std::time::Duration;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Socket create/bind/connect failure.
    #[error("transport error: {0}")]
    Transport(#[from] datalink_transport::TransportError),

    /// Message framing or payload decoding error.
    #[error("framing error: {0}")]
    Framing(#[from] datalink_frame::FrameError),

    /// The peer's HELLO did not pass validation.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No local actor matches the peer's identifiers.
    #[error("actor not found: {name} ({link_id})")]
    ActorNotFound { name: String, link_id: String },

    /// Keepalive or handshake deadline elapsed.
    #[error("peer timed out after {0:?}")]
    PeerTimeout(Duration),

    /// Queued outbound bytes made no progress for this long.
    #[error("peer stopped reading for {0:?}")]
    WriteStalled(Duration),

    /// An outbound payload could not be produced from scene data.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The scene adapter refused an operation.
    #[error("scene error: {0}")]
    Scene(String),

    /// The operation needs a connected peer.
    #[error("not connected")]
    NotConnected,

    /// A sequence is already being sent or received.
    #[error("sequence already active")]
    SequenceActive,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LinkError {
    /// True for failures that tear the session down.
    ///
    /// Framing errors caused by one bad message are handled locally; a broken
    /// stream is treated like any other transport failure.
    pub fn is_transport(&self) -> bool {
        match self {
            LinkError::Transport(_) | LinkError::PeerTimeout(_) | LinkError::WriteStalled(_) => true,
            LinkError::Framing(err) => !err.is_message_local(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
