//! Process exit status and the error type commands return.

use std::fmt::Display;
use std::io;
use std::process::ExitCode;

use datalink_frame::FrameError;
use datalink_session::LinkError;
use datalink_transport::TransportError;

/// Exit statuses, sysexits-flavoured where a convention exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exit {
    Success = 0,
    /// Peer unreachable, refused, or the link ended early.
    Failure = 1,
    Transport = 3,
    PermissionDenied = 50,
    /// The peer sent something we could not accept.
    DataInvalid = 60,
    Usage = 64,
    Timeout = 124,
    Internal = 125,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub exit: Exit,
    pub message: String,
}

impl CliError {
    pub fn new(exit: Exit, message: impl Into<String>) -> Self {
        Self {
            exit,
            message: message.into(),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

/// Library errors that know which exit status they deserve.
pub trait Classify {
    fn exit(&self) -> Exit;
}

impl Classify for io::Error {
    fn exit(&self) -> Exit {
        match self.kind() {
            io::ErrorKind::PermissionDenied => Exit::PermissionDenied,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Exit::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotFound => Exit::Failure,
            _ => Exit::Internal,
        }
    }
}

impl Classify for TransportError {
    fn exit(&self) -> Exit {
        match self {
            TransportError::Bind { source, .. }
            | TransportError::Connect { source, .. }
            | TransportError::Accept(source)
            | TransportError::Io(source) => source.exit(),
            TransportError::Resolve { .. } => Exit::Usage,
            TransportError::Shutdown => Exit::Transport,
        }
    }
}

impl Classify for FrameError {
    fn exit(&self) -> Exit {
        match self {
            FrameError::Io(source) => source.exit(),
            FrameError::ConnectionClosed => Exit::Failure,
            FrameError::Backlogged { .. } => Exit::Transport,
            _ => Exit::DataInvalid,
        }
    }
}

impl Classify for LinkError {
    fn exit(&self) -> Exit {
        match self {
            LinkError::Transport(err) => err.exit(),
            LinkError::Framing(err) => err.exit(),
            LinkError::HandshakeFailed(_) => Exit::DataInvalid,
            LinkError::PeerTimeout(_) | LinkError::WriteStalled(_) => Exit::Timeout,
            LinkError::Config(_) => Exit::Usage,
            LinkError::NotConnected => Exit::Failure,
            _ => Exit::Internal,
        }
    }
}

/// Prefix an error with what was being attempted and pick its exit status.
pub trait Context<T> {
    fn context(self, doing: &str) -> CliResult<T>;
}

impl<T, E: Classify + Display> Context<T> for Result<T, E> {
    fn context(self, doing: &str) -> CliResult<T> {
        self.map_err(|err| CliError::new(err.exit(), format!("{doing}: {err}")))
    }
}
