//! Live character and animation data-link.
//!
//! Connects a host scene to a peer animation application over TCP: actor
//! templates, poses, streamed sequences with adaptive rate control, lights,
//! camera and timeline sync.
//!
//! # Crate Structure
//!
//! - [`transport`]: non-blocking TCP listener and streams
//! - [`frame`]: message framing, opcodes, JSON and binary pose payloads
//! - [`session`]: handshake, routing, actor directory, sequence streaming
//!   (behind the `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use datalink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use datalink_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use datalink_session::*;
}
