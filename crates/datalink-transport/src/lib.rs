//! TCP transport for the character data-link.
//!
//! This is the lowest layer of datalink. It owns the sockets and nothing else:
//! - [`LinkListener`] binds and polls for inbound connections without blocking
//! - [`connect`] opens an outbound connection with a bounded timeout
//! - [`LinkStream`] is the connected byte stream everything else builds on
//!
//! All operations are shaped for a single cooperative scheduler thread: no call
//! here waits longer than its configured timeout.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::LinkStream;
pub use tcp::{connect, resolve, LinkListener};

/// Default port of the animation peer ("A" role).
pub const PEER_PORT: u16 = 9333;
/// Default port this process listens on in the server role.
pub const LISTEN_PORT: u16 = 9334;
/// Default port of the alternate peer application.
pub const ALT_PEER_PORT: u16 = 9335;
