//! Data-link session between a host scene and a peer animation application.
//!
//! [`Session`] drives the link: connect or listen, exchange HELLO, route
//! inbound messages into a [`Scene`] and stream sequences with adaptive
//! rate control. The host owns the loop and calls [`Session::tick`].

pub mod actor;
pub mod config;
pub mod error;
pub mod event;
pub mod handshake;
pub mod import;
pub mod keyframes;
pub mod rate;
pub mod router;
pub mod scene;
pub mod sequence;
pub mod session;

pub use actor::{remap_viseme, Actor, ActorDirectory, ActorId};
pub use config::{LinkConfig, LocalIdentity, RolePolicy};
pub use error::{LinkError, Result};
pub use event::{ChannelObserver, LinkEvent, Observer};
pub use handshake::RemoteIdentity;
pub use import::PendingImport;
pub use keyframes::{ActorKeyframes, Channel};
pub use rate::{burst_for_delta, RateMeter};
pub use router::Dispatch;
pub use scene::{MemoryScene, Scene, SequenceObjects};
pub use sequence::{SequenceController, SequenceState};
pub use session::{LinkState, Session};
