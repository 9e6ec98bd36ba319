use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use datalink_session::{ChannelObserver, LinkConfig, LinkEvent, MemoryScene, Session};
use tracing::debug;

use crate::exit::{CliError, CliResult, Exit};
use crate::output::Emitter;

/// When the event loop should return.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ExitPolicy {
    pub count: Option<usize>,
    /// Return on the first `Stopped` or `Lost`.
    pub once: bool,
}

pub(crate) fn new_session(config: LinkConfig) -> (Session<MemoryScene>, Receiver<LinkEvent>) {
    let (tx, rx) = mpsc::channel();
    let session = Session::new(config, MemoryScene::new()).with_observer(ChannelObserver(tx));
    (session, rx)
}

pub(crate) fn install_ctrlc_handler(stop: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(Exit::Internal, format!("signal handler setup failed: {err}")))
}

/// Tick the session, printing events, until the policy or Ctrl-C ends it.
pub(crate) fn run_until_done(
    session: &mut Session<MemoryScene>,
    events: &Receiver<LinkEvent>,
    policy: ExitPolicy,
    out: Emitter,
) -> CliResult<Exit> {
    let mut received = 0usize;

    while session.is_active() {
        let wait = session.tick();

        for event in events.try_iter() {
            out.event(&event);
            match event {
                LinkEvent::Received { .. } => {
                    received = received.saturating_add(1);
                    if policy.count.is_some_and(|count| received >= count) {
                        session.disconnect();
                        out.actors(session.directory());
                        return Ok(Exit::Success);
                    }
                }
                LinkEvent::Stopped | LinkEvent::Lost { .. } if policy.once => {
                    session.disconnect();
                    out.actors(session.directory());
                    return Ok(Exit::Success);
                }
                _ => {}
            }
        }

        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    debug!(received, "session idle, exiting");
    out.actors(session.directory());
    Ok(Exit::Success)
}
