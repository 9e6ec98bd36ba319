use std::time::Instant;

use datalink_session::{LinkEvent, MemoryScene, RolePolicy, Session};

use crate::cmd::link::new_session;
use crate::cmd::{load_config, parse_duration, NotifyArgs};
use crate::exit::{CliError, CliResult, Context, Exit};
use crate::output::Emitter;

pub fn run(args: NotifyArgs, out: Emitter) -> CliResult<Exit> {
    let timeout = parse_duration(&args.timeout)?;
    let config = load_config(&args.link)?.with_role(RolePolicy::ClientOnly);
    let (mut session, events) = new_session(config);

    session.connect().context("connect failed")?;

    let deadline = Instant::now() + timeout;
    while !session.is_connected() {
        if Instant::now() >= deadline {
            session.disconnect();
            return Err(CliError::new(Exit::Timeout, "handshake timed out"));
        }
        let wait = session.tick();
        if let Some(reason) = events.try_iter().find_map(|event| match event {
            LinkEvent::Lost { reason } => Some(reason),
            _ => None,
        }) {
            return Err(CliError::new(Exit::Failure, format!("link lost: {reason}")));
        }
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    let (application, peer) = peer_label(&session);
    let sent = session.send_notify(&args.message);
    session.disconnect();
    sent.context("notify failed")?;

    out.notify_result(&application, &peer, &args.message);
    Ok(Exit::Success)
}

fn peer_label(session: &Session<MemoryScene>) -> (String, String) {
    let application = session
        .remote()
        .map(|remote| remote.application.clone())
        .unwrap_or_default();
    let peer = session
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    (application, peer)
}
