use datalink_session::RolePolicy;
use tracing::warn;

use crate::cmd::link::{install_ctrlc_handler, new_session, run_until_done, ExitPolicy};
use crate::cmd::{load_config, ConnectArgs};
use crate::exit::{CliResult, Context, Exit};
use crate::output::Emitter;

pub fn run(args: ConnectArgs, out: Emitter) -> CliResult<Exit> {
    let config = load_config(&args.link)?.with_role(RolePolicy::ClientOnly);
    let (mut session, events) = new_session(config);
    install_ctrlc_handler(session.stop_handle())?;

    match session.connect() {
        Ok(()) => {}
        Err(err) if args.retry => warn!(error = %err, "peer unreachable, will retry"),
        Err(err) => return Err(err).context("connect failed"),
    }

    // Without --retry a lost link ends the command.
    run_until_done(
        &mut session,
        &events,
        ExitPolicy {
            count: args.count,
            once: !args.retry,
        },
        out,
    )
}
