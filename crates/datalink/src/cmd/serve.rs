use datalink_session::RolePolicy;
use tracing::info;

use crate::cmd::link::{install_ctrlc_handler, new_session, run_until_done, ExitPolicy};
use crate::cmd::{load_config, ServeArgs};
use crate::exit::{CliResult, Context, Exit};
use crate::output::Emitter;

pub fn run(args: ServeArgs, out: Emitter) -> CliResult<Exit> {
    let mut config = load_config(&args.link)?.with_role(RolePolicy::ServerOnly);
    if let Some(port) = args.listen_port {
        config = config.with_listen_port(port);
    }

    let (mut session, events) = new_session(config);
    install_ctrlc_handler(session.stop_handle())?;

    session.listen().context("listen failed")?;
    if let Some(addr) = session.local_addr() {
        info!(%addr, "waiting for peer");
    }

    run_until_done(
        &mut session,
        &events,
        ExitPolicy {
            count: args.count,
            once: args.once,
        },
        out,
    )
}
