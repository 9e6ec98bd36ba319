use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use datalink_session::LinkConfig;

use crate::exit::{CliError, CliResult, Context, Exit};
use crate::output::Emitter;

mod link;
pub mod connect;
pub mod notify;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for a peer on the listen port and print link events.
    Serve(ServeArgs),
    /// Connect to a peer and print link events.
    Connect(ConnectArgs),
    /// Connect, send one NOTIFY message, and disconnect.
    Notify(NotifyArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, out: Emitter) -> CliResult<Exit> {
    match command {
        Command::Serve(args) => serve::run(args, out),
        Command::Connect(args) => connect::run(args, out),
        Command::Notify(args) => notify::run(args, out),
        Command::Version(args) => version::run(args),
    }
}

/// Link settings shared by every networked subcommand.
#[derive(Args, Debug, Default)]
pub struct LinkArgs {
    /// JSON config file; flags below override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Peer host.
    #[arg(long)]
    pub host: Option<String>,
    /// Peer port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Keepalive deadline (e.g. 60s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub keepalive_timeout: Option<String>,
    /// Send PING after this much outbound silence.
    #[arg(long, value_name = "DURATION")]
    pub ping_interval: Option<String>,
    /// Use the fixed sequence burst instead of adapting to the peer.
    #[arg(long)]
    pub no_adaptive_rate: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Port to listen on.
    #[arg(long)]
    pub listen_port: Option<u16>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit when the first peer goes away instead of waiting for the next.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Keep retrying while the peer is unreachable.
    #[arg(long)]
    pub retry: bool,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Message text shown by the peer.
    pub message: String,
    #[command(flatten)]
    pub link: LinkArgs,
    /// How long to wait for the handshake (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Build the link config from the optional file plus flag overrides.
pub(crate) fn load_config(args: &LinkArgs) -> CliResult<LinkConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).context(&format!("read {}", path.display()))?;
            LinkConfig::from_json(&text).context("invalid config")?
        }
        None => LinkConfig::default(),
    };

    if let Some(host) = &args.host {
        config = config.with_host(host.clone());
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(timeout) = &args.keepalive_timeout {
        config = config.with_keepalive_timeout(parse_duration(timeout)?);
    }
    if let Some(interval) = &args.ping_interval {
        config = config.with_ping(parse_duration(interval)?);
    }
    if args.no_adaptive_rate {
        config = config.with_adaptive_rate(false);
    }
    Ok(config)
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(Exit::Usage, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(Exit::Usage, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(Exit::Usage, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
