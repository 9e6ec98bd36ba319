mod cmd;
mod exit;
mod logging;
mod output;

use std::process::ExitCode;

use clap::{Args, Parser};

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::{Emitter, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "datalink", version, about = "Character and animation data-link CLI")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

/// Options accepted before or after any subcommand.
#[derive(Args, Debug)]
struct GlobalArgs {
    /// Result format on stdout [default: table on a terminal, json otherwise].
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log format on stderr.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        global = true,
        env = "DATALINK_LOG_LEVEL",
        help = "Minimum log level on stderr"
    )]
    log_level: LogLevel,
}

fn main() -> ExitCode {
    let Cli { global, command } = Cli::parse();
    init_logging(global.log_format, global.log_level);

    match cmd::run(command, Emitter::new(global.format)) {
        Ok(exit) => exit.into(),
        Err(err) => {
            tracing::debug!(status = err.exit as u8, "command failed");
            eprintln!("error: {err}");
            err.exit.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("datalink").chain(args.iter().copied()))
            .unwrap_or_else(|err| panic!("{args:?} should parse: {err}"))
    }

    #[test]
    fn serve_with_port_and_count() {
        let Command::Serve(args) = parse(&["serve", "--listen-port", "9400", "--count", "10"]).command
        else {
            panic!("expected serve");
        };
        assert_eq!(args.listen_port, Some(9400));
        assert_eq!(args.count, Some(10));
        assert!(!args.once);
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = parse(&[
            "notify",
            "Render finished",
            "--host",
            "10.0.0.5",
            "--port",
            "9335",
            "--format",
            "json",
            "--log-level",
            "warn",
        ]);
        assert_eq!(cli.global.format, Some(OutputFormat::Json));
        assert_eq!(cli.global.log_level, LogLevel::Warn);
        let Command::Notify(args) = cli.command else {
            panic!("expected notify");
        };
        assert_eq!(args.message, "Render finished");
        assert_eq!(args.link.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(args.link.port, Some(9335));
        assert_eq!(args.timeout, "5s");
    }

    #[test]
    fn notify_needs_a_message() {
        let err = Cli::try_parse_from(["datalink", "notify"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn connect_retry_and_fixed_rate() {
        let Command::Connect(args) = parse(&["connect", "--retry", "--no-adaptive-rate"]).command
        else {
            panic!("expected connect");
        };
        assert!(args.retry);
        assert!(args.link.no_adaptive_rate);
        assert_eq!(args.count, None);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = Cli::try_parse_from(["datalink", "--format", "xml", "version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
