//! Argument parsing and command dispatch.

use clap::{Args, Parser, Subcommand, ValueEnum};
use lodestar_config::{ConsoleConfig, ENV_DAEMON_URL, ENV_HTTP_TIMEOUT_SECS, ENV_POLL_INTERVAL_MS};
use lodestar_sync::MIN_INTERVAL;
use lodestar_telemetry::{GlobalContextGuard, LoggingConfig, build_sha, init_logging, record_daemon};
use std::time::Duration;
use url::Url;

use crate::client::{AppContext, CliError, CliResult};
use crate::commands::snapshot::handle_snapshot;
use crate::commands::watch::handle_watch;

/// Parses CLI arguments, executes the requested command, and reports the
/// outcome. Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    let config = resolve_config(&cli, ConsoleConfig::from_env()?)?;

    init_logging(&LoggingConfig {
        level: config.log_level(),
        format: config.log_format,
        build_sha: build_sha(),
    })
    .map_err(CliError::failure)?;
    let _guard = GlobalContextGuard::new(cli.command.label());
    record_daemon(config.daemon_url.as_str());

    let ctx = AppContext::connect(&config, cli.output).await?;
    match cli.command {
        Command::Watch(args) => handle_watch(&ctx, args).await,
        Command::Snapshot(args) => handle_snapshot(&ctx, args).await,
    }
}

/// Apply command-line overrides on top of the environment configuration.
fn resolve_config(cli: &Cli, mut config: ConsoleConfig) -> CliResult<ConsoleConfig> {
    if let Some(url) = &cli.daemon_url {
        config.daemon_url = url.clone();
    }
    if let Some(secs) = cli.timeout {
        if secs == 0 {
            return Err(CliError::validation("--timeout must be greater than zero"));
        }
        config.http_timeout = Duration::from_secs(secs);
    }
    if let Some(millis) = cli.interval_ms {
        config.poll_interval = Duration::from_millis(millis).max(MIN_INTERVAL);
    }
    Ok(config)
}

#[derive(Parser)]
#[command(name = "lodestar", about = "Live console for a qBittorrent-compatible daemon")]
pub(crate) struct Cli {
    #[arg(long, global = true, env = ENV_DAEMON_URL, value_parser = parse_url)]
    daemon_url: Option<Url>,
    #[arg(
        long,
        global = true,
        env = ENV_HTTP_TIMEOUT_SECS,
        help = "Per-request HTTP timeout in seconds"
    )]
    timeout: Option<u64>,
    #[arg(
        long = "interval-ms",
        global = true,
        env = ENV_POLL_INTERVAL_MS,
        help = "Poll interval until the daemon advises one (minimum 500)"
    )]
    interval_ms: Option<u64>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for rendered snapshots"
    )]
    output: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Mirror the daemon until interrupted or the duration elapses.
    Watch(WatchArgs),
    /// Print one settled snapshot of each requested collection and exit.
    Snapshot(TargetArgs),
}

impl Command {
    const fn label(&self) -> &'static str {
        match self {
            Self::Watch(_) => "watch",
            Self::Snapshot(_) => "snapshot",
        }
    }
}

/// Per-torrent collections to mirror next to the main data.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct TargetArgs {
    #[arg(long, value_name = "HASH", help = "Also mirror the peers of this torrent")]
    pub(crate) peers: Option<String>,
    #[arg(long, value_name = "HASH", help = "Also mirror the trackers of this torrent")]
    pub(crate) trackers: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub(crate) struct WatchArgs {
    #[command(flatten)]
    pub(crate) targets: TargetArgs,
    #[arg(long, value_name = "SECS", help = "Stop after this many seconds")]
    pub(crate) duration: Option<u64>,
    #[arg(long, help = "Print Prometheus metrics on exit")]
    pub(crate) metrics: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Parse the daemon URL provided to the CLI.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    input
        .parse::<Url>()
        .map_err(|err| format!("invalid URL '{input}': {err}"))
}
