//! CLI argument definitions for `svwatch`.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use crate::logging::LogFormat;

/// Observer for supervised service directories.
#[derive(Parser, Debug)]
#[command(name = "svwatch", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Tracing filter directives, for example `svwatch=debug`.
    #[arg(long, global = true, default_value = "warn")]
    pub(crate) log_filter: String,
    /// Diagnostic log format written to stderr.
    #[arg(long, global = true, default_value_t = LogFormat::Compact)]
    pub(crate) log_format: LogFormat,
    /// Emits one JSON object per line instead of plain text.
    #[arg(long, global = true)]
    pub(crate) json: bool,
    /// Command to run.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Commands understood by `svwatch`.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Prints supervisor notifications as they arrive.
    Watch(WatchArgs),
    /// Prints the point-in-time state of services.
    Status(StatusArgs),
    /// Names a raw event code.
    State(StateArgs),
}

/// Arguments of `svwatch watch`.
#[derive(Args, Debug, Clone)]
pub(crate) struct WatchArgs {
    /// Service directories to watch.
    #[arg(value_name = "DIR", required = true)]
    pub(crate) dirs: Vec<Utf8PathBuf>,
    /// Gives up after waiting this many milliseconds without a notification.
    #[arg(long, value_name = "MS")]
    pub(crate) timeout_ms: Option<u32>,
    /// Stops after this many drained notifications.
    #[arg(long, value_name = "N")]
    pub(crate) count: Option<usize>,
    /// Group owning newly created event directories.
    #[arg(long, value_name = "GID")]
    pub(crate) group: Option<u32>,
    /// Re-applies ownership and mode to existing event directories.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Arguments of `svwatch status`.
#[derive(Args, Debug, Clone)]
pub(crate) struct StatusArgs {
    /// Service directories to inspect.
    #[arg(value_name = "DIR", required = true)]
    pub(crate) dirs: Vec<Utf8PathBuf>,
}

/// Arguments of `svwatch state`.
#[derive(Args, Debug, Clone)]
pub(crate) struct StateArgs {
    /// Single-character event code, for example `U`.
    #[arg(value_name = "CODE")]
    pub(crate) code: String,
}
