//! Command-line runtime for the `svwatch` service observer.
//!
//! The runtime owns argument parsing, telemetry bootstrapping, and the three
//! commands. It writes through caller-supplied streams so tests can capture
//! output without spawning the binary.

use std::ffi::OsString;
use std::io::Write;
use std::os::fd::BorrowedFd;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use svwatch::{
    ChannelConfig, WatchSession, WatchTarget, classify_snapshot, read_many, state_name,
};
use tracing::{debug, info};

mod cli;
mod errors;
pub mod logging;
mod output;
pub mod telemetry;

use cli::{Cli, CliCommand, StateArgs, StatusArgs, WatchArgs};
use errors::AppError;
pub use logging::LogFormat;
use output::{EventRecord, StatusRecord, write_event, write_status};

const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Exit status for command-line usage errors.
const USAGE_EXIT: u8 = 2;

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return render_usage(&error, stdout, stderr),
    };
    match execute(&cli, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "svwatch: {error}");
            ExitCode::FAILURE
        }
    }
}

fn render_usage<W: Write, E: Write>(
    error: &clap::Error,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode {
    let rendered = error.render();
    if error.use_stderr() {
        let _ = write!(stderr, "{rendered}");
        ExitCode::from(USAGE_EXIT)
    } else {
        let _ = write!(stdout, "{rendered}");
        ExitCode::SUCCESS
    }
}

fn execute<W: Write>(cli: &Cli, stdout: &mut W) -> Result<(), AppError> {
    telemetry::initialise(&cli.log_filter, cli.log_format)?;
    match &cli.command {
        CliCommand::Watch(args) => watch(args, cli.json, stdout),
        CliCommand::Status(args) => status(args, cli.json, stdout),
        CliCommand::State(args) => state(args, stdout),
    }
}

fn watch<W: Write>(args: &WatchArgs, json: bool, stdout: &mut W) -> Result<(), AppError> {
    let targets = args
        .dirs
        .iter()
        .map(|dir| WatchTarget::new(dir.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let mut config = ChannelConfig::default().with_force(args.force);
    if let Some(group) = args.group {
        config = config.with_group(Some(group));
    }
    let mut session = WatchSession::open_with_config(config, targets)?;
    let timeout = poll_timeout(args.timeout_ms);
    let mut delivered = 0_usize;
    while args.count.is_none_or(|limit| delivered < limit) {
        let Some(fd) = session.poll_fd() else {
            break;
        };
        if !wait_readable(fd, timeout)? {
            info!(target: CLI_TARGET, delivered, "no notification before the timeout");
            break;
        }
        for (label, events) in session.wait()? {
            write_event(stdout, &EventRecord::new(&label, &events), json)?;
            delivered += 1;
        }
        stdout.flush()?;
    }
    session.close();
    Ok(())
}

fn poll_timeout(timeout_ms: Option<u32>) -> PollTimeout {
    timeout_ms.map_or(PollTimeout::NONE, |millis| {
        PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
    })
}

/// Blocks until `fd` is readable. Returns `false` on timeout.
fn wait_readable(fd: BorrowedFd<'_>, timeout: PollTimeout) -> Result<bool, AppError> {
    loop {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => debug!(target: CLI_TARGET, "poll interrupted; retrying"),
            Err(errno) => return Err(AppError::Poll(errno)),
        }
    }
}

fn status<W: Write>(args: &StatusArgs, json: bool, stdout: &mut W) -> Result<(), AppError> {
    let snapshots = read_many(args.dirs.iter().map(Utf8PathBuf::as_path));
    if snapshots.is_empty() {
        return Err(AppError::NoReadableStatus);
    }
    for (path, snapshot) in snapshots {
        let record = StatusRecord::new(path.as_str(), classify_snapshot(&snapshot), snapshot.pid());
        write_status(stdout, &record, json)?;
    }
    Ok(())
}

fn state<W: Write>(args: &StateArgs, stdout: &mut W) -> Result<(), AppError> {
    let name = state_name(&args.code).ok_or_else(|| AppError::UnknownState {
        code: args.code.clone(),
    })?;
    writeln!(stdout, "{name}")?;
    Ok(())
}
