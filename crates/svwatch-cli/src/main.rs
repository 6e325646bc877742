//! CLI entrypoint for the `svwatch` service observer.
//!
//! The binary delegates to [`svwatch_cli::run`], which parses arguments,
//! installs telemetry, and runs the selected command.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    svwatch_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
