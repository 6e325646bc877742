//! Error types for the CLI runtime.

use std::io;

use nix::errno::Errno;
use svwatch::WatchError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("failed to poll the watch descriptor: {0}")]
    Poll(Errno),
    #[error("no service status could be read")]
    NoReadableStatus,
    #[error("unknown event code '{code}'")]
    UnknownState { code: String },
    #[error("failed to serialise output: {0}")]
    Serialise(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Write(#[from] io::Error),
}
