//! Errors raised while registering, draining, or querying watched services.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced by the watch engine.
///
/// Registration failures ([`WatchError::PathTooLong`],
/// [`WatchError::ChannelCreateFailed`], [`WatchError::SubscribeFailed`]) abort
/// the whole bulk registration. [`WatchError::StatusUnavailable`] is scoped to
/// a single target and bulk queries skip it.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The caller supplied an argument the engine cannot act on.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the rejected argument.
        message: String,
    },

    /// The derived event directory path exceeds the platform limit.
    #[error("event path for '{path}' too long: {length} bytes exceeds limit of {limit}")]
    PathTooLong {
        /// Watched target whose event path was rejected.
        path: Utf8PathBuf,
        /// Bytes required for the event path, including the terminator.
        length: usize,
        /// Platform path limit.
        limit: usize,
    },

    /// Creating the event fifodir failed.
    #[error("failed to prepare event channel '{path}': {source}")]
    ChannelCreateFailed {
        /// Event directory that could not be prepared.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The notification backend refused the subscription.
    #[error("failed to subscribe to '{path}': {source}")]
    SubscribeFailed {
        /// Event directory the subscription targeted.
        path: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The status record of a target could not be read or decoded.
    #[error("status of '{path}' unavailable: {source}")]
    StatusUnavailable {
        /// Service directory whose status was requested.
        path: Utf8PathBuf,
        /// Underlying read or decode error.
        #[source]
        source: io::Error,
    },

    /// The notification backend could not be started.
    #[error("failed to start watch session: {source}")]
    SessionStart {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The session was never opened or has already been closed.
    #[error("no active watch session")]
    NoActiveSession,
}

impl WatchError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}
