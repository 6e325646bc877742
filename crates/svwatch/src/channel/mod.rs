//! Event channel provisioning.
//!
//! Every watched service exposes its transitions through a fifodir named
//! [`EVENT_DIR`] inside the service directory. Listeners drop FIFOs into that
//! directory and the supervisor writes one byte per transition into each of
//! them. The provisioner makes sure the fifodir exists with the group and
//! mode listeners expect before anything subscribes to it.

use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};

use camino::{Utf8Path, Utf8PathBuf};
use nix::unistd::{Gid, chown, getgid, getuid};
use serde::Deserialize;
use tracing::debug;

use crate::error::WatchError;

const CHANNEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::channel");

/// Name of the event fifodir inside a service directory.
pub const EVENT_DIR: &str = "event";

/// Longest path, terminator included, the platform accepts.
pub const PATH_LIMIT: usize = libc::PATH_MAX as usize;

/// Fifodir mode applied when a group is configured: setgid, sticky, owner
/// `rwx`, group `-wx`.
pub const DEFAULT_FIFODIR_MODE: u32 = 0o3730;

/// Fifodir mode applied when no group is configured: sticky and
/// world-writable.
pub const PUBLIC_FIFODIR_MODE: u32 = 0o1733;

/// Ownership and permission settings for new fifodirs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    group: Option<u32>,
    mode: u32,
    force: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            group: Some(getgid().as_raw()),
            mode: DEFAULT_FIFODIR_MODE,
            force: false,
        }
    }
}

impl ChannelConfig {
    /// Overrides the owning group; `None` publishes the fifodir to everyone.
    #[must_use]
    pub const fn with_group(mut self, group: Option<u32>) -> Self {
        self.group = group;
        self
    }

    /// Overrides the mode applied when a group is configured.
    #[must_use]
    pub const fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Re-applies ownership and mode to fifodirs that already exist.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Group that owns new fifodirs.
    #[must_use]
    pub const fn group(&self) -> Option<u32> {
        self.group
    }

    /// Mode applied to new fifodirs.
    #[must_use]
    pub const fn effective_mode(&self) -> u32 {
        if self.group.is_some() {
            self.mode
        } else {
            PUBLIC_FIFODIR_MODE
        }
    }

    /// Whether existing fifodirs are re-permissioned.
    #[must_use]
    pub const fn force(&self) -> bool {
        self.force
    }
}

/// Filesystem operations needed to provision a fifodir.
pub trait FifoDirFs {
    /// Ensures `path` is a fifodir configured according to `config`.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the first failing operation.
    fn make_fifodir(&self, path: &Utf8Path, config: &ChannelConfig) -> io::Result<()>;
}

/// [`FifoDirFs`] backed by the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFifoDirFs;

impl FifoDirFs for SystemFifoDirFs {
    fn make_fifodir(&self, path: &Utf8Path, config: &ChannelConfig) -> io::Result<()> {
        let mut builder = DirBuilder::new();
        builder.mode(0o700);
        match builder.create(path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                let metadata = fs::metadata(path)?;
                if metadata.uid() != getuid().as_raw() {
                    return Err(io::Error::from_raw_os_error(libc::EACCES));
                }
                if !metadata.is_dir() {
                    return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
                }
                if !config.force() {
                    return Ok(());
                }
            }
            Err(error) => return Err(error),
        }
        if let Some(group) = config.group() {
            chown(path.as_std_path(), None, Some(Gid::from_raw(group)))?;
        }
        fs::set_permissions(path, Permissions::from_mode(config.effective_mode()))
    }
}

/// Derives and prepares event channels for watched services.
#[derive(Debug, Clone, Default)]
pub struct ChannelProvisioner<F = SystemFifoDirFs> {
    fs: F,
    config: ChannelConfig,
}

impl ChannelProvisioner {
    /// Builds a provisioner using the host filesystem.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_fs(SystemFifoDirFs, config)
    }
}

impl<F: FifoDirFs> ChannelProvisioner<F> {
    /// Builds a provisioner over an arbitrary filesystem collaborator.
    pub const fn with_fs(fs: F, config: ChannelConfig) -> Self {
        Self { fs, config }
    }

    /// Active configuration.
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Ensures the event fifodir of `target` exists and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidInput`] or [`WatchError::PathTooLong`]
    /// without touching the filesystem, and
    /// [`WatchError::ChannelCreateFailed`] when the fifodir cannot be made.
    pub fn prepare_channel(&self, target: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
        let event_dir = event_path(target)?;
        self.fs
            .make_fifodir(&event_dir, &self.config)
            .map_err(|source| WatchError::ChannelCreateFailed {
                path: event_dir.clone(),
                source,
            })?;
        debug!(
            target: CHANNEL_TARGET,
            path = %event_dir,
            group = ?self.config.group(),
            mode = format_args!("{:o}", self.config.effective_mode()),
            "event channel ready"
        );
        Ok(event_dir)
    }
}

/// Computes `<target>/event`, enforcing the platform path limit.
///
/// # Errors
///
/// Returns [`WatchError::InvalidInput`] for empty paths or paths containing a
/// NUL byte and [`WatchError::PathTooLong`] when the result would not fit in
/// [`PATH_LIMIT`].
pub fn event_path(target: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
    let raw = target.as_str();
    if raw.is_empty() {
        return Err(WatchError::invalid_input("watched path must not be empty"));
    }
    if raw.contains('\0') {
        return Err(WatchError::invalid_input(format!(
            "watched path {raw:?} contains a NUL byte"
        )));
    }
    let length = raw.len() + 1 + EVENT_DIR.len() + 1;
    if length > PATH_LIMIT {
        return Err(WatchError::PathTooLong {
            path: target.to_path_buf(),
            length,
            limit: PATH_LIMIT,
        });
    }
    Ok(Utf8PathBuf::from(format!("{raw}/{EVENT_DIR}")))
}

#[cfg(test)]
mod tests;
