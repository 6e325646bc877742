//! Watch sessions: one pollable descriptor multiplexing every watched
//! service.
//!
//! A [`WatchSession`] is opened once over a fixed target set. The caller
//! blocks on [`WatchSession::poll_fd`] in its own event loop and calls
//! [`WatchSession::wait`] once the descriptor is readable. Point-in-time
//! states are available through [`WatchSession::state`] and
//! [`WatchSession::current`] without touching the subscriptions.

use std::collections::BTreeMap;
use std::os::fd::BorrowedFd;

use camino::Utf8Path;
use tracing::{debug, warn};

use crate::backend::{FifoBackend, NotificationBackend};
use crate::channel::{ChannelConfig, ChannelProvisioner, FifoDirFs};
use crate::error::WatchError;
use crate::registry::{WatchTarget, Watches, register_all};
use crate::state::{SnapshotCode, classify_snapshot};
use crate::status::{read_many, read_status};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

#[derive(Debug)]
struct Live<B> {
    backend: B,
    watches: Watches,
}

/// Subscriptions for a fixed set of watched services.
///
/// Dropping the session closes it.
#[derive(Debug)]
pub struct WatchSession<B: NotificationBackend = FifoBackend> {
    live: Option<Live<B>>,
}

impl WatchSession {
    /// Opens a session over `targets` with the default channel configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::SessionStart`] when the pollable descriptor
    /// cannot be created, or the first registration error of the batch.
    pub fn open<I>(targets: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = WatchTarget>,
    {
        Self::open_with_config(ChannelConfig::default(), targets)
    }

    /// Opens a session provisioning event channels according to `config`.
    ///
    /// # Errors
    ///
    /// As [`WatchSession::open`].
    pub fn open_with_config<I>(config: ChannelConfig, targets: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = WatchTarget>,
    {
        let backend = FifoBackend::new().map_err(|source| WatchError::SessionStart { source })?;
        Self::open_with(backend, &ChannelProvisioner::new(config), targets)
    }
}

impl<B: NotificationBackend> WatchSession<B> {
    /// Opens a session over an arbitrary backend and provisioner.
    ///
    /// Registration is all-or-nothing: on failure the backend is ended and
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns the first registration error of the batch.
    pub fn open_with<F, I>(
        mut backend: B,
        provisioner: &ChannelProvisioner<F>,
        targets: I,
    ) -> Result<Self, WatchError>
    where
        F: FifoDirFs,
        I: IntoIterator<Item = WatchTarget>,
    {
        let watches = register_all(&mut backend, provisioner, targets)?;
        Ok(Self {
            live: Some(Live { backend, watches }),
        })
    }

    fn live(&self) -> Result<&Live<B>, WatchError> {
        self.live.as_ref().ok_or(WatchError::NoActiveSession)
    }

    /// Returns `true` until the session is closed.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.live.is_some()
    }

    /// Registered subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoActiveSession`] after [`WatchSession::close`].
    pub fn watches(&self) -> Result<&Watches, WatchError> {
        Ok(&self.live()?.watches)
    }

    /// Descriptor to poll for readability, or `None` once closed.
    #[must_use]
    pub fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.live.as_ref().map(|live| live.backend.poll_fd())
    }

    /// Drains every pending notification into a label-to-payload map.
    ///
    /// Never blocks. When a label is notified more than once in a single
    /// drain only its last payload is kept. Entries without a payload are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoActiveSession`] after [`WatchSession::close`].
    pub fn wait(&mut self) -> Result<BTreeMap<String, String>, WatchError> {
        let live = self.live.as_mut().ok_or(WatchError::NoActiveSession)?;
        if let Err(error) = live.backend.refresh() {
            warn!(
                target: SESSION_TARGET,
                error = %error,
                "refresh failed; draining notifications already queued"
            );
        }
        let pending = live.backend.pending_count();
        let mut events = BTreeMap::new();
        let mut payload = Vec::new();
        for index in 0..pending {
            let Some(id) = live.backend.pending_id_at(index) else {
                continue;
            };
            payload.clear();
            if live.backend.decode(id, &mut payload) == 0 {
                continue;
            }
            let Some(label) = live.watches.label(id) else {
                debug!(target: SESSION_TARGET, id = id.get(), "notification for unknown id");
                continue;
            };
            events.insert(
                label.to_owned(),
                String::from_utf8_lossy(&payload).into_owned(),
            );
        }
        live.backend.acknowledge(pending);
        debug!(
            target: SESSION_TARGET,
            pending,
            decoded = events.len(),
            "drained notifications"
        );
        Ok(events)
    }

    /// Point-in-time state of a registered target.
    ///
    /// Returns `Ok(None)` when the status record cannot be read.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidInput`] when `label` is not registered
    /// and [`WatchError::NoActiveSession`] after [`WatchSession::close`].
    pub fn state(&self, label: &str) -> Result<Option<SnapshotCode>, WatchError> {
        let live = self.live()?;
        if live.watches.id_of(label).is_none() {
            return Err(WatchError::invalid_input(format!(
                "'{label}' is not a watched service"
            )));
        }
        match read_status(Utf8Path::new(label)) {
            Ok(snapshot) => Ok(Some(classify_snapshot(&snapshot))),
            Err(WatchError::StatusUnavailable { path, source }) => {
                debug!(
                    target: SESSION_TARGET,
                    path = %path,
                    error = %source,
                    "status unavailable"
                );
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Point-in-time states of every readable target.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoActiveSession`] after [`WatchSession::close`].
    pub fn current(&self) -> Result<BTreeMap<String, SnapshotCode>, WatchError> {
        let live = self.live()?;
        Ok(read_many(live.watches.targets())
            .into_iter()
            .map(|(path, snapshot)| (path.as_str().to_owned(), classify_snapshot(&snapshot)))
            .collect())
    }

    /// Ends the backend and releases every subscription. Later calls are
    /// no-ops.
    pub fn close(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.backend.end();
            debug!(
                target: SESSION_TARGET,
                watched = live.watches.len(),
                "watch session closed"
            );
        }
    }
}

impl<B: NotificationBackend> Drop for WatchSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}
