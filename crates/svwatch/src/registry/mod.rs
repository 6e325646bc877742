//! Subscription registry for watched services.
//!
//! [`register_all`] provisions the event channel of every target and
//! subscribes to it, recording which [`SubscriptionId`] belongs to which
//! label. The resulting [`Watches`] map is fixed for the life of a session.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::backend::{NotificationBackend, RepeatPolicy, SubscriptionId};
use crate::channel::{ChannelProvisioner, FifoDirFs};
use crate::error::WatchError;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Filter matching every event byte.
pub const ALL_EVENTS: &str = ".";

/// One supervised service directory being observed.
///
/// The path doubles as the label callers use to address the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchTarget {
    path: Utf8PathBuf,
}

impl WatchTarget {
    /// Validates and wraps a service directory path.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidInput`] for an empty path or a path
    /// containing a NUL byte.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Result<Self, WatchError> {
        let path = path.into();
        if path.as_str().is_empty() {
            return Err(WatchError::invalid_input("watched path must not be empty"));
        }
        if path.as_str().contains('\0') {
            return Err(WatchError::invalid_input(format!(
                "watched path {:?} contains a NUL byte",
                path.as_str()
            )));
        }
        Ok(Self { path })
    }

    /// Service directory.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Caller-facing key of the target.
    #[must_use]
    pub fn label(&self) -> &str {
        self.path.as_str()
    }
}

impl TryFrom<&str> for WatchTarget {
    type Error = WatchError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

/// A live subscription and the target it observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
    target: WatchTarget,
}

impl Subscription {
    /// Identifier assigned by the backend.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Observed target.
    #[must_use]
    pub const fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Label of the observed target.
    #[must_use]
    pub fn label(&self) -> &str {
        self.target.label()
    }
}

/// Insertion-ordered mapping from subscription id to target label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watches {
    subscriptions: Vec<Subscription>,
}

impl Watches {
    /// Label registered under `id`.
    #[must_use]
    pub fn label(&self, id: SubscriptionId) -> Option<&str> {
        self.subscriptions
            .iter()
            .find(|subscription| subscription.id == id)
            .map(Subscription::label)
    }

    /// First id registered for `label`.
    #[must_use]
    pub fn id_of(&self, label: &str) -> Option<SubscriptionId> {
        self.subscriptions
            .iter()
            .find(|subscription| subscription.label() == label)
            .map(Subscription::id)
    }

    /// Subscriptions in registration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.subscriptions.iter()
    }

    /// Watched service directories in registration order.
    pub fn targets(&self) -> impl Iterator<Item = &Utf8Path> {
        self.subscriptions
            .iter()
            .map(|subscription| subscription.target.path())
    }

    /// Number of subscriptions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns `true` when nothing is watched.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl<'a> IntoIterator for &'a Watches {
    type Item = &'a Subscription;
    type IntoIter = std::slice::Iter<'a, Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Provisions and subscribes every target, failing on the first error.
///
/// Every subscription uses [`ALL_EVENTS`] and [`RepeatPolicy::Repeat`]. On
/// failure the backend is ended, so no subscription made by this call
/// outlives it.
///
/// # Errors
///
/// Returns the first [`WatchError::InvalidInput`], [`WatchError::PathTooLong`]
/// or [`WatchError::ChannelCreateFailed`] raised while provisioning, or
/// [`WatchError::SubscribeFailed`] when the backend refuses a subscription.
pub fn register_all<B, F, I>(
    backend: &mut B,
    provisioner: &ChannelProvisioner<F>,
    targets: I,
) -> Result<Watches, WatchError>
where
    B: NotificationBackend,
    F: FifoDirFs,
    I: IntoIterator<Item = WatchTarget>,
{
    let mut subscriptions = Vec::new();
    for target in targets {
        match subscribe_target(backend, provisioner, &target) {
            Ok(id) => subscriptions.push(Subscription { id, target }),
            Err(error) => {
                debug!(
                    target: REGISTRY_TARGET,
                    path = %target.path(),
                    registered = subscriptions.len(),
                    "registration aborted; releasing subscriptions"
                );
                backend.end();
                return Err(error);
            }
        }
    }
    info!(
        target: REGISTRY_TARGET,
        count = subscriptions.len(),
        "registered watched services"
    );
    Ok(Watches { subscriptions })
}

fn subscribe_target<B: NotificationBackend, F: FifoDirFs>(
    backend: &mut B,
    provisioner: &ChannelProvisioner<F>,
    target: &WatchTarget,
) -> Result<SubscriptionId, WatchError> {
    let event_dir = provisioner.prepare_channel(target.path())?;
    let id = backend
        .subscribe(&event_dir, ALL_EVENTS, RepeatPolicy::Repeat)
        .map_err(|source| subscribe_failed(&event_dir, source))?;
    debug!(
        target: REGISTRY_TARGET,
        path = %target.path(),
        id = id.get(),
        "subscribed to event channel"
    );
    Ok(id)
}

fn subscribe_failed(event_dir: &Utf8Path, source: io::Error) -> WatchError {
    WatchError::SubscribeFailed {
        path: event_dir.to_path_buf(),
        source,
    }
}
