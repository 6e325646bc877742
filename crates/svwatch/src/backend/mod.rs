//! Notification mechanism underneath a watch session.
//!
//! A backend owns the pollable descriptor, the subscriptions and the queue
//! of pending subscription ids. Callers drive it in a fixed order: subscribe
//! every channel, then repeatedly refresh and drain the queue.

use std::fmt;
use std::io;
use std::num::NonZeroU16;
use std::os::fd::BorrowedFd;

use camino::Utf8Path;

mod fifo;
mod queue;

pub use fifo::{FIFO_MODE, FIFO_PREFIX, FifoBackend, UNMATCHED_LIMIT};
pub use queue::PendingQueue;

/// Identifier of one subscription within a session. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(NonZeroU16);

impl SubscriptionId {
    /// Wraps a raw id; `0` is reserved for failed subscriptions.
    #[must_use]
    pub const fn new(raw: u16) -> Option<Self> {
        match NonZeroU16::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Delivery policy of a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RepeatPolicy {
    /// Keep delivering every match for the lifetime of the session.
    #[default]
    Repeat,
    /// Stop listening after the first match.
    Once,
}

/// Upstream notification mechanism driven by a watch session.
pub trait NotificationBackend {
    /// Subscribes to the fifodir at `path`, delivering byte runs that match
    /// `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the listener cannot be created or no id is
    /// left to allocate.
    fn subscribe(
        &mut self,
        path: &Utf8Path,
        pattern: &str,
        policy: RepeatPolicy,
    ) -> io::Result<SubscriptionId>;

    /// Pulls every notification that already arrived into the pending queue.
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// Returns the OS error of a failed read; notifications queued before the
    /// failure stay queued.
    fn refresh(&mut self) -> io::Result<()>;

    /// Number of unacknowledged queue entries.
    fn pending_count(&self) -> usize;

    /// Queue entry at `index`, counted from the head.
    fn pending_id_at(&self, index: usize) -> Option<SubscriptionId>;

    /// Drops the first `count` entries from the queue.
    fn acknowledge(&mut self, count: usize);

    /// Moves the payload accumulated for `id` into `out`.
    ///
    /// Returns the number of bytes appended; `0` when nothing is waiting.
    fn decode(&mut self, id: SubscriptionId, out: &mut Vec<u8>) -> usize;

    /// Descriptor that becomes readable when notifications are waiting.
    fn poll_fd(&self) -> BorrowedFd<'_>;

    /// Releases every subscription. Later calls are no-ops.
    fn end(&mut self);
}
