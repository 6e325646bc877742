//! Observer for supervised service directories.
//!
//! `svwatch` watches the event fifodirs of a fixed set of service
//! directories and decodes supervisor notifications into a small vocabulary
//! of named states. A [`WatchSession`] multiplexes every subscription onto a
//! single pollable descriptor. The caller blocks on that descriptor in its
//! own event loop and drains pending notifications with
//! [`WatchSession::wait`]. Point-in-time states are read straight from each
//! service's status record and never involve the subscriptions.
//!
//! ```rust,no_run
//! use svwatch::{WatchSession, WatchTarget};
//!
//! # fn main() -> Result<(), svwatch::WatchError> {
//! let target = WatchTarget::new("/run/service/web")?;
//! let mut session = WatchSession::open([target])?;
//! // Poll `session.poll_fd()` for readability, then:
//! for (label, events) in session.wait()? {
//!     println!("{label}: {events}");
//! }
//! # Ok(()) }
//! ```
//!
//! The session does not start, stop, or signal services; it only observes.

pub mod backend;
pub mod channel;
pub mod error;
pub mod registry;
pub mod session;
pub mod state;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

pub use self::backend::{FifoBackend, NotificationBackend, RepeatPolicy, SubscriptionId};
pub use self::channel::{ChannelConfig, ChannelProvisioner};
pub use self::error::WatchError;
pub use self::registry::{Subscription, WatchTarget, Watches};
pub use self::session::WatchSession;
pub use self::state::{SnapshotCode, StateCode, classify_event_code, classify_snapshot, state_name};
pub use self::status::{StatusSnapshot, read_many, read_status};
