//! Point-in-time status records of supervised services.
//!
//! A supervisor keeps a fixed-layout binary record at
//! `<service>/supervise/status`. Reading it is side-effect free and does not
//! involve the subscription machinery at all.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::WatchError;

const STATUS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::status");

/// Control directory maintained by the supervisor inside each service.
pub const CONTROL_DIR: &str = "supervise";
/// Status record file name inside [`CONTROL_DIR`].
pub const STATUS_FILE: &str = "status";
/// Size of the current status record layout.
pub const STATUS_SIZE: usize = 43;
/// Size of the legacy status record layout, which lacks the process group.
pub const LEGACY_STATUS_SIZE: usize = 35;

const TAI64_OFFSET: u64 = (1 << 62) + 10;

const FLAG_PAUSED: u8 = 0x01;
const FLAG_FINISHING: u8 = 0x02;
const FLAG_WANT_UP: u8 = 0x04;
const FLAG_READY: u8 = 0x08;

/// External TAI64N timestamp as stored in the status record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tai64N {
    seconds: u64,
    nanos: u32,
}

impl Tai64N {
    /// Builds a timestamp from its TAI64 label and nanoseconds.
    #[must_use]
    pub const fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// TAI64 label.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        self.seconds
    }

    /// Nanosecond part.
    #[must_use]
    pub const fn nanos(self) -> u32 {
        self.nanos
    }

    /// Seconds since the Unix epoch, ignoring leap seconds.
    ///
    /// Returns `None` for labels before the epoch.
    #[must_use]
    pub const fn unix_seconds(self) -> Option<u64> {
        self.seconds.checked_sub(TAI64_OFFSET)
    }
}

/// Decoded status record of one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    stamp: Tai64N,
    ready_stamp: Tai64N,
    pid: u64,
    pgid: Option<u64>,
    wstat: u16,
    flags: u8,
}

impl StatusSnapshot {
    /// Builds a snapshot carrying only the fields used for classification.
    #[must_use]
    pub const fn from_flags(process_present: bool, finishing: bool, ready: bool) -> Self {
        let mut flags = 0;
        if finishing {
            flags |= FLAG_FINISHING;
        }
        if ready {
            flags |= FLAG_READY;
        }
        Self {
            stamp: Tai64N::new(0, 0),
            ready_stamp: Tai64N::new(0, 0),
            pid: if process_present { 1 } else { 0 },
            pgid: None,
            wstat: 0,
            flags,
        }
    }

    /// Decodes a raw status record.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidData`] when the record has neither the
    /// current nor the legacy size.
    pub fn decode(record: &[u8]) -> io::Result<Self> {
        let (pgid, wstat_at) = match record.len() {
            STATUS_SIZE => (Some(be_u64(record, 32)?), 40),
            LEGACY_STATUS_SIZE => (None, 32),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "status record has {other} bytes, expected {STATUS_SIZE} or {LEGACY_STATUS_SIZE}"
                    ),
                ));
            }
        };
        let flags = *record
            .get(wstat_at + 2)
            .ok_or_else(|| truncated("flags"))?;
        Ok(Self {
            stamp: tai64n(record, 0)?,
            ready_stamp: tai64n(record, 12)?,
            pid: be_u64(record, 24)?,
            pgid,
            wstat: be_u16(record, wstat_at)?,
            flags,
        })
    }

    /// Whether a process is currently associated with the service.
    #[must_use]
    pub const fn process_present(&self) -> bool {
        self.pid != 0
    }

    /// Whether the service is in its finish phase.
    #[must_use]
    pub const fn finishing(&self) -> bool {
        self.flags & FLAG_FINISHING != 0
    }

    /// Whether the service declared itself ready.
    #[must_use]
    pub const fn ready(&self) -> bool {
        self.flags & FLAG_READY != 0
    }

    /// Whether the supervisor paused the service.
    #[must_use]
    pub const fn paused(&self) -> bool {
        self.flags & FLAG_PAUSED != 0
    }

    /// Whether the supervisor wants the service up.
    #[must_use]
    pub const fn want_up(&self) -> bool {
        self.flags & FLAG_WANT_UP != 0
    }

    /// Process id, or `None` when no process runs.
    #[must_use]
    pub const fn pid(&self) -> Option<u64> {
        if self.pid == 0 { None } else { Some(self.pid) }
    }

    /// Process group id; absent in legacy records.
    #[must_use]
    pub const fn pgid(&self) -> Option<u64> {
        self.pgid
    }

    /// Raw wait status of the last exit.
    #[must_use]
    pub const fn wstat(&self) -> u16 {
        self.wstat
    }

    /// Time of the last state change.
    #[must_use]
    pub const fn stamp(&self) -> Tai64N {
        self.stamp
    }

    /// Time the service last became ready.
    #[must_use]
    pub const fn ready_stamp(&self) -> Tai64N {
        self.ready_stamp
    }
}

/// Path of the status record inside a service directory.
#[must_use]
pub fn status_path(service: &Utf8Path) -> Utf8PathBuf {
    service.join(CONTROL_DIR).join(STATUS_FILE)
}

/// Reads the status record of one service directory.
///
/// # Errors
///
/// Returns [`WatchError::InvalidInput`] for an empty path and
/// [`WatchError::StatusUnavailable`] when the record is missing or malformed.
pub fn read_status(service: &Utf8Path) -> Result<StatusSnapshot, WatchError> {
    if service.as_str().is_empty() {
        return Err(WatchError::invalid_input("service path must not be empty"));
    }
    let path = status_path(service);
    fs::read(&path)
        .and_then(|record| StatusSnapshot::decode(&record))
        .map_err(|source| WatchError::StatusUnavailable {
            path: service.to_path_buf(),
            source,
        })
}

/// Reads the status of every service, skipping unreadable ones.
///
/// Results keep the order of `services`.
pub fn read_many<'a, I>(services: I) -> Vec<(&'a Utf8Path, StatusSnapshot)>
where
    I: IntoIterator<Item = &'a Utf8Path>,
{
    services
        .into_iter()
        .filter_map(|service| match read_status(service) {
            Ok(snapshot) => Some((service, snapshot)),
            Err(error) => {
                debug!(
                    target: STATUS_TARGET,
                    path = %service,
                    error = %error,
                    "skipping service without readable status"
                );
                None
            }
        })
        .collect()
}

fn truncated(field: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("status record truncated before {field}"),
    )
}

fn field<const N: usize>(record: &[u8], offset: usize) -> io::Result<[u8; N]> {
    record
        .get(offset..offset + N)
        .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
        .ok_or_else(|| truncated("field"))
}

#[expect(clippy::big_endian_bytes, reason = "status records are big-endian on disk")]
fn be_u64(record: &[u8], offset: usize) -> io::Result<u64> {
    let bytes = field::<8>(record, offset)?;
    Ok(u64::from_be_bytes(bytes))
}

#[expect(clippy::big_endian_bytes, reason = "status records are big-endian on disk")]
fn be_u32(record: &[u8], offset: usize) -> io::Result<u32> {
    let bytes = field::<4>(record, offset)?;
    Ok(u32::from_be_bytes(bytes))
}

#[expect(clippy::big_endian_bytes, reason = "status records are big-endian on disk")]
fn be_u16(record: &[u8], offset: usize) -> io::Result<u16> {
    let bytes = field::<2>(record, offset)?;
    Ok(u16::from_be_bytes(bytes))
}

fn tai64n(record: &[u8], offset: usize) -> io::Result<Tai64N> {
    Ok(Tai64N::new(be_u64(record, offset)?, be_u32(record, offset + 8)?))
}
