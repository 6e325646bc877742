//! Classification of raw supervision codes into named states.
//!
//! Two alphabets meet here and must stay apart. Event codes are the single
//! bytes a supervisor writes into a fifodir when a service transitions
//! (`s`tart, `u`p, `U` ready, `d` finish, `D` down, `O` once, `x` exit).
//! Snapshot codes are derived from a point-in-time status record through the
//! fixed `dDuU` table. Some names overlap, the meanings do not.

use std::fmt;

use crate::status::StatusSnapshot;

/// Stable vocabulary of service states exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCode {
    /// The supervisor is spawning the service.
    Start,
    /// A service process is running.
    Up,
    /// The service declared itself ready.
    Ready,
    /// The service process died and its finish script runs.
    Finish,
    /// The service is down.
    Down,
    /// The service was started in one-shot mode.
    Once,
    /// The supervisor itself exited.
    Exit,
    /// The raw code was not recognised.
    Unknown,
}

impl StateCode {
    /// Returns the canonical lower-case name of the state.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Up => "up",
            Self::Ready => "ready",
            Self::Finish => "finish",
            Self::Down => "down",
            Self::Once => "once",
            Self::Exit => "exit",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `true` unless the state is [`StateCode::Unknown`].
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Maps a single event byte to its state.
#[must_use]
pub const fn classify_event_code(code: u8) -> StateCode {
    match code {
        b'd' => StateCode::Finish,
        b'D' => StateCode::Down,
        b'u' => StateCode::Up,
        b'U' => StateCode::Ready,
        b's' => StateCode::Start,
        b'O' => StateCode::Once,
        b'x' => StateCode::Exit,
        _ => StateCode::Unknown,
    }
}

/// Names the state encoded by the first byte of `code`.
///
/// Returns `None` for an empty string or an unrecognised code.
#[must_use]
pub fn state_name(code: &str) -> Option<&'static str> {
    let first = *code.as_bytes().first()?;
    let state = classify_event_code(first);
    state.is_known().then_some(state.name())
}

/// Positional lookup table for snapshot classification.
const SNAPSHOT_TABLE: &[u8; 4] = b"dDuU";

/// Point-in-time state derived from a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotCode {
    /// No running process and no readiness (`d`).
    Down,
    /// Ready flag set without a running process (`D`). Not produced by a
    /// consistent supervisor; kept because the table yields it.
    ReadyWithoutProcess,
    /// A process runs and has not declared readiness (`u`).
    Up,
    /// A process runs and declared readiness (`U`).
    Ready,
}

impl SnapshotCode {
    const fn from_table(code: u8) -> Self {
        match code {
            b'D' => Self::ReadyWithoutProcess,
            b'u' => Self::Up,
            b'U' => Self::Ready,
            _ => Self::Down,
        }
    }

    /// Raw table character for this code.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Down => 'd',
            Self::ReadyWithoutProcess => 'D',
            Self::Up => 'u',
            Self::Ready => 'U',
        }
    }

    /// Human-readable name of the snapshot code.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::ReadyWithoutProcess => "ready-without-process",
            Self::Up => "up",
            Self::Ready => "ready",
        }
    }

    /// Normalises the snapshot code into the shared [`StateCode`] vocabulary.
    ///
    /// Without a process the service is down, whatever the ready flag says.
    #[must_use]
    pub const fn state(self) -> StateCode {
        match self {
            Self::Down | Self::ReadyWithoutProcess => StateCode::Down,
            Self::Up => StateCode::Up,
            Self::Ready => StateCode::Ready,
        }
    }
}

impl fmt::Display for SnapshotCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Derives the snapshot code of a status record.
///
/// The index is `2` when a process is present and not finishing, plus `1`
/// when the ready flag is set; it selects a position in `dDuU`.
#[must_use]
pub fn classify_snapshot(snapshot: &StatusSnapshot) -> SnapshotCode {
    let mut index = if snapshot.process_present() && !snapshot.finishing() {
        2
    } else {
        0
    };
    index += usize::from(snapshot.ready());
    SNAPSHOT_TABLE
        .get(index)
        .copied()
        .map_or(SnapshotCode::Down, SnapshotCode::from_table)
}
