//! Rendering of command results as text or JSON lines.

use std::io::Write;

use serde::Serialize;
use svwatch::{SnapshotCode, classify_event_code};

use crate::errors::AppError;

/// One drained notification.
#[derive(Debug, Serialize)]
pub(crate) struct EventRecord<'a> {
    pub(crate) label: &'a str,
    pub(crate) events: &'a str,
    pub(crate) states: Vec<&'static str>,
}

impl<'a> EventRecord<'a> {
    pub(crate) fn new(label: &'a str, events: &'a str) -> Self {
        let states = events
            .bytes()
            .map(|code| classify_event_code(code).name())
            .collect();
        Self {
            label,
            events,
            states,
        }
    }
}

/// Point-in-time state of one service.
#[derive(Debug, Serialize)]
pub(crate) struct StatusRecord<'a> {
    pub(crate) label: &'a str,
    pub(crate) code: char,
    pub(crate) state: &'static str,
    pub(crate) pid: Option<u64>,
}

impl<'a> StatusRecord<'a> {
    pub(crate) fn new(label: &'a str, code: SnapshotCode, pid: Option<u64>) -> Self {
        Self {
            label,
            code: code.as_char(),
            state: code.name(),
            pid,
        }
    }
}

pub(crate) fn write_event<W: Write>(
    out: &mut W,
    record: &EventRecord<'_>,
    json: bool,
) -> Result<(), AppError> {
    if json {
        return write_json(out, record);
    }
    writeln!(
        out,
        "{} {} {}",
        record.label,
        record.events,
        record.states.join(",")
    )?;
    Ok(())
}

pub(crate) fn write_status<W: Write>(
    out: &mut W,
    record: &StatusRecord<'_>,
    json: bool,
) -> Result<(), AppError> {
    if json {
        return write_json(out, record);
    }
    writeln!(out, "{} {} {}", record.label, record.code, record.state)?;
    Ok(())
}

fn write_json<W: Write, T: Serialize>(out: &mut W, record: &T) -> Result<(), AppError> {
    serde_json::to_writer(&mut *out, record)?;
    writeln!(out)?;
    Ok(())
}
