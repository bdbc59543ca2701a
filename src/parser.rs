//! Shared machinery for the per-VCS log parsers.
//!
//! Each VCS module defines a small `State` enum and a [`LineParser`] whose
//! `step` is the transition table: `(state, line) -> state`, writing into a
//! common [`EntryAccumulator`]. [`parse_lines`] drives it over a reader.

use std::fmt::Debug;
use std::io::BufRead;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

use crate::error::HistoryError;
use crate::history::{History, HistoryEntry};

// ─── Entry accumulator ──────────────────────────────────────────────

/// Collects entries as a parser walks a log.
///
/// At most one entry is open at a time; opening the next one seals the
/// previous.
#[derive(Debug, Default)]
pub struct EntryAccumulator {
    current: Option<HistoryEntry>,
    entries: Vec<HistoryEntry>,
}

impl EntryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seal any open entry and open a new one for `revision`.
    pub fn begin(&mut self, revision: impl Into<String>) -> &mut HistoryEntry {
        self.finish_entry();
        self.current.insert(HistoryEntry::new(revision, None, ""))
    }

    pub fn current(&mut self) -> Option<&mut HistoryEntry> {
        self.current.as_mut()
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Seal the open entry, if any, and add it to the output.
    pub fn finish_entry(&mut self) {
        if let Some(mut entry) = self.current.take() {
            entry.seal();
            self.entries.push(entry);
        }
    }

    /// Drop the open entry without emitting it.
    pub fn discard(&mut self) {
        self.current = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in the order they were produced.
    pub fn into_entries(mut self) -> Vec<HistoryEntry> {
        self.finish_entry();
        self.entries
    }
}

// ─── State machine driver ───────────────────────────────────────────

/// A line-oriented log parser expressed as a state transition function.
pub trait LineParser {
    type State: Copy + Eq + Debug;

    fn initial_state(&self) -> Self::State;

    /// Consume one line (without its terminator) and return the next state.
    fn step(&mut self, state: Self::State, line: &str, acc: &mut EntryAccumulator) -> Self::State;

    /// Called once at end of input.
    fn finish(&mut self, _state: Self::State, acc: &mut EntryAccumulator) {
        acc.finish_entry();
    }

    /// True when the tool prints oldest first and the result must be reversed.
    fn oldest_first(&self) -> bool {
        false
    }
}

/// Run `parser` over every line of `reader` and build a head-first history.
///
/// Bytes that are not valid UTF-8 are replaced, never rejected.
pub fn parse_lines<P: LineParser>(parser: &mut P, mut reader: impl BufRead) -> Result<History, HistoryError> {
    let mut acc = EntryAccumulator::new();
    let mut state = parser.initial_state();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        state = parser.step(state, line, &mut acc);
    }
    parser.finish(state, &mut acc);
    let mut entries = acc.into_entries();
    if parser.oldest_first() {
        entries.reverse();
    }
    Ok(History::from_entries(entries))
}

/// Convenience for in-memory output.
pub fn parse_bytes<P: LineParser>(parser: &mut P, bytes: &[u8]) -> Result<History, HistoryError> {
    parse_lines(parser, std::io::Cursor::new(bytes))
}

// ─── Dates ──────────────────────────────────────────────────────────

/// Parse `text` with the first matching chrono format.
///
/// Formats carrying an offset (`%z`, `%:z`, `%#z`) are tried as zoned times, the
/// rest as UTC wall-clock times; formats with no time part as UTC midnight.
pub fn parse_date(text: &str, formats: &[&str]) -> Option<DateTime<Utc>> {
    let text = text.trim();
    for fmt in formats {
        if fmt.contains("%z") || fmt.contains("%:z") || fmt.contains("%#z") {
            if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
        } else if fmt.contains("%H") {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
                return Some(dt.and_utc());
            }
        } else if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// [`parse_date`], logging unparsable input instead of failing the parse.
pub fn parse_date_or_warn(text: &str, formats: &[&str], revision: &str) -> Option<DateTime<Utc>> {
    let parsed = parse_date(text, formats);
    if parsed.is_none() {
        warn!(date = %text.trim(), revision = %revision, "Unparsable date in history, keeping entry without date");
    }
    parsed
}

// ─── Tests ──────────────────────────────────────────────────────────
