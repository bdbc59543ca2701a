//! Core history data model: [`HistoryEntry`], head-first [`History`] and sparse [`LineInfo`].
//!
//! Every `History` is ordered most-recent-first. Parsers, caches and the
//! incremental-truncation path all rely on that ordering.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;

// ─── HistoryEntry ───────────────────────────────────────────────────

/// One changeset as seen by a file or directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Opaque VCS revision: a hash, a dotted number or a sequence number.
    pub revision: String,
    pub date: Option<DateTime<Utc>>,
    pub author: String,
    pub message: String,
    /// False for placeholder entries (e.g. ClearCase non-version events).
    pub active: bool,
    /// Tag names attached by [`crate::tag::assign_tags`], comma separated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    /// Repository-root-relative paths, `/` separated. Filled only for directory queries.
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub files: BTreeSet<String>,
}

impl HistoryEntry {
    pub fn new(revision: impl Into<String>, date: Option<DateTime<Utc>>, author: impl Into<String>) -> Self {
        HistoryEntry {
            revision: revision.into(),
            date,
            author: author.into(),
            message: String::new(),
            active: true,
            tags: None,
            files: BTreeSet::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Append one line of commit message. Blank lines are swallowed.
    pub fn append_message(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.message.push_str(line);
        self.message.push('\n');
    }

    pub fn add_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !path.is_empty() {
            self.files.insert(path);
        }
    }

    /// Finish an entry built line by line: drop the trailing newline of the message.
    pub fn seal(&mut self) {
        let trimmed = self.message.trim_end().len();
        self.message.truncate(trimmed);
    }

    pub fn strip_files(&mut self) {
        self.files.clear();
    }

    pub fn add_tag(&mut self, tag: &str) {
        match &mut self.tags {
            Some(tags) => {
                tags.push_str(", ");
                tags.push_str(tag);
            }
            None => self.tags = Some(tag.to_string()),
        }
    }
}

// ─── LineInfo ───────────────────────────────────────────────────────

/// Sparse per-line pointer into [`History::entries`].
///
/// A line without its own `LineInfo` inherits the entry of the nearest
/// preceding one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfo {
    /// 1-based line number where a run starts.
    pub line: u32,
    /// Index into the owning history's entries; `None` for lines whose
    /// revision is not part of the history.
    pub entry: Option<usize>,
}

// ─── History ────────────────────────────────────────────────────────

/// Ordered list of changesets, most recent first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    line_info: Vec<LineInfo>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap entries that are already head-first.
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        History {
            entries,
            line_info: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<HistoryEntry> {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Revision of the newest entry.
    pub fn head_revision(&self) -> Option<&str> {
        self.entries.first().map(|e| e.revision.as_str())
    }

    /// `limit` entries starting at `offset` (0-based, head-first).
    /// A `limit` of 0 means "everything from `offset`".
    pub fn page(&self, limit: usize, offset: usize) -> &[HistoryEntry] {
        let start = offset.min(self.entries.len());
        let end = if limit == 0 {
            self.entries.len()
        } else {
            start.saturating_add(limit).min(self.entries.len())
        };
        &self.entries[start..end]
    }

    pub fn has_file_list(&self) -> bool {
        self.entries.iter().any(|e| !e.files.is_empty())
    }

    pub fn has_tags(&self) -> bool {
        self.entries.iter().any(|e| e.tags.is_some())
    }

    pub fn strip_files(&mut self) {
        for entry in &mut self.entries {
            entry.strip_files();
        }
    }

    /// Prepend a newer history, dropping entries of `self` whose revision
    /// already appears in `newer`.
    pub fn prepend(&mut self, newer: History) {
        let seen: HashSet<&str> = newer.entries.iter().map(|e| e.revision.as_str()).collect();
        let older: Vec<HistoryEntry> = self
            .entries
            .drain(..)
            .filter(|e| !seen.contains(e.revision.as_str()))
            .collect();
        let mut merged = newer.entries;
        merged.extend(older);
        self.entries = merged;
        self.line_info.clear();
    }

    // ─── Line attribution ──────────────────────────────────────────

    pub fn line_info(&self) -> &[LineInfo] {
        &self.line_info
    }

    /// Compress an annotation into sparse [`LineInfo`] runs.
    ///
    /// Annotation revisions are matched against entry revisions (Mercurial
    /// annotations carry only the local number, matched against `N:hash`).
    /// Lines whose revision is unknown start a run without a pointer.
    pub fn attach_annotation(&mut self, annotation: &Annotation) {
        self.line_info.clear();
        let mut current: Option<Option<usize>> = None;
        for (idx, line) in annotation.lines().iter().enumerate() {
            let found = self.position_of(&line.revision);
            if current != Some(found) {
                self.line_info.push(LineInfo {
                    line: idx as u32 + 1,
                    entry: found,
                });
                current = Some(found);
            }
        }
    }

    /// History entry responsible for 1-based `line`, if line info is attached.
    pub fn entry_for_line(&self, line: u32) -> Option<&HistoryEntry> {
        let pos = self.line_info.partition_point(|li| li.line <= line);
        if pos == 0 {
            return None;
        }
        self.line_info[pos - 1].entry.and_then(|idx| self.entries.get(idx))
    }

    pub fn position_of(&self, revision: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| revision_matches(&e.revision, revision))
    }
}

/// Compare a full revision with a possibly abbreviated one
/// (`3:8a7b6c5d4e3f` vs `3`, full git hash vs short hash).
pub fn revision_matches(full: &str, candidate: &str) -> bool {
    if full == candidate {
        return true;
    }
    if let Some((local, _)) = full.split_once(':') {
        if local == candidate {
            return true;
        }
    }
    full.len() >= 40
        && candidate.len() >= 7
        && candidate.chars().all(|c| c.is_ascii_hexdigit())
        && full.starts_with(candidate)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
