//! Per-line blame data for one file revision.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

/// One annotated source line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnnotationLine {
    pub revision: String,
    pub author: String,
    /// False when the revision could not be attributed (e.g. uncommitted lines).
    pub enabled: bool,
}

/// Dense `(revision, author)` list, one element per line of the annotated file.
///
/// Built fresh for every request. The widest revision and author are tracked
/// while lines are added so renderers can align columns without a second pass.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Annotation {
    filename: String,
    lines: Vec<AnnotationLine>,
    widest_revision: usize,
    widest_author: usize,
    /// revision -> human readable description (author, date, message)
    descriptions: HashMap<String, String>,
    /// revision -> 1-based version number of the file (oldest is 1)
    file_versions: HashMap<String, usize>,
}

impl Annotation {
    pub fn new(filename: impl Into<String>) -> Self {
        Annotation {
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn add_line(&mut self, revision: impl Into<String>, author: impl Into<String>, enabled: bool) {
        let revision = revision.into();
        let author = author.into();
        self.widest_revision = self.widest_revision.max(revision.chars().count());
        self.widest_author = self.widest_author.max(author.chars().count());
        self.lines.push(AnnotationLine {
            revision,
            author,
            enabled,
        });
    }

    /// Number of annotated lines; equals the line count of the file revision.
    pub fn size(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[AnnotationLine] {
        &self.lines
    }

    /// Revision of 1-based `line`.
    pub fn revision(&self, line: usize) -> Option<&str> {
        self.line(line).map(|l| l.revision.as_str())
    }

    /// Author of 1-based `line`.
    pub fn author(&self, line: usize) -> Option<&str> {
        self.line(line).map(|l| l.author.as_str())
    }

    pub fn is_enabled(&self, line: usize) -> bool {
        self.line(line).is_some_and(|l| l.enabled)
    }

    fn line(&self, line: usize) -> Option<&AnnotationLine> {
        line.checked_sub(1).and_then(|idx| self.lines.get(idx))
    }

    pub fn widest_revision(&self) -> usize {
        self.widest_revision
    }

    pub fn widest_author(&self) -> usize {
        self.widest_author
    }

    /// Distinct revisions in first-seen order.
    pub fn revisions(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.lines
            .iter()
            .map(|line| line.revision.as_str())
            .filter(|rev| seen.insert(*rev))
            .collect()
    }

    pub fn set_description(&mut self, revision: impl Into<String>, description: impl Into<String>) {
        self.descriptions.insert(revision.into(), description.into());
    }

    pub fn description(&self, revision: &str) -> Option<&str> {
        self.descriptions.get(revision).map(String::as_str)
    }

    pub fn set_file_version(&mut self, revision: impl Into<String>, version: usize) {
        self.file_versions.insert(revision.into(), version);
    }

    pub fn file_version(&self, revision: &str) -> Option<usize> {
        self.file_versions.get(revision).copied()
    }

    /// Total number of known versions of the file.
    pub fn file_version_count(&self) -> usize {
        self.file_versions.values().copied().max().unwrap_or(0)
    }

    /// Label such as `"1/2"`: this revision's version number over the total.
    pub fn file_version_label(&self, revision: &str) -> Option<String> {
        self.file_version(revision)
            .map(|v| format!("{}/{}", v, self.file_version_count()))
    }
}
