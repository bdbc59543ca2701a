//! The [`Repository`] capability trait, shared repository plumbing and the
//! bulk cache population state machine.
//!
//! Each supported VCS lives in its own submodule with its repository type
//! and its log parser side by side. [`factory`] picks one of them for a
//! directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::annotation::Annotation;
use crate::cache::HistoryCache;
use crate::error::HistoryError;
use crate::executor::{CommandEnv, Executor};
use crate::history::History;
use crate::tag::TagEntry;
use crate::{canonical_or_normalized, relative_slash_path};

pub mod accurev;
pub mod bazaar;
pub mod clearcase;
pub mod cvs;
pub mod factory;
pub mod git;
pub mod mercurial;
pub mod monotone;
pub mod perforce;
pub mod rcs;
pub mod sccs;
pub mod subversion;

// ─── Kinds ──────────────────────────────────────────────────────────

/// Every supported version-control system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepositoryKind {
    Mercurial,
    AccuRev,
    Bazaar,
    Git,
    Monotone,
    Subversion,
    Sccs,
    ClearCase,
    Perforce,
    Rcs,
    Cvs,
}

impl RepositoryKind {
    pub const ALL: [RepositoryKind; 11] = [
        RepositoryKind::Mercurial,
        RepositoryKind::AccuRev,
        RepositoryKind::Bazaar,
        RepositoryKind::Git,
        RepositoryKind::Monotone,
        RepositoryKind::Subversion,
        RepositoryKind::Sccs,
        RepositoryKind::ClearCase,
        RepositoryKind::Perforce,
        RepositoryKind::Rcs,
        RepositoryKind::Cvs,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            RepositoryKind::Mercurial => "Mercurial",
            RepositoryKind::AccuRev => "AccuRev",
            RepositoryKind::Bazaar => "Bazaar",
            RepositoryKind::Git => "Git",
            RepositoryKind::Monotone => "Monotone",
            RepositoryKind::Subversion => "Subversion",
            RepositoryKind::Sccs => "SCCS",
            RepositoryKind::ClearCase => "ClearCase",
            RepositoryKind::Perforce => "Perforce",
            RepositoryKind::Rcs => "RCS",
            RepositoryKind::Cvs => "CVS",
        }
    }

    /// Key used for executable overrides in the configuration.
    pub fn key(self) -> &'static str {
        match self {
            RepositoryKind::Mercurial => "hg",
            RepositoryKind::AccuRev => "accurev",
            RepositoryKind::Bazaar => "bzr",
            RepositoryKind::Git => "git",
            RepositoryKind::Monotone => "mtn",
            RepositoryKind::Subversion => "svn",
            RepositoryKind::Sccs => "sccs",
            RepositoryKind::ClearCase => "cleartool",
            RepositoryKind::Perforce => "p4",
            RepositoryKind::Rcs => "rlog",
            RepositoryKind::Cvs => "cvs",
        }
    }

    pub fn default_program(self) -> &'static str {
        self.key()
    }

    /// Arguments of the cheap "does the client run" probe.
    pub fn probe_args(self) -> &'static [&'static str] {
        match self {
            RepositoryKind::AccuRev => &["info"],
            RepositoryKind::Sccs => &["help", "help"],
            RepositoryKind::ClearCase => &["-version"],
            RepositoryKind::Perforce => &["-V"],
            _ => &["--version"],
        }
    }

    /// Date format (chrono syntax) the client prints in its log.
    pub fn date_pattern(self) -> &'static str {
        match self {
            RepositoryKind::Mercurial => mercurial::DATE_FORMAT,
            RepositoryKind::AccuRev => accurev::DATE_FORMAT,
            RepositoryKind::Bazaar => bazaar::DATE_FORMAT,
            RepositoryKind::Git => git::DATE_FORMAT,
            RepositoryKind::Monotone => monotone::DATE_FORMAT,
            RepositoryKind::Subversion => subversion::DATE_FORMAT,
            RepositoryKind::Sccs => sccs::DATE_FORMAT,
            RepositoryKind::ClearCase => clearcase::DATE_FORMAT,
            RepositoryKind::Perforce => perforce::DATE_FORMAT,
            RepositoryKind::Rcs | RepositoryKind::Cvs => cvs::DATE_FORMAT,
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── RepositoryInfo ─────────────────────────────────────────────────

/// Plain description of a registered repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Canonical root directory; the cache key prefix.
    pub directory: PathBuf,
    pub kind: RepositoryKind,
    /// `None` until the client has been probed.
    pub working: Option<bool>,
    pub remote: bool,
    pub date_pattern: String,
    /// Resolved client executable.
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
}

impl RepositoryInfo {
    pub fn new(directory: PathBuf, kind: RepositoryKind, commands: &CommandEnv) -> Self {
        RepositoryInfo {
            directory,
            kind,
            working: None,
            remote: false,
            date_pattern: kind.date_pattern().to_string(),
            command: commands.program(kind),
            parent: None,
            branch: None,
        }
    }
}

// ─── Repository trait ───────────────────────────────────────────────

/// One working copy of one VCS.
///
/// All paths passed in are absolute. Revisions are the VCS's own strings.
pub trait Repository: Send + Sync + fmt::Debug {
    fn info(&self) -> &RepositoryInfo;

    fn commands(&self) -> &CommandEnv;

    fn kind(&self) -> RepositoryKind {
        self.info().kind
    }

    fn directory(&self) -> &Path {
        &self.info().directory
    }

    /// Whether the client tool can be run. Memoized per kind.
    fn is_working(&self) -> bool {
        self.commands().is_working(self.kind())
    }

    fn is_remote(&self) -> bool {
        self.info().remote
    }

    fn has_history(&self, _file: &Path) -> bool {
        true
    }

    /// Whether a log of the repository root lists touched files, which
    /// bulk cache population depends on.
    fn has_history_for_directories(&self) -> bool;

    fn supports_annotation(&self, file: &Path) -> bool {
        !file.is_dir()
    }

    /// Whether nested independent roots may live below this one.
    fn supports_sub_repositories(&self) -> bool {
        false
    }

    /// Full head-first history of a file or directory.
    fn history(&self, file: &Path) -> Result<History, HistoryError>;

    /// Entries strictly newer than `since`; the full history when `since` is `None`.
    ///
    /// The default fetches everything and truncates at `since`.
    fn history_since(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        let full = self.history(file)?;
        match since {
            None => Ok(full),
            Some(rev) => truncate_at_revision(full, rev),
        }
    }

    /// File content as of `revision`. `parent` is the directory holding `basename`.
    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError>;

    /// Blame for the current or the given revision.
    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError>;

    /// Pull upstream changes into the working copy.
    fn update(&self) -> Result<(), HistoryError> {
        Err(HistoryError::Unsupported {
            kind: self.kind(),
            operation: "update",
        })
    }

    /// Tags known to the repository, for [`crate::tag::assign_tags`].
    fn tags(&self) -> Result<Vec<TagEntry>, HistoryError> {
        Ok(Vec::new())
    }

    /// Current description, including the probe result if one ran.
    fn snapshot(&self) -> RepositoryInfo {
        let mut info = self.info().clone();
        info.working = self.commands().working_state(self.kind());
        info
    }
}

// ─── Incremental truncation ─────────────────────────────────────────

/// Keep the entries of a head-first `history` newer than `since`.
///
/// Everything up to and including the first entry equal to `since` is kept,
/// then [`remove_and_verify_oldest`] checks the boundary. A missing `since`
/// means history was rewritten and is reported as
/// [`HistoryError::IncrementalBoundary`].
pub fn truncate_at_revision(history: History, since: &str) -> Result<History, HistoryError> {
    let mut entries = history.into_entries();
    if let Some(pos) = entries.iter().position(|e| e.revision == since) {
        entries.truncate(pos + 1);
    }
    let mut history = History::from_entries(entries);
    remove_and_verify_oldest(&mut history, since)?;
    Ok(history)
}

/// Pop the oldest entry and check that it is the `since` boundary.
pub fn remove_and_verify_oldest(history: &mut History, since: &str) -> Result<(), HistoryError> {
    let boundary = history.entries_mut().pop();
    match boundary {
        Some(entry) if entry.revision == since => Ok(()),
        other => Err(HistoryError::IncrementalBoundary {
            expected: since.to_string(),
            found: other.map(|e| e.revision),
        }),
    }
}

// ─── Bulk cache population ──────────────────────────────────────────

/// Populate `cache` with the repository's directory-level history.
///
/// No-op for repositories that are not working or cannot list directory
/// history. A failed incremental fetch falls back to a full fetch, and the
/// repository's own cache is invalidated before the full history is stored.
/// Nested repositories keep their caches.
pub fn create_cache(
    repo: &dyn Repository,
    cache: &dyn HistoryCache,
    since: Option<&str>,
) -> Result<(), HistoryError> {
    let dir = repo.directory();
    if !repo.is_working() {
        debug!(repo = %dir.display(), kind = %repo.kind(), "Skipping cache creation, client not working");
        return Ok(());
    }
    if !repo.has_history_for_directories() {
        debug!(repo = %dir.display(), kind = %repo.kind(), "Skipping cache creation, no directory history");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let history = match repo.history_since(dir, since) {
        Ok(h) => h,
        Err(e) if since.is_some() => {
            warn!(
                repo = %dir.display(),
                since = since.unwrap_or_default(),
                error = %e,
                "Incremental history fetch failed, rebuilding from full history"
            );
            let full = repo.history(dir)?;
            cache.invalidate(repo)?;
            full
        }
        Err(e) => return Err(e),
    };

    let count = history.len();
    cache.store(&history, repo)?;
    info!(
        repo = %dir.display(),
        kind = %repo.kind(),
        entries = count,
        incremental = since.is_some(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "History cache updated"
    );
    Ok(())
}

// ─── Shared plumbing for implementations ────────────────────────────

/// Fields every repository implementation carries.
#[derive(Debug)]
pub(crate) struct RepoBase {
    pub info: RepositoryInfo,
    pub commands: Arc<CommandEnv>,
}

impl RepoBase {
    pub fn new(directory: PathBuf, kind: RepositoryKind, commands: Arc<CommandEnv>) -> Self {
        RepoBase {
            info: RepositoryInfo::new(directory, kind, &commands),
            commands,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.info.directory
    }

    /// Executor for the main client, running in the repository root.
    pub fn cmd(&self) -> Executor {
        self.commands.executor(self.info.kind, &self.info.directory)
    }

    /// Executor for the main client, running in `cwd`.
    pub fn cmd_in(&self, cwd: &Path) -> Executor {
        self.commands.executor(self.info.kind, cwd)
    }

    /// `file` relative to the repository root, `/` separated; `""` for the root.
    pub fn relative(&self, file: &Path) -> Result<String, HistoryError> {
        let canonical = canonical_or_normalized(file);
        relative_slash_path(&self.info.directory, &canonical).ok_or_else(|| {
            HistoryError::InvalidPath(format!(
                "{} is not inside repository {}",
                file.display(),
                self.info.directory.display()
            ))
        })
    }

    /// Relative path, or `.` for the repository root.
    pub fn relative_or_dot(&self, file: &Path) -> Result<String, HistoryError> {
        let rel = self.relative(file)?;
        Ok(if rel.is_empty() { ".".to_string() } else { rel })
    }
}

/// Build an annotation from blame output, one `(revision, author)` per
/// matching line. Lines the extractor rejects are attributed to nobody so
/// the annotation keeps one element per source line.
pub(crate) fn annotation_from_lines<F>(filename: &str, output: &[u8], mut extract: F) -> Annotation
where
    F: FnMut(&str) -> Option<(String, String)>,
{
    let mut annotation = Annotation::new(filename);
    let text = String::from_utf8_lossy(output);
    for (idx, line) in text.lines().enumerate() {
        match extract(line) {
            Some((revision, author)) => annotation.add_line(revision, author, true),
            None => {
                debug!(file = %filename, line = idx + 1, text = %line, "Unrecognized annotate line");
                annotation.add_line("", "", false);
            }
        }
    }
    annotation
}

/// Basename of `file` for display.
pub(crate) fn file_name(file: &Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
