//! Git support via the `git` CLI.
//!
//! History comes from `git log --name-only --pretty=fuller`; incremental
//! fetches use `since..HEAD` after checking that `since` is still an ancestor
//! of HEAD (a rewritten branch forces a full rebuild). Blame uses the
//! porcelain format.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{TimeZone, Utc};
use tracing::debug;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};
use crate::tag::TagEntry;

/// `--date=iso-strict` output, e.g. `2018-01-12T10:00:00+01:00`.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// Hash git reports for lines that are not committed yet.
const UNCOMMITTED: &str = "0000000000000000000000000000000000000000";

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    // `.git` is a file in worktrees and submodules
    dir.join(".git").exists()
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GitLogState {
    /// `commit`, `Author:`, `AuthorDate:` ... up to the first blank line
    Header,
    /// Indented message lines
    Message,
    /// `--name-only` paths, until the next `commit`
    Files,
}

/// Parser for `git log --name-only --pretty=fuller --date=iso-strict`.
#[derive(Debug, Default)]
pub struct GitLogParser;

impl LineParser for GitLogParser {
    type State = GitLogState;

    fn initial_state(&self) -> GitLogState {
        GitLogState::Header
    }

    fn step(&mut self, state: GitLogState, line: &str, acc: &mut EntryAccumulator) -> GitLogState {
        if let Some(hash) = line.strip_prefix("commit ") {
            // `commit <hash> (tag: v1)` when decorations are on
            let hash = hash.split_whitespace().next().unwrap_or_default();
            acc.begin(hash);
            return GitLogState::Header;
        }
        let Some(entry) = acc.current() else {
            return state;
        };
        match state {
            GitLogState::Header => {
                if line.trim().is_empty() {
                    GitLogState::Message
                } else if let Some(author) = line.strip_prefix("Author:") {
                    entry.author = author.trim().to_string();
                    GitLogState::Header
                } else if let Some(date) = line.strip_prefix("AuthorDate:") {
                    entry.date = parse_date_or_warn(date, &[DATE_FORMAT, "%a %b %e %H:%M:%S %Y %z"], &entry.revision);
                    GitLogState::Header
                } else {
                    // Merge:, Commit:, CommitDate:
                    GitLogState::Header
                }
            }
            GitLogState::Message => {
                if line.starts_with(char::is_whitespace) || line.is_empty() {
                    entry.append_message(line);
                    GitLogState::Message
                } else {
                    entry.add_file(line.trim());
                    GitLogState::Files
                }
            }
            GitLogState::Files => {
                let path = line.trim();
                if !path.is_empty() {
                    entry.add_file(path);
                }
                GitLogState::Files
            }
        }
    }
}

// ─── Blame (porcelain) ──────────────────────────────────────────────

/// Parse `git blame --porcelain` into one annotation line per source line.
///
/// Author headers appear only on the first occurrence of each commit, so
/// they are remembered by hash for later groups.
pub fn parse_blame_porcelain(filename: &str, output: &str) -> Annotation {
    let mut annotation = Annotation::new(filename);
    let mut authors: HashMap<String, String> = HashMap::new();
    let mut lines_iter = output.lines();

    while let Some(line) = lines_iter.next() {
        if line.trim().is_empty() {
            continue;
        }
        // "<hash> <orig_line> <final_line> [<num_lines>]"
        let mut parts = line.split_whitespace();
        let hash = parts.next().unwrap_or_default();
        if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }

        let mut author = None;
        for header_line in lines_iter.by_ref() {
            if header_line.starts_with('\t') {
                break;
            }
            if let Some(val) = header_line.strip_prefix("author ") {
                author = Some(val.to_string());
            }
        }

        let author = match author {
            Some(a) => {
                authors.insert(hash.to_string(), a.clone());
                a
            }
            None => authors.get(hash).cloned().unwrap_or_default(),
        };
        annotation.add_line(hash, author, hash != UNCOMMITTED);
    }
    annotation
}

// ─── Tags ───────────────────────────────────────────────────────────

/// Parse `git log --tags --simplify-by-decoration --pretty=%H:%at:%D:`.
pub fn parse_tag_list(output: &str) -> Vec<TagEntry> {
    let mut tags = Vec::new();
    for line in output.lines() {
        let mut fields = line.splitn(3, ':');
        let (Some(_hash), Some(epoch), Some(decorations)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        let Ok(epoch) = epoch.trim().parse::<i64>() else {
            continue;
        };
        let names: Vec<&str> = decorations
            .trim_end_matches(':')
            .split(", ")
            .filter_map(|d| d.trim().strip_prefix("tag: "))
            .collect();
        if names.is_empty() {
            continue;
        }
        if let Some(date) = Utc.timestamp_opt(epoch, 0).single() {
            tags.push(TagEntry::at_date(date, names.join(", ")));
        }
    }
    tags
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct GitRepository {
    base: RepoBase,
    tags: OnceLock<Vec<TagEntry>>,
}

impl GitRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        GitRepository {
            base: RepoBase::new(directory, RepositoryKind::Git, commands),
            tags: OnceLock::new(),
        }
    }

    fn log(&self, file: &Path, range: Option<String>) -> Result<History, HistoryError> {
        let rel = self.base.relative_or_dot(file)?;
        let mut cmd = self
            .base
            .cmd()
            .args(["log", "--name-only", "--pretty=fuller", "--date=iso-strict", "--no-color"]);
        if let Some(range) = range {
            cmd = cmd.arg(range);
        }
        let output = cmd.args(["--", rel.as_str()]).run_checked()?;
        parse_bytes(&mut GitLogParser, &output)
    }

    /// Whether `old` is an ancestor of HEAD.
    pub fn is_ancestor(&self, old: &str) -> bool {
        self.base
            .cmd()
            .args(["merge-base", "--is-ancestor", old, "HEAD"])
            .succeeds()
    }
}

impl Repository for GitRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    fn has_history_for_directories(&self) -> bool {
        true
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        self.log(file, None)
    }

    fn history_since(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        let Some(since) = since else {
            return self.history(file);
        };
        if !self.is_ancestor(since) {
            return Err(HistoryError::IncrementalBoundary {
                expected: since.to_string(),
                found: None,
            });
        }
        self.log(file, Some(format!("{}..HEAD", since)))
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        let rel = self.base.relative(&parent.join(basename))?;
        self.base
            .cmd()
            .arg("show")
            .arg(format!("{}:{}", revision, rel))
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let rel = self.base.relative(file)?;
        let mut cmd = self.base.cmd().args(["blame", "--porcelain"]);
        if let Some(rev) = revision {
            cmd = cmd.arg(rev);
        }
        let output = cmd.args(["--", rel.as_str()]).run_checked()?;
        Ok(parse_blame_porcelain(&rel, &String::from_utf8_lossy(&output)))
    }

    fn update(&self) -> Result<(), HistoryError> {
        let config = self.base.cmd().args(["config", "--list"]).run_checked()?;
        let has_remote = String::from_utf8_lossy(&config)
            .lines()
            .any(|l| l.starts_with("remote.origin.url="));
        if !has_remote {
            debug!(repo = %self.base.dir().display(), "No remote.origin.url, nothing to pull");
            return Ok(());
        }
        self.base.cmd().args(["pull", "-n", "-q"]).run_checked()?;
        Ok(())
    }

    fn tags(&self) -> Result<Vec<TagEntry>, HistoryError> {
        if let Some(tags) = self.tags.get() {
            return Ok(tags.clone());
        }
        let output = self
            .base
            .cmd()
            .args(["log", "--tags", "--simplify-by-decoration", "--pretty=%H:%at:%D:"])
            .run_checked()?;
        let tags = parse_tag_list(&String::from_utf8_lossy(&output));
        Ok(self.tags.get_or_init(|| tags).clone())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
