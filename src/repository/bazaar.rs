//! Bazaar support via `bzr log --long -v`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};

use regex::Regex;
use tracing::debug;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, remove_and_verify_oldest};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};
use crate::tag::{TagEntry, TagFlavor};

/// `timestamp:` field, e.g. `Wed 2008-01-02 12:34:56 +0100`.
pub const DATE_FORMAT: &str = "%a %Y-%m-%d %H:%M:%S %z";

const SEPARATOR: &str = "------------------------------------------------------------";

/// `revno  committer date | text`
static BLAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\W*(\S+)\W+(\S+)").expect("valid regex"));

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join(".bzr").is_dir()
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BzrLogState {
    /// Before the first separator
    Preamble,
    Revno,
    Committer,
    Timestamp,
    /// Two-space indented message, up to the first file block label
    Message,
    Files,
}

impl BzrLogState {
    /// An entry is only complete once its timestamp has been seen.
    fn is_complete(self) -> bool {
        matches!(self, BzrLogState::Message | BzrLogState::Files)
    }
}

fn is_file_label(line: &str) -> bool {
    ["modified:", "added:", "removed:", "renamed:", "kind changed:"]
        .iter()
        .any(|label| line.starts_with(label))
}

#[derive(Debug, Default)]
pub struct BazaarLogParser;

impl LineParser for BazaarLogParser {
    type State = BzrLogState;

    fn initial_state(&self) -> BzrLogState {
        BzrLogState::Preamble
    }

    fn step(&mut self, state: BzrLogState, line: &str, acc: &mut EntryAccumulator) -> BzrLogState {
        if line == SEPARATOR {
            if state.is_complete() {
                acc.finish_entry();
            } else {
                acc.discard();
            }
            return BzrLogState::Revno;
        }
        match state {
            BzrLogState::Preamble => state,
            BzrLogState::Revno => match line.strip_prefix("revno:") {
                Some(rest) => {
                    // `revno: 12 [merge]`
                    acc.begin(rest.split_whitespace().next().unwrap_or_default());
                    BzrLogState::Committer
                }
                None => state,
            },
            BzrLogState::Committer => match (line.strip_prefix("committer:"), acc.current()) {
                (Some(who), Some(entry)) => {
                    entry.author = who.trim().to_string();
                    BzrLogState::Timestamp
                }
                _ => state,
            },
            BzrLogState::Timestamp => match (line.strip_prefix("timestamp:"), acc.current()) {
                (Some(date), Some(entry)) => {
                    entry.date = parse_date_or_warn(date, &[DATE_FORMAT], &entry.revision);
                    BzrLogState::Message
                }
                _ => state,
            },
            BzrLogState::Message => {
                if is_file_label(line) {
                    return BzrLogState::Files;
                }
                if let (Some(text), Some(entry)) = (line.strip_prefix("  "), acc.current()) {
                    entry.append_message(text);
                }
                state
            }
            BzrLogState::Files => {
                if is_file_label(line) {
                    return state;
                }
                let path = line.trim();
                // renames list `old => new`
                let path = path.split_once(" => ").map_or(path, |(_, new)| new);
                if let (false, Some(entry)) = (path.is_empty(), acc.current()) {
                    entry.add_file(path);
                }
                state
            }
        }
    }

    fn finish(&mut self, state: BzrLogState, acc: &mut EntryAccumulator) {
        if state.is_complete() {
            acc.finish_entry();
        } else {
            acc.discard();
        }
    }
}

/// Parse `bzr tags` (`name   revno`); tags on unknown revisions (`?`) are skipped.
pub fn parse_tags(output: &str) -> Vec<TagEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (name, rev) = line.trim_end().rsplit_once(char::is_whitespace)?;
            let rev = rev.parse::<i64>().ok()?;
            Some(TagEntry::at_revision(TagFlavor::Linear, rev, name.trim()))
        })
        .collect()
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BazaarRepository {
    base: RepoBase,
    tags: OnceLock<Vec<TagEntry>>,
}

impl BazaarRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        BazaarRepository {
            base: RepoBase::new(directory, RepositoryKind::Bazaar, commands),
            tags: OnceLock::new(),
        }
    }

    fn log(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        let rel = self.base.relative_or_dot(file)?;
        let mut cmd = self.base.cmd().args(["log", "--long", "-v"]);
        if let Some(since) = since {
            cmd = cmd.args(["-r".to_string(), format!("{}..-1", since)]);
        }
        let output = cmd.arg(rel).run_checked()?;
        parse_bytes(&mut BazaarLogParser, &output)
    }
}

impl Repository for BazaarRepository {
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
        let mut history = self.log(file, Some(since))?;
        remove_and_verify_oldest(&mut history, since)?;
        Ok(history)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        self.base
            .cmd_in(parent)
            .args(["cat", "-r", revision, basename])
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let rel = self.base.relative(file)?;
        let mut cmd = self.base.cmd().args(["blame", "--all", "--long"]);
        if let Some(rev) = revision {
            cmd = cmd.args(["-r", rev]);
        }
        let output = cmd.arg(rel.as_str()).run_checked()?;
        Ok(annotation_from_lines(&rel, &output, |line| {
            let caps = BLAME_LINE.captures(line)?;
            Some((caps[1].to_string(), caps[2].to_string()))
        }))
    }

    fn update(&self) -> Result<(), HistoryError> {
        let info = self.base.cmd().arg("info").run_checked()?;
        if !String::from_utf8_lossy(&info).contains("parent branch:") {
            debug!(repo = %self.base.dir().display(), "No parent branch, nothing to update");
            return Ok(());
        }
        self.base.cmd().arg("up").run_checked()?;
        Ok(())
    }

    fn tags(&self) -> Result<Vec<TagEntry>, HistoryError> {
        if let Some(tags) = self.tags.get() {
            return Ok(tags.clone());
        }
        let output = self.base.cmd().arg("tags").run_checked()?;
        let tags = parse_tags(&String::from_utf8_lossy(&output));
        Ok(self.tags.get_or_init(|| tags).clone())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
