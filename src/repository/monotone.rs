//! Monotone support via `mtn log`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, remove_and_verify_oldest};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};

/// `--no-format-dates` output, e.g. `2008-01-02T12:34:56`.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const QUIET: [&str; 2] = ["--quiet", "--quiet"];

/// `2e3f4a5b.. by alice 2008-01-02: text`; continuation lines leave the prefix blank.
static ANNOTATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)[[:punct:]][[:punct:]] by (\S+)").expect("valid regex"));

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join("_MTN").is_dir()
}

fn is_separator(line: &str) -> bool {
    line.len() >= 20 && line.bytes().all(|b| b == b'-')
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MtnLogState {
    /// Before the first separator
    Preamble,
    /// `Revision:`, `Author:`, `Date:`, ... certs
    Certs,
    /// Under an `Added files:` style heading
    Files,
    /// After `ChangeLog:`
    ChangeLog,
}

#[derive(Debug, Default)]
pub struct MonotoneLogParser;

impl LineParser for MonotoneLogParser {
    type State = MtnLogState;

    fn initial_state(&self) -> MtnLogState {
        MtnLogState::Preamble
    }

    fn step(&mut self, state: MtnLogState, line: &str, acc: &mut EntryAccumulator) -> MtnLogState {
        if is_separator(line) {
            acc.finish_entry();
            return MtnLogState::Certs;
        }
        if let (Some(rev), false) = (line.strip_prefix("Revision:"), state == MtnLogState::ChangeLog) {
            acc.begin(rev.trim());
            return MtnLogState::Certs;
        }
        let Some(entry) = acc.current() else {
            return state;
        };
        match state {
            MtnLogState::Preamble => state,
            MtnLogState::ChangeLog => {
                entry.append_message(line);
                state
            }
            MtnLogState::Certs | MtnLogState::Files => {
                if let Some(author) = line.strip_prefix("Author:") {
                    entry.author = author.trim().to_string();
                    MtnLogState::Certs
                } else if let Some(date) = line.strip_prefix("Date:") {
                    entry.date = parse_date_or_warn(date, &[DATE_FORMAT], &entry.revision);
                    MtnLogState::Certs
                } else if let Some(tag) = line.strip_prefix("Tag:") {
                    entry.add_tag(tag.trim());
                    MtnLogState::Certs
                } else if line.starts_with("ChangeLog:") {
                    MtnLogState::ChangeLog
                } else if line.ends_with("files:") || line.ends_with("entries:") || line.ends_with("directories:") {
                    MtnLogState::Files
                } else if state == MtnLogState::Files && line.starts_with(char::is_whitespace) {
                    let path = line.trim();
                    // `Renamed entries:` lists `old to new`
                    let path = path.split_once(" to ").map_or(path, |(_, new)| new);
                    entry.add_file(path);
                    state
                } else {
                    // Parent:, Branch:, blank lines
                    MtnLogState::Certs
                }
            }
        }
    }
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MonotoneRepository {
    base: RepoBase,
}

impl MonotoneRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        MonotoneRepository {
            base: RepoBase::new(directory, RepositoryKind::Monotone, commands),
        }
    }

    fn log(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        let rel = self.base.relative_or_dot(file)?;
        let mut cmd = self.base.cmd().arg("log");
        if let Some(since) = since {
            cmd = cmd.args(["--to", since]);
        }
        let output = cmd
            .args(["--no-graph", "--no-merges", "--no-format-dates"])
            .arg(rel)
            .run_checked()?;
        parse_bytes(&mut MonotoneLogParser, &output)
    }
}

/// Annotation from `mtn annotate`; lines without a prefix belong to the
/// revision named above them.
pub fn parse_annotate(filename: &str, output: &str) -> Annotation {
    let mut annotation = Annotation::new(filename);
    let mut last: Option<(String, String)> = None;
    for line in output.lines() {
        if let Some(caps) = ANNOTATE_LINE.captures(line) {
            last = Some((caps[1].to_string(), caps[2].to_string()));
        }
        match &last {
            Some((rev, author)) => annotation.add_line(rev.as_str(), author.as_str(), true),
            None => annotation.add_line("", "", false),
        }
    }
    annotation
}

impl Repository for MonotoneRepository {
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

    /// `--to` stops at and includes the boundary, which is then verified.
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
        let mut cmd = self.base.cmd().arg("annotate").args(QUIET);
        if let Some(rev) = revision {
            cmd = cmd.args(["-r", rev]);
        }
        let output = cmd.arg(rel.as_str()).run_checked()?;
        Ok(parse_annotate(&rel, &String::from_utf8_lossy(&output)))
    }

    fn update(&self) -> Result<(), HistoryError> {
        self.base.cmd().arg("pull").args(QUIET).run_checked()?;
        self.base.cmd().arg("update").args(QUIET).run_checked()?;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
