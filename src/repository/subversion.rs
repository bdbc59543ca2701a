//! Subversion support via the plain-text `svn log -v` output.
//!
//! Changed paths in the log are repository paths (`/trunk/src/a.c`); they
//! are mapped back to working-copy paths by stripping the working copy's
//! relative URL, taken once from `svn info`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};

use regex::Regex;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, remove_and_verify_oldest};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};

/// `2008-01-02 12:34:56 +0100` (the parenthesised long date is dropped).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^r(\d+) \| (.*?) \| ([^(|]+?)(?: \(.*?\))? \|").expect("valid regex"));

static CHANGED_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+[AMDR] (/.*?)(?: \(from .*\))?$").expect("valid regex"));

static BLAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+|-)\s+(\S+)").expect("valid regex"));

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join(".svn").is_dir()
}

fn is_separator(line: &str) -> bool {
    line.len() >= 72 && line.bytes().all(|b| b == b'-')
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SvnLogState {
    /// Expecting `rN | author | date | N lines`
    Header,
    /// `Changed paths:` block
    Paths,
    Message,
}

/// Parser for `svn log -v`.
#[derive(Debug)]
pub struct SubversionLogParser {
    /// Repository path of the working copy root, e.g. `/trunk`.
    url_prefix: String,
}

impl SubversionLogParser {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        let prefix: String = url_prefix.into();
        SubversionLogParser {
            url_prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Working-copy relative path, or `None` for paths outside the working copy.
    fn map_path(&self, repo_path: &str) -> Option<String> {
        if self.url_prefix.is_empty() {
            return Some(repo_path.trim_start_matches('/').to_string());
        }
        repo_path
            .strip_prefix(&self.url_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
    }
}

impl LineParser for SubversionLogParser {
    type State = SvnLogState;

    fn initial_state(&self) -> SvnLogState {
        SvnLogState::Header
    }

    fn step(&mut self, state: SvnLogState, line: &str, acc: &mut EntryAccumulator) -> SvnLogState {
        if is_separator(line) {
            acc.finish_entry();
            return SvnLogState::Header;
        }
        match state {
            SvnLogState::Header => {
                if let Some(caps) = HEADER.captures(line) {
                    let entry = acc.begin(&caps[1]);
                    entry.author = caps[2].trim().to_string();
                    entry.date = parse_date_or_warn(&caps[3], &[DATE_FORMAT], &caps[1]);
                    SvnLogState::Paths
                } else {
                    SvnLogState::Header
                }
            }
            SvnLogState::Paths => {
                if line.trim().is_empty() {
                    return SvnLogState::Message;
                }
                if let Some(caps) = CHANGED_PATH.captures(line) {
                    if let (Some(rel), Some(entry)) = (self.map_path(&caps[1]), acc.current()) {
                        entry.add_file(rel);
                    }
                }
                SvnLogState::Paths
            }
            SvnLogState::Message => {
                if let Some(entry) = acc.current() {
                    entry.append_message(line);
                }
                SvnLogState::Message
            }
        }
    }
}

/// Repository path of a working copy from `svn info` output.
pub fn parse_info_prefix(info: &str) -> Option<String> {
    let mut url = None;
    let mut root = None;
    for line in info.lines() {
        if let Some(rel) = line.strip_prefix("Relative URL: ^") {
            return Some(rel.trim().to_string());
        } else if let Some(u) = line.strip_prefix("URL: ") {
            url = Some(u.trim().to_string());
        } else if let Some(r) = line.strip_prefix("Repository Root: ") {
            root = Some(r.trim().to_string());
        }
    }
    let (url, root) = (url?, root?);
    url.strip_prefix(&root).map(|p| p.to_string())
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SubversionRepository {
    base: RepoBase,
    url_prefix: OnceLock<String>,
}

impl SubversionRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        SubversionRepository {
            base: RepoBase::new(directory, RepositoryKind::Subversion, commands),
            url_prefix: OnceLock::new(),
        }
    }

    fn url_prefix(&self) -> Result<String, HistoryError> {
        if let Some(prefix) = self.url_prefix.get() {
            return Ok(prefix.clone());
        }
        let output = self.base.cmd().args(["info", "--non-interactive"]).run_checked()?;
        let prefix = parse_info_prefix(&String::from_utf8_lossy(&output)).unwrap_or_default();
        Ok(self.url_prefix.get_or_init(|| prefix).clone())
    }

    fn log(&self, file: &Path, range: Option<String>) -> Result<History, HistoryError> {
        let rel = self.base.relative_or_dot(file)?;
        let mut cmd = self.base.cmd().args(["log", "--non-interactive", "-v"]);
        if let Some(range) = range {
            cmd = cmd.args(["-r".to_string(), range]);
        }
        let output = cmd.arg(rel).run_checked()?;
        parse_bytes(&mut SubversionLogParser::new(self.url_prefix()?), &output)
    }
}

impl Repository for SubversionRepository {
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

    /// `-r BASE:<since>` includes the boundary revision, which is then verified.
    fn history_since(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        let Some(since) = since else {
            return self.history(file);
        };
        let mut history = self.log(file, Some(format!("BASE:{}", since)))?;
        remove_and_verify_oldest(&mut history, since)?;
        Ok(history)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        self.base
            .cmd_in(parent)
            .args(["cat", "--non-interactive", "-r", revision, basename])
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let rel = self.base.relative(file)?;
        let mut cmd = self.base.cmd().args(["blame", "--non-interactive"]);
        if let Some(rev) = revision {
            cmd = cmd.args(["-r", rev]);
        }
        let output = cmd.arg(rel.as_str()).run_checked()?;
        // locally modified lines carry `-` and stay unattributed
        Ok(annotation_from_lines(&rel, &output, |line| {
            let caps = BLAME_LINE.captures(line)?;
            (&caps[1] != "-").then(|| (caps[1].to_string(), caps[2].to_string()))
        }))
    }

    fn update(&self) -> Result<(), HistoryError> {
        self.base.cmd().args(["update", "--non-interactive"]).run_checked()?;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
