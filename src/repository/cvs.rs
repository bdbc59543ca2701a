//! CVS support via `cvs log`. The same parser reads `rlog` output for RCS.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, file_name};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};

/// `date:` field of CVS 1.11 and RCS 5.7, e.g. `2008/01/02 12:34:56`.
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Newer clients print ISO dates with an offset (`+0000` or RCS's `+00`).
const DATE_FORMATS: &[&str] = &[DATE_FORMAT, "%Y-%m-%d %H:%M:%S %z", "%Y-%m-%d %H:%M:%S%#z"];

const REVISION_SEPARATOR: &str = "----------------------------";
const FILE_SEPARATOR: &str =
    "=============================================================================";

/// `1.2          (alice    02-Jan-08): text`
static ANNOTATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.]+)\s+\((\S+)\s").expect("valid regex"));

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join("CVS").join("Root").is_file()
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CvsLogState {
    /// File header, up to `symbolic names:`
    Names,
    /// Tab-indented `name: revision` lines
    Tag,
    /// Expecting `revision X`
    Revision,
    /// Expecting `date: ...; author: ...;`
    Metadata,
    Comment,
}

/// Parser for `cvs log` and `rlog`.
///
/// Symbolic names are collected per file and attached to the matching
/// revisions as tags.
#[derive(Debug, Default)]
pub struct CvsLogParser {
    tags: HashMap<String, Vec<String>>,
}

impl CvsLogParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn metadata(line: &str, acc: &mut EntryAccumulator) {
        let Some(entry) = acc.current() else {
            return;
        };
        for field in line.split(';') {
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };
            match key.trim() {
                "date" => entry.date = parse_date_or_warn(value, DATE_FORMATS, &entry.revision),
                "author" => entry.author = value.trim().to_string(),
                _ => {}
            }
        }
    }
}

impl LineParser for CvsLogParser {
    type State = CvsLogState;

    fn initial_state(&self) -> CvsLogState {
        CvsLogState::Names
    }

    fn step(&mut self, state: CvsLogState, line: &str, acc: &mut EntryAccumulator) -> CvsLogState {
        match state {
            CvsLogState::Names => {
                if line.starts_with("symbolic names:") {
                    self.tags.clear();
                    CvsLogState::Tag
                } else if line == REVISION_SEPARATOR {
                    CvsLogState::Revision
                } else {
                    state
                }
            }
            CvsLogState::Tag => {
                if let Some(tag) = line.strip_prefix('\t') {
                    if let Some((name, rev)) = tag.split_once(':') {
                        self.tags
                            .entry(rev.trim().to_string())
                            .or_default()
                            .push(name.trim().to_string());
                    }
                    state
                } else if line == REVISION_SEPARATOR {
                    CvsLogState::Revision
                } else {
                    // keyword substitution, total revisions, description
                    CvsLogState::Names
                }
            }
            CvsLogState::Revision => match line.strip_prefix("revision ") {
                Some(rest) => {
                    // `revision 1.3	locked by: alice;`
                    let rev = rest.split_whitespace().next().unwrap_or_default();
                    let entry = acc.begin(rev);
                    if let Some(names) = self.tags.get(rev) {
                        for name in names {
                            entry.add_tag(name);
                        }
                    }
                    CvsLogState::Metadata
                }
                None => state,
            },
            CvsLogState::Metadata => {
                if line.starts_with("date: ") {
                    Self::metadata(line, acc);
                    CvsLogState::Comment
                } else {
                    state
                }
            }
            CvsLogState::Comment => {
                if line == REVISION_SEPARATOR {
                    acc.finish_entry();
                    CvsLogState::Revision
                } else if line == FILE_SEPARATOR {
                    acc.finish_entry();
                    CvsLogState::Names
                } else {
                    if line.starts_with("branches:") {
                        return state;
                    }
                    if let Some(entry) = acc.current() {
                        entry.append_message(line);
                    }
                    state
                }
            }
        }
    }
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CvsRepository {
    base: RepoBase,
}

/// Branch name from a `CVS/Tag` file (`Tbranch`); sticky dates and revisions are ignored.
fn read_branch(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("CVS").join("Tag")).ok()?;
    content
        .lines()
        .next()
        .and_then(|line| line.strip_prefix('T'))
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
}

impl CvsRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        let mut base = RepoBase::new(directory, RepositoryKind::Cvs, commands);
        base.info.branch = read_branch(&base.info.directory);
        base.info.parent = fs::read_to_string(base.info.directory.join("CVS").join("Root"))
            .ok()
            .map(|root| root.trim().to_string());
        CvsRepository { base }
    }

    pub fn branch(&self) -> Option<&str> {
        self.base.info.branch.as_deref()
    }
}

impl Repository for CvsRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    fn has_history_for_directories(&self) -> bool {
        false
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        let (cwd, target) = if file.is_dir() {
            (file, None)
        } else {
            (file.parent().unwrap_or(self.base.dir()), Some(file_name(file)))
        };
        let mut cmd = self.base.cmd_in(cwd).arg("log");
        cmd = match self.branch() {
            Some(branch) => cmd.arg(format!("-r1.1:{}", branch)),
            None => cmd.arg("-b"),
        };
        if let Some(target) = target {
            cmd = cmd.arg(target);
        }
        let output = cmd.run_checked()?;
        parse_bytes(&mut CvsLogParser::new(), &output)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        self.base
            .cmd_in(parent)
            .args(["up", "-p", "-r", revision, basename])
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let parent = file.parent().unwrap_or(self.base.dir());
        let name = file_name(file);
        let mut cmd = self.base.cmd_in(parent).arg("annotate");
        if let Some(rev) = revision.or(self.branch()) {
            cmd = cmd.args(["-r", rev]);
        }
        let output = cmd.arg(name.as_str()).run_checked()?;
        Ok(annotation_from_lines(&name, &output, |line| {
            let caps = ANNOTATE_LINE.captures(line)?;
            Some((caps[1].to_string(), caps[2].to_string()))
        }))
    }

    fn update(&self) -> Result<(), HistoryError> {
        debug!(repo = %self.base.dir().display(), "Updating CVS checkout");
        self.base.cmd().args(["update", "-dP"]).run_checked()?;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
