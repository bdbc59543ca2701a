//! Perforce support via `p4 filelog` and `p4 changes`.
//!
//! Revisions are changelist numbers throughout, so file history, annotate
//! (`-c`) and content (`@change`) agree on what a revision means. The depot
//! is a server, hence the repository is remote.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, file_name};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};

/// `2008/01/02 12:34:56` as printed with `-t`, or just the date without it.
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

const DATE_FORMATS: &[&str] = &[DATE_FORMAT, "%Y/%m/%d"];

/// `... #3 change 1234 edit on 2008/01/02 12:34:56 by alice@ws (text)`
static FILELOG_REVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.\.\. #\d+ change (\d+) (\S+) on (\d{4}/\d{2}/\d{2}(?: \d{2}:\d{2}:\d{2})?) by ([^@]+)@")
        .expect("valid regex")
});

/// `Change 1234 on 2008/01/02 12:34:56 by alice@ws`
static CHANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Change (\d+) on (\d{4}/\d{2}/\d{2}(?: \d{2}:\d{2}:\d{2})?) by ([^@]+)@").expect("valid regex")
});

static ANNOTATE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+): ").expect("valid regex"));

/// Name of the per-workspace client configuration file.
pub fn default_config_name() -> String {
    std::env::var("P4CONFIG")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| ".p4config".to_string())
}

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join(default_config_name()).is_file()
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum P4LogState {
    Between,
    /// After a revision or change header; tab-indented lines are message
    Entry,
}

/// Parser for both `p4 filelog -lt` and `p4 changes -t -l`.
#[derive(Debug, Default)]
pub struct PerforceLogParser;

impl LineParser for PerforceLogParser {
    type State = P4LogState;

    fn initial_state(&self) -> P4LogState {
        P4LogState::Between
    }

    fn step(&mut self, state: P4LogState, line: &str, acc: &mut EntryAccumulator) -> P4LogState {
        if let Some(caps) = FILELOG_REVISION.captures(line) {
            let entry = acc.begin(&caps[1]);
            entry.author = caps[4].trim().to_string();
            entry.date = parse_date_or_warn(&caps[3], DATE_FORMATS, &caps[1]);
            return P4LogState::Entry;
        }
        if let Some(caps) = CHANGE.captures(line) {
            let entry = acc.begin(&caps[1]);
            entry.author = caps[3].trim().to_string();
            entry.date = parse_date_or_warn(&caps[2], DATE_FORMATS, &caps[1]);
            return P4LogState::Entry;
        }
        if state == P4LogState::Between {
            return state;
        }
        // integration records (`... ... branch into ...`) close the entry
        if line.starts_with("... ...") {
            acc.finish_entry();
            return P4LogState::Between;
        }
        if let (Some(text), Some(entry)) = (line.strip_prefix('\t'), acc.current()) {
            entry.append_message(text);
        }
        P4LogState::Entry
    }
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PerforceRepository {
    base: RepoBase,
}

impl PerforceRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        let mut base = RepoBase::new(directory, RepositoryKind::Perforce, commands);
        base.info.remote = true;
        PerforceRepository { base }
    }
}

fn at_change(revision: &str) -> String {
    format!("@{}", revision.trim_start_matches('@'))
}

impl Repository for PerforceRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    /// `p4 changes` carries no file lists.
    fn has_history_for_directories(&self) -> bool {
        false
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        let output = if file.is_dir() {
            let rel = self.base.relative(file)?;
            let spec = if rel.is_empty() { "...".to_string() } else { format!("{}/...", rel) };
            self.base.cmd().args(["changes", "-t", "-l"]).arg(spec).run_checked()?
        } else {
            let parent = file.parent().unwrap_or(self.base.dir());
            self.base
                .cmd_in(parent)
                .args(["filelog", "-lt"])
                .arg(file_name(file))
                .run_checked()?
        };
        parse_bytes(&mut PerforceLogParser, &output)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        self.base
            .cmd_in(parent)
            .args(["print", "-q"])
            .arg(format!("{}{}", basename, at_change(revision)))
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let parent = file.parent().unwrap_or(self.base.dir());
        let name = file_name(file);
        let target = match revision {
            Some(rev) => format!("{}{}", name, at_change(rev)),
            None => name.clone(),
        };
        let output = self.base.cmd_in(parent).args(["annotate", "-qci"]).arg(target).run_checked()?;
        // annotate has no user column; authors come from history enrichment
        Ok(annotation_from_lines(&name, &output, |line| {
            let caps = ANNOTATE_LINE.captures(line)?;
            Some((caps[1].to_string(), String::new()))
        }))
    }

    fn update(&self) -> Result<(), HistoryError> {
        self.base.cmd().args(["sync", "..."]).run_checked()?;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
