//! AccuRev support via `accurev hist`.
//!
//! A workspace is recognised by asking the client: `accurev info` must name
//! the directory as the workspace top. Paths are depot relative (`/./src/a.c`).

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, file_name};
use crate::annotation::Annotation;
use crate::canonical_or_normalized;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};

/// Transaction dates, e.g. `2008/01/02 12:34:56`.
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

const DEPOT_ROOT: &str = "/./";

/// `transaction 12; promote; 2008/01/02 12:34:56 ; user: alice`
static TRANSACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^transaction (\d+);\s*([^;]*);\s*([^;]+?)\s*;\s*user:\s*(\S+)").expect("valid regex")
});

/// `  /./src/a.c 5/3 (5/3)`
static VERSION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+/\./(\S+)\s+\d+/\d+").expect("valid regex"));

static ANNOTATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(\d+/\d+)\s+(\w+)").expect("valid regex"));

/// Fields of interest from `accurev info`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub depot: Option<String>,
    pub basis: Option<String>,
    pub top: Option<PathBuf>,
}

pub fn parse_info(output: &str) -> WorkspaceInfo {
    let mut info = WorkspaceInfo::default();
    for line in output.lines() {
        if line.contains("not logged in") {
            warn!("Not logged into the AccuRev server");
            return WorkspaceInfo::default();
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Depot" => info.depot = Some(value.to_string()),
            "Basis" => info.basis = Some(value.to_string()),
            "Top" => info.top = Some(PathBuf::from(value)),
            _ => {}
        }
    }
    info
}

fn workspace_info(dir: &Path, commands: &CommandEnv) -> Result<WorkspaceInfo, HistoryError> {
    let output = commands
        .executor(RepositoryKind::AccuRev, dir)
        .arg("info")
        .run_checked()?;
    Ok(parse_info(&String::from_utf8_lossy(&output)))
}

pub fn is_repository_for(dir: &Path, commands: &CommandEnv) -> bool {
    if !commands.is_working(RepositoryKind::AccuRev) {
        return false;
    }
    match workspace_info(dir, commands) {
        Ok(WorkspaceInfo { depot: Some(_), top: Some(top), .. }) => {
            canonical_or_normalized(&top) == canonical_or_normalized(dir)
        }
        Ok(_) => false,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "accurev info failed");
            false
        }
    }
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccuRevState {
    Between,
    Transaction,
}

#[derive(Debug, Default)]
pub struct AccuRevLogParser;

impl LineParser for AccuRevLogParser {
    type State = AccuRevState;

    fn initial_state(&self) -> AccuRevState {
        AccuRevState::Between
    }

    fn step(&mut self, state: AccuRevState, line: &str, acc: &mut EntryAccumulator) -> AccuRevState {
        if let Some(caps) = TRANSACTION.captures(line) {
            let entry = acc.begin(&caps[1]);
            entry.date = parse_date_or_warn(&caps[3], &[DATE_FORMAT], &caps[1]);
            entry.author = caps[4].to_string();
            return AccuRevState::Transaction;
        }
        let Some(entry) = acc.current() else {
            return state;
        };
        if let Some(comment) = line.trim_start().strip_prefix('#') {
            entry.append_message(comment);
        } else if let Some(caps) = VERSION_LINE.captures(line) {
            entry.add_file(&caps[1]);
        }
        state
    }
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AccuRevRepository {
    base: RepoBase,
    depot: String,
}

impl AccuRevRepository {
    /// Fails when the directory is not a workspace the client can describe.
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Result<Self, HistoryError> {
        let ws = workspace_info(&directory, &commands)?;
        let depot = ws.depot.ok_or(HistoryError::NotWorking {
            kind: RepositoryKind::AccuRev,
        })?;
        let mut base = RepoBase::new(directory, RepositoryKind::AccuRev, commands);
        base.info.remote = true;
        base.info.parent = ws.basis;
        base.info.branch = Some(depot.clone());
        Ok(AccuRevRepository { base, depot })
    }

    pub fn depot(&self) -> &str {
        &self.depot
    }

    fn depot_path(&self, file: &Path) -> Result<String, HistoryError> {
        Ok(format!("{}{}", DEPOT_ROOT, self.base.relative(file)?))
    }
}

/// Element id from `accurev stat -fe` (`/./src/a.c e:12 ...`).
pub fn parse_element_id(stat: &str) -> Option<String> {
    stat.lines()
        .next()?
        .split_whitespace()
        .find_map(|field| field.strip_prefix("e:"))
        .map(str::to_string)
}

impl Repository for AccuRevRepository {
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
        let path = self.depot_path(file)?;
        let (cwd, keep) = if file.is_dir() {
            (file, false)
        } else {
            (file.parent().unwrap_or(self.base.dir()), true)
        };
        let mut cmd = self.base.cmd_in(cwd).arg("hist");
        if keep {
            // only versions that were actually kept
            cmd = cmd.args(["-k", "keep"]);
        }
        let output = cmd.arg(path).run_checked()?;
        parse_bytes(&mut AccuRevLogParser, &output)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        let stat = self.base.cmd_in(parent).args(["stat", "-fe", basename]).run_checked()?;
        let element = parse_element_id(&String::from_utf8_lossy(&stat)).ok_or_else(|| {
            HistoryError::InvalidPath(format!("no AccuRev element id for {}", parent.join(basename).display()))
        })?;
        self.base
            .cmd_in(parent)
            .args(["cat", "-v", revision.trim(), "-e", element.as_str()])
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let path = self.depot_path(file)?;
        let parent = file.parent().unwrap_or(self.base.dir());
        let mut cmd = self.base.cmd_in(parent).args(["annotate", "-fvu"]);
        if let Some(rev) = revision {
            cmd = cmd.args(["-v", rev.trim()]);
        }
        let output = cmd.arg(path).run_checked()?;
        Ok(annotation_from_lines(&file_name(file), &output, |line| {
            let caps = ANNOTATE_LINE.captures(line)?;
            Some((caps[1].to_string(), caps[2].to_string()))
        }))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const HIST: &str = "\
transaction 1234; keep; 2008/01/02 12:34:56 ; user: alice
  # Fix the frobnicator
  # in two lines
  /./src/frob.c 5/3 (5/3)
  ancestor: (5/2)

transaction 1200; add; 2008/01/01 00:00:00 ; user: bob
  /./src/frob.c 5/1 (5/1)
";

    #[test]
    fn test_parse_hist() {
        let h = parse_bytes(&mut AccuRevLogParser, HIST.as_bytes()).unwrap();
        assert_eq!(h.len(), 2);
        let e = &h.entries()[0];
        assert_eq!(e.revision, "1234");
        assert_eq!(e.author, "alice");
        assert_eq!(e.date.unwrap().hour(), 12);
        assert_eq!(e.message, "Fix the frobnicator\nin two lines");
        assert!(e.files.contains("src/frob.c"));
        assert!(h.entries()[1].message.is_empty());
    }

    #[test]
    fn test_parse_info() {
        let out = "Shell:\t\t/bin/bash\nPrincipal:\talice\nDepot:\t\tproj\nBasis:\t\tproj_int\nTop:\t\t/home/alice/ws/proj\n";
        let info = parse_info(out);
        assert_eq!(info.depot.as_deref(), Some("proj"));
        assert_eq!(info.basis.as_deref(), Some("proj_int"));
        assert_eq!(info.top, Some(PathBuf::from("/home/alice/ws/proj")));

        assert_eq!(parse_info("You are not logged in.\nDepot: x\n"), WorkspaceInfo::default());
    }

    #[test]
    fn test_element_id_and_annotate_regex() {
        assert_eq!(parse_element_id("/./src/frob.c e:42 (modified)\n").as_deref(), Some("42"));
        assert_eq!(parse_element_id(""), None);
        let caps = ANNOTATE_LINE.captures("    5/3      alice  int x;").unwrap();
        assert_eq!((&caps[1], &caps[2]), ("5/3", "alice"));
    }

    #[test]
    fn test_missing_client_is_not_a_workspace() {
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("accurev".to_string(), "/nonexistent/accurev-client".to_string());
        let commands = CommandEnv::new(overrides, None);
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_repository_for(tmp.path(), &commands));
        assert_eq!(commands.probe_count(), 1);
        assert!(!is_repository_for(tmp.path(), &commands));
        assert_eq!(commands.probe_count(), 1);
    }
}
