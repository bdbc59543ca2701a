//! ClearCase support via `cleartool lshistory` with a fixed record format.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, file_name};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};

/// `%Nd`, e.g. `20080102.123456`.
pub const DATE_FORMAT: &str = "%Y%m%d.%H%M%S";

/// Event, date, user, version, comment lines, then a lone `.`.
const LSHISTORY_FORMAT: &str = "%e\\n%Nd\\n%Fu (%u)\\n%Vn\\n%Nc\\n.\\n";

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join("view.dat").is_file()
        || dir.join(".view.dat").is_file()
        || dir
            .file_name()
            .is_some_and(|name| name.to_string_lossy().eq_ignore_ascii_case("vobs"))
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearCaseState {
    Event,
    Date,
    User,
    Version,
    Comment,
}

#[derive(Debug, Default)]
pub struct ClearCaseLogParser {
    event: String,
}

impl LineParser for ClearCaseLogParser {
    type State = ClearCaseState;

    fn initial_state(&self) -> ClearCaseState {
        ClearCaseState::Event
    }

    fn step(&mut self, state: ClearCaseState, line: &str, acc: &mut EntryAccumulator) -> ClearCaseState {
        match state {
            ClearCaseState::Event => {
                if line.trim().is_empty() {
                    return state;
                }
                self.event = line.trim().to_string();
                ClearCaseState::Date
            }
            ClearCaseState::Date => {
                // the revision is only known two lines later
                let entry = acc.begin("");
                entry.date = parse_date_or_warn(line, &[DATE_FORMAT], &self.event);
                entry.active = matches!(self.event.as_str(), "create version" | "create directory version");
                ClearCaseState::User
            }
            ClearCaseState::User => {
                if let Some(entry) = acc.current() {
                    entry.author = line.trim().to_string();
                }
                ClearCaseState::Version
            }
            ClearCaseState::Version => {
                if let Some(entry) = acc.current() {
                    entry.revision = line.trim().to_string();
                }
                ClearCaseState::Comment
            }
            ClearCaseState::Comment => {
                if line == "." {
                    acc.finish_entry();
                    return ClearCaseState::Event;
                }
                if let Some(entry) = acc.current() {
                    entry.append_message(line);
                }
                state
            }
        }
    }
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ClearCaseRepository {
    base: RepoBase,
}

impl ClearCaseRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        ClearCaseRepository {
            base: RepoBase::new(directory, RepositoryKind::ClearCase, commands),
        }
    }

    /// Snapshot views have `load` rules in their config spec; dynamic views need no update.
    fn is_snapshot_view(&self) -> Result<bool, HistoryError> {
        let spec = self.base.cmd().arg("catcs").run_checked()?;
        Ok(String::from_utf8_lossy(&spec)
            .lines()
            .any(|line| line.trim_start().starts_with("load")))
    }
}

impl Repository for ClearCaseRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    /// Directory history lists element versions, not touched files.
    fn has_history_for_directories(&self) -> bool {
        false
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        let rel = self.base.relative_or_dot(file)?;
        let mut cmd = self.base.cmd().arg("lshistory");
        if file.is_dir() {
            cmd = cmd.arg("-dir");
        }
        let output = cmd.args(["-fmt", LSHISTORY_FORMAT]).arg(rel).run_checked()?;
        parse_bytes(&mut ClearCaseLogParser::default(), &output)
    }

    /// `cleartool get` refuses to overwrite, so the version lands in a fresh
    /// scratch directory and is read back from there.
    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        let scratch = tempfile::tempdir()?;
        let target = scratch.path().join(basename);
        self.base
            .cmd_in(parent)
            .args(["get", "-to"])
            .arg(target.to_string_lossy().into_owned())
            .arg(format!("{}@@{}", basename, revision))
            .run_checked()?;
        Ok(fs::read(&target)?)
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let parent = file.parent().unwrap_or(self.base.dir());
        let name = file_name(file);
        let target = match revision {
            Some(rev) => format!("{}@@{}", name, rev),
            None => name.clone(),
        };
        let output = self
            .base
            .cmd_in(parent)
            .args(["annotate", "-nheader", "-out", "-", "-f", "-fmt", "%u|%Vn|"])
            .arg(target)
            .run_checked()?;
        Ok(annotation_from_lines(&name, &output, |line| {
            let mut parts = line.splitn(3, '|');
            let (author, rev) = (parts.next()?, parts.next()?);
            parts.next()?;
            Some((rev.trim().to_string(), author.trim().to_string()))
        }))
    }

    fn update(&self) -> Result<(), HistoryError> {
        if !self.is_snapshot_view()? {
            debug!(repo = %self.base.dir().display(), "Dynamic view, nothing to update");
            return Ok(());
        }
        self.base.cmd().args(["update", "-overwrite", "-f"]).run_checked()?;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const LSHISTORY: &str = "\
create version
20080102.123456
Alice Example (alice)
/main/3
Fix the frobnicator.
Second line.
.
create branch
20080101.000000
Bob (bob)
/main/rel1
.
create version
20071231.230000
Carol (carol)
/main/1
.
";

    #[test]
    fn test_parse_lshistory() {
        let h = parse_bytes(&mut ClearCaseLogParser::default(), LSHISTORY.as_bytes()).unwrap();
        assert_eq!(h.len(), 3);
        let e = &h.entries()[0];
        assert_eq!(e.revision, "/main/3");
        assert_eq!(e.author, "Alice Example (alice)");
        assert_eq!(e.message, "Fix the frobnicator.\nSecond line.");
        assert_eq!(e.date.unwrap().hour(), 12);
        assert!(e.active);
        assert!(!h.entries()[1].active);
        assert!(h.entries()[2].message.is_empty());
    }

    #[test]
    fn test_vobs_directory_is_a_view() {
        let tmp = tempfile::tempdir().unwrap();
        let vobs = tmp.path().join("VOBS");
        fs::create_dir(&vobs).unwrap();
        assert!(is_repository_for(&vobs, &CommandEnv::default()));
        assert!(!is_repository_for(tmp.path(), &CommandEnv::default()));
        fs::write(tmp.path().join(".view.dat"), "").unwrap();
        assert!(is_repository_for(tmp.path(), &CommandEnv::default()));
    }
}
