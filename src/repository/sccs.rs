//! SCCS support. History is read straight from the delta table of
//! `SCCS/s.<name>`; annotate and content go through `sccs get`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, file_name};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};

/// Delta dates, e.g. `08/03/05 12:00:00`.
pub const DATE_FORMAT: &str = "%y/%m/%d %H:%M:%S";

const DATE_FORMATS: &[&str] = &[DATE_FORMAT, "%Y/%m/%d %H:%M:%S"];

/// Control lines of an s-file start with SOH.
const CONTROL: char = '\u{1}';

static ANNOTATE_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([\d.]+)\s+").expect("valid regex"));

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join("SCCS").is_dir() || dir.join("Codemgr_wsdata").is_dir() || dir.join("codemgr_wsdata").is_dir()
}

/// The history file belonging to `file`.
pub fn sccs_file(file: &Path) -> PathBuf {
    let parent = file.parent().unwrap_or(Path::new(""));
    parent.join("SCCS").join(format!("s.{}", file_name(file)))
}

// ─── Delta table parser ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SccsState {
    /// Checksum and delta table
    Deltas,
    /// Inside one `^Ad` ... `^Ae` block
    Delta,
    /// User list, flags and body; nothing more to read
    Body,
}

#[derive(Debug, Default)]
pub struct SccsDeltaParser;

impl LineParser for SccsDeltaParser {
    type State = SccsState;

    fn initial_state(&self) -> SccsState {
        SccsState::Deltas
    }

    fn step(&mut self, state: SccsState, line: &str, acc: &mut EntryAccumulator) -> SccsState {
        if state == SccsState::Body {
            return state;
        }
        let Some(control) = line.strip_prefix(CONTROL) else {
            return state;
        };
        let mut chars = control.chars();
        match (chars.next(), state) {
            // `d D 1.2 08/03/05 12:00:00 alice 2 1`
            (Some('d'), _) => {
                let fields: Vec<&str> = control.split_whitespace().collect();
                if fields.len() < 6 {
                    return SccsState::Deltas;
                }
                let entry = acc.begin(fields[2]);
                entry.date = parse_date_or_warn(&format!("{} {}", fields[3], fields[4]), DATE_FORMATS, fields[2]);
                entry.author = fields[5].to_string();
                // `R` marks a removed delta
                entry.active = fields[1] != "R";
                SccsState::Delta
            }
            (Some('c'), SccsState::Delta) => {
                if let Some(entry) = acc.current() {
                    entry.append_message(chars.as_str());
                }
                state
            }
            (Some('e'), SccsState::Delta) => {
                acc.finish_entry();
                SccsState::Deltas
            }
            (Some('u') | Some('T'), _) => {
                acc.finish_entry();
                SccsState::Body
            }
            _ => state,
        }
    }
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SccsRepository {
    base: RepoBase,
}

/// Parent workspace recorded by TeamWare in `Codemgr_wsdata/parent`.
fn read_parent(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("Codemgr_wsdata").join("parent")).ok()?;
    let mut lines = content.lines();
    if !lines.next()?.starts_with("VERSION") {
        return None;
    }
    lines.next().map(|l| l.trim().to_string())
}

impl SccsRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        let mut base = RepoBase::new(directory, RepositoryKind::Sccs, commands);
        base.info.parent = read_parent(&base.info.directory);
        SccsRepository { base }
    }

    fn authors(&self, file: &Path) -> HashMap<String, String> {
        self.history(file)
            .map(|h| {
                h.into_entries()
                    .into_iter()
                    .map(|e| (e.revision, e.author))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Repository for SccsRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    fn has_history(&self, file: &Path) -> bool {
        sccs_file(file).is_file()
    }

    fn has_history_for_directories(&self) -> bool {
        false
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        if file.is_dir() {
            return Err(HistoryError::Unsupported {
                kind: self.kind(),
                operation: "directory history",
            });
        }
        let bytes = fs::read(sccs_file(file))?;
        parse_bytes(&mut SccsDeltaParser, &bytes)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        self.base
            .cmd_in(parent)
            .args(["get", "-p"])
            .arg(format!("-r{}", revision))
            .arg(basename)
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let parent = file.parent().unwrap_or(self.base.dir());
        let name = file_name(file);
        let mut cmd = self.base.cmd_in(parent).args(["get", "-m", "-p"]);
        if let Some(rev) = revision {
            cmd = cmd.arg(format!("-r{}", rev));
        }
        let output = cmd.arg(name.as_str()).run_checked()?;
        let authors = self.authors(file);
        Ok(annotation_from_lines(&name, &output, |line| {
            let rev = ANNOTATE_LINE.captures(line)?[1].to_string();
            let author = authors.get(&rev).cloned().unwrap_or_else(|| "unknown".to_string());
            Some((rev, author))
        }))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const S_FILE: &str = "\u{1}h12345
\u{1}s 00001/00000/00002
\u{1}d D 1.3 08/03/05 12:00:00 alice 3 2
\u{1}c Fix the loop
\u{1}c bound.
\u{1}e
\u{1}s 00001/00000/00001
\u{1}d R 1.2 2008/03/04 11:00:00 bob 2 1
\u{1}c Withdrawn.
\u{1}e
\u{1}s 00001/00000/00000
\u{1}d D 1.1 08/03/01 09:00:00 carol 1 0
\u{1}c date and time created 08/03/01 09:00:00 by carol
\u{1}e
\u{1}u
\u{1}U
\u{1}f e 0
\u{1}t
\u{1}T
\u{1}I 1
\u{1}d D 9.9 99/01/01 00:00:00 body 9 9
line one
\u{1}E 1
";

    #[test]
    fn test_parse_delta_table() {
        let h = parse_bytes(&mut SccsDeltaParser, S_FILE.as_bytes()).unwrap();
        assert_eq!(h.len(), 3);
        let e = &h.entries()[0];
        assert_eq!(e.revision, "1.3");
        assert_eq!(e.author, "alice");
        assert_eq!(e.message, "Fix the loop\nbound.");
        assert_eq!(e.date.unwrap().year(), 2008);
        assert!(e.active);

        let removed = &h.entries()[1];
        assert!(!removed.active);
        assert_eq!(removed.date.unwrap().day(), 4);
        assert_eq!(h.entries()[2].author, "carol");
    }

    #[test]
    fn test_history_reads_s_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = crate::canonical_or_normalized(tmp.path());
        fs::create_dir(dir.join("SCCS")).unwrap();
        fs::write(dir.join("SCCS").join("s.main.c"), S_FILE).unwrap();
        fs::write(dir.join("main.c"), "line one\n").unwrap();
        fs::write(dir.join("other.c"), "").unwrap();

        let repo = SccsRepository::new(dir.clone(), Arc::new(CommandEnv::default()));
        assert!(repo.has_history(&dir.join("main.c")));
        assert!(!repo.has_history(&dir.join("other.c")));
        assert_eq!(repo.history(&dir.join("main.c")).unwrap().len(), 3);
        assert!(repo.history(&dir).is_err());
    }

    #[test]
    fn test_teamware_parent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("Codemgr_wsdata")).unwrap();
        fs::write(tmp.path().join("Codemgr_wsdata").join("parent"), "VERSION 1\n/ws/onnv-gate\n").unwrap();
        assert_eq!(read_parent(tmp.path()).as_deref(), Some("/ws/onnv-gate"));
        assert!(is_repository_for(tmp.path(), &CommandEnv::default()));
    }

    #[test]
    fn test_annotate_regex() {
        assert_eq!(&ANNOTATE_LINE.captures("1.2\tint x;").unwrap()[1], "1.2");
    }
}
