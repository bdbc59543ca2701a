//! Mercurial support via `hg log` with a fixed template.
//!
//! Descriptions are printed through the `obfuscate` filter (`&#NN;` per
//! character), which keeps a multi-line message on one physical line.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, remove_and_verify_oldest};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::{EntryAccumulator, LineParser, parse_bytes, parse_date_or_warn};
use crate::tag::{TagEntry, TagFlavor};

/// `{date|isodate}`, e.g. `2008-01-02 12:34 +0100`.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M %z";

const END_OF_ENTRY: &str = "mercurial_history_end_of_entry";

const TEMPLATE: &str = "changeset: {rev}:{node|short}\\nuser: {author}\\ndate: {date|isodate}\\nfiles: {files}\\ndescription: {desc|strip|obfuscate}\\nmercurial_history_end_of_entry\\n";

static ANNOTATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.+?)\s+(\d+):").expect("valid regex"));

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join(".hg").is_dir()
}

/// Decode `{desc|obfuscate}` output: `&#NN;` entities, everything else verbatim.
pub fn decode_obfuscated(text: &str) -> String {
    let mut out = String::with_capacity(text.len() / 4);
    let mut rest = text;
    while let Some(start) = rest.find("&#") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let digits: usize = after.bytes().take_while(u8::is_ascii_digit).count();
        let decoded = (digits > 0 && after.as_bytes().get(digits) == Some(&b';'))
            .then(|| after[..digits].parse::<u32>().ok().and_then(char::from_u32))
            .flatten();
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &after[digits + 1..];
            }
            None => {
                out.push_str("&#");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ─── Log parser ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HgLogState {
    /// Waiting for `changeset:`
    Between,
    /// Inside one templated entry
    Entry,
}

#[derive(Debug, Default)]
pub struct MercurialLogParser;

impl LineParser for MercurialLogParser {
    type State = HgLogState;

    fn initial_state(&self) -> HgLogState {
        HgLogState::Between
    }

    fn step(&mut self, state: HgLogState, line: &str, acc: &mut EntryAccumulator) -> HgLogState {
        if let Some(rev) = line.strip_prefix("changeset: ") {
            acc.begin(rev.trim());
            return HgLogState::Entry;
        }
        if state == HgLogState::Between {
            return state;
        }
        if line == END_OF_ENTRY {
            acc.finish_entry();
            return HgLogState::Between;
        }
        let Some(entry) = acc.current() else {
            return HgLogState::Between;
        };
        if let Some(user) = line.strip_prefix("user: ") {
            entry.author = user.trim().to_string();
        } else if let Some(date) = line.strip_prefix("date: ") {
            entry.date = parse_date_or_warn(date, &[DATE_FORMAT], &entry.revision);
        } else if let Some(files) = line.strip_prefix("files:") {
            for file in files.split_whitespace() {
                entry.add_file(file);
            }
        } else if let Some(desc) = line.strip_prefix("description:") {
            for text in decode_obfuscated(desc.trim()).lines() {
                entry.append_message(text);
            }
        } else {
            debug!(line = %line, "Unexpected line in hg log output");
        }
        HgLogState::Entry
    }
}

// ─── Repository ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MercurialRepository {
    base: RepoBase,
    tags: OnceLock<Vec<TagEntry>>,
}

impl MercurialRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        MercurialRepository {
            base: RepoBase::new(directory, RepositoryKind::Mercurial, commands),
            tags: OnceLock::new(),
        }
    }

    fn log(&self, file: &Path, revset: Option<String>) -> Result<History, HistoryError> {
        let rel = self.base.relative_or_dot(file)?;
        let mut cmd = self.base.cmd().args(["log", "--template", TEMPLATE]);
        if let Some(revset) = revset {
            cmd = cmd.args(["-r".to_string(), revset]);
        }
        let output = cmd.arg(rel).run_checked()?;
        parse_bytes(&mut MercurialLogParser, &output)
    }
}

/// Parse `hg tags` (`name   rev:node`), skipping `tip`.
pub fn parse_tags(output: &str) -> Vec<TagEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (name, rev) = line.trim_end().rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            if name == "tip" {
                return None;
            }
            let local = rev.split(':').next()?.parse::<i64>().ok()?;
            Some(TagEntry::at_revision(TagFlavor::Mercurial, local, name))
        })
        .collect()
}

impl Repository for MercurialRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    fn has_history_for_directories(&self) -> bool {
        true
    }

    fn supports_sub_repositories(&self) -> bool {
        true
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        self.log(file, None)
    }

    /// `reverse(<node>::)` includes the boundary itself, which is then verified.
    fn history_since(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        let Some(since) = since else {
            return self.history(file);
        };
        let node = since.split_once(':').map_or(since, |(_, node)| node);
        let mut history = self.log(file, Some(format!("reverse({}::)", node)))?;
        remove_and_verify_oldest(&mut history, since)?;
        Ok(history)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        let rel = self.base.relative(&parent.join(basename))?;
        let rev = revision.split(':').next().unwrap_or(revision);
        self.base.cmd().args(["cat", "-r", rev, rel.as_str()]).run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let rel = self.base.relative(file)?;
        let mut cmd = self.base.cmd().args(["annotate", "-u", "-n"]);
        if let Some(rev) = revision {
            cmd = cmd.args(["-r", rev.split(':').next().unwrap_or(rev)]);
        }
        let output = cmd.arg(rel.as_str()).run_checked()?;
        Ok(annotation_from_lines(&rel, &output, |line| {
            let caps = ANNOTATE_LINE.captures(line)?;
            Some((caps[2].to_string(), caps[1].to_string()))
        }))
    }

    fn update(&self) -> Result<(), HistoryError> {
        if !self.base.cmd().args(["paths", "default"]).succeeds() {
            warn!(repo = %self.base.dir().display(), "No default path configured, skipping pull");
            return Ok(());
        }
        self.base.cmd().args(["pull", "-u"]).run_checked()?;
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
