//! RCS support. History comes from `rlog` (read with the CVS parser),
//! annotate from `blame` and content from `co -p`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::cvs::CvsLogParser;
use super::{RepoBase, Repository, RepositoryInfo, RepositoryKind, annotation_from_lines, file_name};
use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::parser::parse_bytes;

/// Same output shape as `cvs annotate`.
static BLAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.]+)\s+\((\S+)\s").expect("valid regex"));

pub fn is_repository_for(dir: &Path, _commands: &CommandEnv) -> bool {
    dir.join("RCS").is_dir()
}

/// The `,v` archive of `file`: `RCS/<name>,v`, or `<name>,v` beside it.
pub fn rcs_file(file: &Path) -> Option<PathBuf> {
    let parent = file.parent()?;
    let archive = format!("{},v", file_name(file));
    [parent.join("RCS").join(&archive), parent.join(&archive)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

#[derive(Debug)]
pub struct RcsRepository {
    base: RepoBase,
}

impl RcsRepository {
    pub fn new(directory: PathBuf, commands: Arc<CommandEnv>) -> Self {
        RcsRepository {
            base: RepoBase::new(directory, RepositoryKind::Rcs, commands),
        }
    }

    fn archive_for(&self, file: &Path) -> Result<PathBuf, HistoryError> {
        rcs_file(file).ok_or_else(|| HistoryError::InvalidPath(format!("{} has no RCS archive", file.display())))
    }
}

impl Repository for RcsRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    fn has_history(&self, file: &Path) -> bool {
        rcs_file(file).is_some()
    }

    fn has_history_for_directories(&self) -> bool {
        false
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        let archive = self.archive_for(file)?;
        let parent = file.parent().unwrap_or(self.base.dir());
        let output = self
            .base
            .cmd_in(parent)
            .arg(archive.to_string_lossy().into_owned())
            .run_checked()?;
        parse_bytes(&mut CvsLogParser::new(), &output)
    }

    fn content_at(&self, parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        let archive = self.archive_for(&parent.join(basename))?;
        self.base
            .commands
            .helper("co", "co", parent)
            .arg("-p")
            .arg(format!("-r{}", revision))
            .arg(archive.to_string_lossy().into_owned())
            .run_checked()
    }

    fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let parent = file.parent().unwrap_or(self.base.dir());
        let name = file_name(file);
        let mut cmd = self.base.commands.helper("blame", "blame", parent);
        if let Some(rev) = revision {
            cmd = cmd.arg(format!("-r{}", rev));
        }
        let output = cmd.arg(name.as_str()).run_checked()?;
        Ok(annotation_from_lines(&name, &output, |line| {
            let caps = BLAME_LINE.captures(line)?;
            Some((caps[1].to_string(), caps[2].to_string()))
        }))
    }
}
