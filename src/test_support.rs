//! In-memory [`Repository`] used by cache and guru tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, TimeZone, Utc};

use crate::annotation::Annotation;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::{History, HistoryEntry};
use crate::repository::{RepoBase, Repository, RepositoryInfo, RepositoryKind, truncate_at_revision};

#[derive(Debug)]
pub(crate) struct FakeRepository {
    base: RepoBase,
    /// Head-first commits, each listing the files it touched.
    commits: Mutex<Vec<HistoryEntry>>,
    annotations: Mutex<HashMap<String, Annotation>>,
    working: AtomicBool,
    fail_incremental: AtomicBool,
    history_calls: AtomicUsize,
}

impl FakeRepository {
    /// A repository rooted at `dir`, which is canonicalized.
    pub fn new(dir: &Path) -> Self {
        FakeRepository {
            base: RepoBase::new(
                crate::canonical_or_normalized(dir),
                RepositoryKind::Git,
                Arc::new(CommandEnv::default()),
            ),
            commits: Mutex::new(Vec::new()),
            annotations: Mutex::new(HashMap::new()),
            working: AtomicBool::new(true),
            fail_incremental: AtomicBool::new(false),
            history_calls: AtomicUsize::new(0),
        }
    }

    pub fn remote(mut self) -> Self {
        self.base.info.remote = true;
        self
    }

    /// Record a new head commit touching `files` (repository relative).
    pub fn push_commit(&self, rev: &str, author: &str, message: &str, files: &[&str]) {
        let mut commits = self.commits.lock().unwrap();
        let when = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::hours(commits.len() as i64);
        let mut entry = HistoryEntry::new(rev, Some(when), author).with_message(message);
        for f in files {
            entry.add_file(*f);
        }
        commits.insert(0, entry);
    }

    pub fn set_working(&self, working: bool) {
        self.working.store(working, Ordering::SeqCst);
    }

    pub fn set_fail_incremental(&self, fail: bool) {
        self.fail_incremental.store(fail, Ordering::SeqCst);
    }

    pub fn set_annotation(&self, rel: &str, annotation: Annotation) {
        self.annotations.lock().unwrap().insert(rel.to_string(), annotation);
    }

    /// Number of `history`/`history_since` invocations so far.
    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

impl Repository for FakeRepository {
    fn info(&self) -> &RepositoryInfo {
        &self.base.info
    }

    fn commands(&self) -> &CommandEnv {
        &self.base.commands
    }

    fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    fn has_history_for_directories(&self) -> bool {
        true
    }

    fn history(&self, file: &Path) -> Result<History, HistoryError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let rel = self.base.relative(file)?;
        let entries = self
            .commits
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.files.iter().any(|f| crate::matches_path_prefix(f, &rel)))
            .cloned()
            .collect();
        Ok(History::from_entries(entries))
    }

    fn history_since(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        if since.is_some() && self.fail_incremental.load(Ordering::SeqCst) {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            return Err(HistoryError::IncrementalBoundary {
                expected: since.unwrap_or_default().to_string(),
                found: None,
            });
        }
        let full = self.history(file)?;
        match since {
            None => Ok(full),
            Some(rev) => truncate_at_revision(full, rev),
        }
    }

    fn content_at(&self, _parent: &Path, basename: &str, revision: &str) -> Result<Vec<u8>, HistoryError> {
        Ok(format!("{}@{}", basename, revision).into_bytes())
    }

    fn annotate(&self, file: &Path, _revision: Option<&str>) -> Result<Annotation, HistoryError> {
        let rel = self.base.relative(file)?;
        Ok(self
            .annotations
            .lock()
            .unwrap()
            .get(&rel)
            .cloned()
            .unwrap_or_else(|| Annotation::new(rel.as_str())))
    }
}

/// Create `rel` below `root` with some content, making parent directories.
pub(crate) fn touch(root: &Path, rel: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, rel).unwrap();
    path
}
