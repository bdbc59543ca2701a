//! [`HistoryGuru`]: the context object every history request goes through.
//!
//! It owns the repository registry (canonical root -> repository), the shared
//! [`CommandEnv`] and the optional history cache. Requests for a file are
//! routed to the repository whose root is the nearest ancestor of the file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::annotation::Annotation;
use crate::cache::{self, HistoryCache};
use crate::canonical_or_normalized;
use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::executor::CommandEnv;
use crate::history::History;
use crate::repository::{self, Repository, RepositoryInfo, factory};
use crate::tag::assign_tags;

/// Outcome of an operation fanned out over several repositories.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<PathBuf>,
    /// Repository root and error message.
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchReport {
    fn record(&mut self, dir: PathBuf, result: Result<(), HistoryError>) {
        match result {
            Ok(()) => self.succeeded.push(dir),
            Err(e) => self.failed.push((dir, e.to_string())),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct HistoryGuru {
    config: Arc<HistoryConfig>,
    commands: Arc<CommandEnv>,
    cache: Option<Arc<dyn HistoryCache>>,
    repositories: RwLock<HashMap<PathBuf, Arc<dyn Repository>>>,
    ignored: Gitignore,
}

impl std::fmt::Debug for HistoryGuru {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryGuru")
            .field("source_root", &self.config.source_root)
            .field("cache", &self.cache.as_ref().map(|c| c.info()))
            .finish_non_exhaustive()
    }
}

fn build_ignore(config: &HistoryConfig) -> Result<Gitignore, HistoryError> {
    let mut builder = GitignoreBuilder::new(&config.source_root);
    for pattern in &config.ignored_names {
        builder
            .add_line(None, pattern)
            .map_err(|e| HistoryError::Config(format!("invalid ignored name '{}': {}", pattern, e)))?;
    }
    builder
        .build()
        .map_err(|e| HistoryError::Config(format!("invalid ignored names: {}", e)))
}

impl HistoryGuru {
    /// Build the context: command environment, cache backend, empty registry.
    pub fn new(config: HistoryConfig) -> Result<Self, HistoryError> {
        let commands = Arc::new(CommandEnv::from_config(&config));
        let cache = cache::open(&config)?;
        if let Some(c) = &cache {
            info!(cache = %c.info(), "History cache ready");
        }
        Ok(HistoryGuru {
            ignored: build_ignore(&config)?,
            config: Arc::new(config),
            commands,
            cache,
            repositories: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn commands(&self) -> &CommandEnv {
        &self.commands
    }

    pub fn cache(&self) -> Option<&Arc<dyn HistoryCache>> {
        self.cache.as_ref()
    }

    // ─── Registry ───────────────────────────────────────────────────

    /// Register `repo` under its root, replacing any previous registration.
    pub fn register(&self, repo: Arc<dyn Repository>) -> Result<(), HistoryError> {
        let dir = repo.directory().to_path_buf();
        self.repositories
            .write()
            .map_err(|e| HistoryError::LockPoisoned(e.to_string()))?
            .insert(dir, repo);
        Ok(())
    }

    fn registered(&self) -> Result<Vec<Arc<dyn Repository>>, HistoryError> {
        let map = self
            .repositories
            .read()
            .map_err(|e| HistoryError::LockPoisoned(e.to_string()))?;
        let mut repos: Vec<Arc<dyn Repository>> = map.values().cloned().collect();
        repos.sort_by(|a, b| a.directory().cmp(b.directory()));
        Ok(repos)
    }

    /// Registered repositories whose root is one of `dirs`, or all when `dirs` is `None`.
    fn selected(&self, dirs: Option<&[PathBuf]>) -> Result<Vec<Arc<dyn Repository>>, HistoryError> {
        let repos = self.registered()?;
        let Some(dirs) = dirs else {
            return Ok(repos);
        };
        let wanted: Vec<PathBuf> = dirs.iter().map(|d| canonical_or_normalized(d)).collect();
        for dir in &wanted {
            if !repos.iter().any(|r| r.directory() == dir) {
                warn!(dir = %dir.display(), "Not a registered repository, skipping");
            }
        }
        Ok(repos
            .into_iter()
            .filter(|r| wanted.iter().any(|d| d == r.directory()))
            .collect())
    }

    /// Snapshots of every registered repository, ordered by root.
    pub fn repositories(&self) -> Result<Vec<RepositoryInfo>, HistoryError> {
        Ok(self.registered()?.iter().map(|r| r.snapshot()).collect())
    }

    /// The repository owning `file`: the registered root nearest above it.
    pub fn repository_for(&self, file: &Path) -> Option<Arc<dyn Repository>> {
        let canonical = canonical_or_normalized(file);
        let map = self.repositories.read().ok()?;
        canonical.ancestors().find_map(|dir| map.get(dir).cloned())
    }

    fn require_repository(&self, file: &Path) -> Result<Arc<dyn Repository>, HistoryError> {
        self.repository_for(file)
            .ok_or_else(|| HistoryError::NoRepository(file.to_path_buf()))
    }

    /// Drop every registration.
    pub fn clear(&self) -> Result<(), HistoryError> {
        self.repositories
            .write()
            .map_err(|e| HistoryError::LockPoisoned(e.to_string()))?
            .clear();
        Ok(())
    }

    /// Replace the registry with the repositories described by `infos`.
    /// Entries no longer detected at their directory are dropped.
    pub fn invalidate_repositories(&self, infos: &[RepositoryInfo]) -> Result<Vec<RepositoryInfo>, HistoryError> {
        let mut fresh = HashMap::new();
        for info in infos {
            match factory::detect(&info.directory, &self.commands) {
                Some(repo) => {
                    fresh.insert(repo.directory().to_path_buf(), repo);
                }
                None => warn!(dir = %info.directory.display(), "Repository no longer detected, dropping"),
            }
        }
        *self
            .repositories
            .write()
            .map_err(|e| HistoryError::LockPoisoned(e.to_string()))? = fresh;
        self.repositories()
    }

    // ─── Scanning ───────────────────────────────────────────────────

    /// Detect repositories at and below each of `dirs` and register them.
    ///
    /// Descends at most `scanning_depth` levels. Below a detected repository
    /// the walk stops, except that repositories supporting nested roots get
    /// one more level of probing. Repositories found by that extra level are
    /// not probed further.
    pub fn add_repositories(&self, dirs: &[PathBuf]) -> Result<Vec<RepositoryInfo>, HistoryError> {
        let start = Instant::now();
        let mut found = Vec::new();
        for dir in dirs {
            match factory::detect(dir, &self.commands) {
                Some(repo) => self.add_found(repo, &mut found, true),
                None => self.scan(dir, self.config.scanning_depth, &mut found, true),
            }
        }
        for repo in &found {
            self.register(Arc::clone(repo))?;
        }
        info!(
            repositories = found.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Repository scan finished"
        );
        Ok(found.iter().map(|r| r.snapshot()).collect())
    }

    /// `allow_nested` is false inside a sub-repository pass.
    fn add_found(
        &self,
        repo: Arc<dyn Repository>,
        found: &mut Vec<Arc<dyn Repository>>,
        allow_nested: bool,
    ) {
        let nested = allow_nested && repo.supports_sub_repositories();
        let dir = repo.directory().to_path_buf();
        found.push(repo);
        if nested {
            self.scan(&dir, 0, found, false);
        }
    }

    /// Probe the children of `dir`, descending `depth` more levels into
    /// directories that are not repositories.
    fn scan(
        &self,
        dir: &Path,
        depth: usize,
        found: &mut Vec<Arc<dyn Repository>>,
        allow_nested: bool,
    ) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot list directory");
                return;
            }
        };
        let mut children: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        children.sort();

        for child in children {
            if self.ignored.matched(&child, true).is_ignore() {
                debug!(dir = %child.display(), "Ignored during scan");
                continue;
            }
            match factory::detect(&child, &self.commands) {
                Some(repo) => self.add_found(repo, found, allow_nested),
                None if depth > 0 => self.scan(&child, depth - 1, found, allow_nested),
                None => {}
            }
        }
    }

    // ─── History ────────────────────────────────────────────────────

    /// Whether the owning repository can serve history for `file` now.
    fn history_allowed(&self, repo: &dyn Repository, file: &Path) -> bool {
        if repo.is_remote() && !self.config.remote_scm_supported {
            debug!(repo = %repo.directory().display(), "Remote repository history disabled");
            return false;
        }
        repo.is_working() && repo.has_history(file)
    }

    pub fn has_history(&self, file: &Path) -> bool {
        self.repository_for(file)
            .is_some_and(|repo| self.history_allowed(repo.as_ref(), file))
    }

    pub fn has_annotation(&self, file: &Path) -> bool {
        self.repository_for(file).is_some_and(|repo| {
            repo.supports_annotation(file) && self.history_allowed(repo.as_ref(), file)
        })
    }

    /// History of `file` with touched-file lists (for directories).
    pub fn history(&self, file: &Path) -> Result<Option<History>, HistoryError> {
        self.history_with_files(file, true)
    }

    /// Head-first history of `file`, from the cache when one is configured.
    ///
    /// `Ok(None)` means no history is available: no repository owns the file,
    /// its client is not working, or remote history is disabled.
    pub fn history_with_files(&self, file: &Path, with_files: bool) -> Result<Option<History>, HistoryError> {
        let Some(repo) = self.repository_for(file) else {
            debug!(file = %file.display(), "No repository for file");
            return Ok(None);
        };
        if !self.history_allowed(repo.as_ref(), file) {
            return Ok(None);
        }

        let cached = match &self.cache {
            Some(cache) => cache.get(file, repo.as_ref(), with_files).unwrap_or_else(|e| {
                warn!(file = %file.display(), error = %e, "History cache lookup failed, asking the repository");
                None
            }),
            None => None,
        };
        let mut history = match cached {
            Some(h) => h,
            None => {
                let mut h = repo.history(file)?;
                if !with_files {
                    h.strip_files();
                }
                h
            }
        };

        if self.config.tags_enabled {
            match repo.tags() {
                Ok(tags) => assign_tags(&mut history, &tags),
                Err(e) => warn!(repo = %repo.directory().display(), error = %e, "Failed to read tags"),
            }
        }
        Ok(Some(history))
    }

    /// Entries newer than `since`, straight from the repository.
    pub fn history_since(&self, file: &Path, since: Option<&str>) -> Result<History, HistoryError> {
        self.require_repository(file)?.history_since(file, since)
    }

    /// Content of `file` as of `revision`.
    pub fn content_at(&self, file: &Path, revision: &str) -> Result<Option<Vec<u8>>, HistoryError> {
        let repo = self.require_repository(file)?;
        if !self.history_allowed(repo.as_ref(), file) {
            return Ok(None);
        }
        let parent = file
            .parent()
            .ok_or_else(|| HistoryError::InvalidPath(file.display().to_string()))?;
        let basename = repository::file_name(file);
        repo.content_at(parent, &basename, revision).map(Some)
    }

    /// Blame for `file`, with each revision's description and file version filled in.
    pub fn annotate(&self, file: &Path, revision: Option<&str>) -> Result<Option<Annotation>, HistoryError> {
        let Some(repo) = self.repository_for(file) else {
            return Ok(None);
        };
        if !repo.supports_annotation(file) || !self.history_allowed(repo.as_ref(), file) {
            return Ok(None);
        }
        let mut annotation = repo.annotate(file, revision)?;

        match self.history_with_files(file, false) {
            Ok(Some(history)) => complete_annotation(&mut annotation, &history),
            Ok(None) => {}
            Err(e) => warn!(file = %file.display(), error = %e, "Annotation left without history details"),
        }
        Ok(Some(annotation))
    }

    // ─── Cache management ───────────────────────────────────────────

    fn require_cache(&self) -> Result<&Arc<dyn HistoryCache>, HistoryError> {
        self.cache
            .as_ref()
            .ok_or_else(|| HistoryError::Config("history cache is disabled".to_string()))
    }

    /// Populate the cache for every registered repository.
    pub fn create_cache(&self) -> Result<BatchReport, HistoryError> {
        self.create_cache_for(None)
    }

    /// Populate the cache for the given repository roots (all when `None`),
    /// incrementally where a cached revision exists.
    ///
    /// Failures are isolated per repository and collected in the report.
    pub fn create_cache_for(&self, dirs: Option<&[PathBuf]>) -> Result<BatchReport, HistoryError> {
        let cache = self.require_cache()?;
        let repos = self.selected(dirs)?;
        let start = Instant::now();
        let mut report = BatchReport::default();

        if self.config.parallel_cache_creation && repos.len() > 1 {
            std::thread::scope(|s| {
                let handles: Vec<_> = repos
                    .iter()
                    .map(|repo| {
                        let cache = cache.as_ref();
                        let handle = s.spawn(move || create_one(repo.as_ref(), cache));
                        (repo.directory().to_path_buf(), handle)
                    })
                    .collect();
                for (dir, handle) in handles {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(HistoryError::InvalidArgs("cache creation thread panicked".to_string()))
                    });
                    report.record(dir, result);
                }
            });
        } else {
            for repo in &repos {
                report.record(repo.directory().to_path_buf(), create_one(repo.as_ref(), cache.as_ref()));
            }
        }

        for (dir, message) in &report.failed {
            warn!(repo = %dir.display(), error = %message, "History cache creation failed");
        }
        if let Err(e) = cache.optimize() {
            warn!(error = %e, "History cache optimization failed");
        }
        info!(
            repositories = repos.len(),
            failed = report.failed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "History cache creation finished"
        );
        Ok(report)
    }

    /// Create the cache of the repository owning `dir` unless it has one already.
    pub fn ensure_history_cache_exists(&self, dir: &Path) -> Result<(), HistoryError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let repo = self.require_repository(dir)?;
        if cache.has_cache_for_directory(dir, repo.as_ref())? {
            return Ok(());
        }
        info!(repo = %repo.directory().display(), "No history cache yet, creating");
        repository::create_cache(repo.as_ref(), cache.as_ref(), None)
    }

    /// Newest cached revision of the repository owning `dir`.
    pub fn latest_cached_revision(&self, dir: &Path) -> Result<Option<String>, HistoryError> {
        let cache = self.require_cache()?;
        let repo = self.require_repository(dir)?;
        cache.latest_cached_revision(repo.as_ref())
    }

    /// Drop the cached history of each of `dirs` (and repositories below them).
    pub fn remove_cache(&self, dirs: &[PathBuf]) -> Result<Vec<PathBuf>, HistoryError> {
        let cache = self.require_cache()?;
        let mut cleared = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let dir = canonical_or_normalized(dir);
            cache.clear(&dir)?;
            cleared.push(dir);
        }
        Ok(cleared)
    }

    // ─── Update ─────────────────────────────────────────────────────

    /// Pull upstream changes into every registered working copy.
    pub fn update_repositories(&self) -> Result<BatchReport, HistoryError> {
        self.update_repositories_for(None)
    }

    pub fn update_repositories_for(&self, dirs: Option<&[PathBuf]>) -> Result<BatchReport, HistoryError> {
        let mut report = BatchReport::default();
        for repo in self.selected(dirs)? {
            let dir = repo.directory().to_path_buf();
            if !repo.is_working() {
                report.record(dir, Err(HistoryError::NotWorking { kind: repo.kind() }));
                continue;
            }
            let start = Instant::now();
            let result = repo.update();
            match &result {
                Ok(()) => info!(
                    repo = %dir.display(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Repository updated"
                ),
                Err(e) => warn!(repo = %dir.display(), error = %e, "Repository update failed"),
            }
            report.record(dir, result);
        }
        Ok(report)
    }
}

/// Populate `cache` for one repository, continuing from its newest cached revision.
fn create_one(repo: &dyn Repository, cache: &dyn HistoryCache) -> Result<(), HistoryError> {
    let since = cache.latest_cached_revision(repo).unwrap_or_else(|e| {
        warn!(repo = %repo.directory().display(), error = %e, "Cannot read latest cached revision, doing a full fetch");
        None
    });
    repository::create_cache(repo, cache, since.as_deref())
}

/// Fill descriptions and file version numbers from the file's history.
fn complete_annotation(annotation: &mut Annotation, history: &History) {
    let total = history.len();
    for (idx, entry) in history.entries().iter().enumerate() {
        annotation.set_file_version(entry.revision.as_str(), total - idx);
    }
    let revisions: Vec<String> = annotation.revisions().into_iter().map(str::to_string).collect();
    for rev in revisions {
        let Some(pos) = history.position_of(&rev) else {
            continue;
        };
        let entry = &history.entries()[pos];
        let date = entry
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M:%S %z").to_string())
            .unwrap_or_default();
        annotation.set_description(
            rev.as_str(),
            format!(
                "changeset: {}\nsummary: {}\nuser: {}\ndate: {}",
                entry.revision, entry.message, entry.author, date
            ),
        );
        annotation.set_file_version(rev, total - pos);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "guru_tests.rs"]
mod tests;
