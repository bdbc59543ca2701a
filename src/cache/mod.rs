//! History caches: the [`HistoryCache`] contract and its two backends.
//!
//! - [`file::FileHistoryCache`] keeps one compressed blob per source file,
//!   invalidated by modification time.
//! - [`db::DbHistoryCache`] keeps a normalized SQLite schema with true
//!   incremental appends.

use std::path::Path;
use std::sync::Arc;

use crate::config::{CacheBackend, HistoryConfig};
use crate::error::HistoryError;
use crate::history::History;
use crate::repository::Repository;

pub mod db;
pub mod file;
mod schema;

/// Persistent store for parsed histories, shared by all request threads.
pub trait HistoryCache: Send + Sync {
    /// Create directories, tables and counters. Idempotent.
    fn initialize(&self) -> Result<(), HistoryError>;

    /// Housekeeping after a bulk population.
    fn optimize(&self) -> Result<(), HistoryError> {
        Ok(())
    }

    /// History of `file` from the cache, parsing through `repo` where the
    /// backend does so on a miss. `Ok(None)` means the cache cannot answer
    /// and the caller should ask the repository directly.
    fn get(&self, file: &Path, repo: &dyn Repository, with_files: bool) -> Result<Option<History>, HistoryError>;

    /// Store a head-first directory-level history of `repo`.
    fn store(&self, history: &History, repo: &dyn Repository) -> Result<(), HistoryError>;

    /// Whether anything is cached for the repository owning `dir`.
    fn has_cache_for_directory(&self, dir: &Path, repo: &dyn Repository) -> Result<bool, HistoryError>;

    /// Newest revision stored for `repo`, the boundary for incremental updates.
    fn latest_cached_revision(&self, repo: &dyn Repository) -> Result<Option<String>, HistoryError>;

    /// Drop everything cached for repositories at or below `repo_dir`.
    fn clear(&self, repo_dir: &Path) -> Result<(), HistoryError>;

    /// Drop what is cached for `repo` alone, keeping repositories nested below it.
    fn invalidate(&self, repo: &dyn Repository) -> Result<(), HistoryError>;

    /// Short description for diagnostics.
    fn info(&self) -> String;
}

/// Build and initialize the backend selected by `config`, or `None` when caching is off.
pub fn open(config: &HistoryConfig) -> Result<Option<Arc<dyn HistoryCache>>, HistoryError> {
    let cache: Arc<dyn HistoryCache> = match &config.cache {
        CacheBackend::None => return Ok(None),
        CacheBackend::File => Arc::new(file::FileHistoryCache::new(
            config.history_cache_dir(),
            crate::canonical_or_normalized(&config.source_root),
            config.history_reader_time_limit(),
        )),
        CacheBackend::Database { .. } => Arc::new(db::DbHistoryCache::new(config.database_path())),
    };
    cache.initialize()?;
    Ok(Some(cache))
}
