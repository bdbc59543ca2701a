//! Runtime configuration for the history layer.
//!
//! Loaded from a JSON file and then overlaid with command-line flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

/// Which history cache backs the guru.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum CacheBackend {
    None,
    File,
    /// SQLite database; defaults to `<data_root>/history.db`.
    Database { path: Option<PathBuf> },
}

/// Names skipped by the repository scan unless overridden.
pub const DEFAULT_IGNORED_NAMES: &[&str] = &[
    "*.o", "*.a", "*.so", "*.class", "*.jar", "*.pyc", "*~", ".#*", "node_modules",
    "target", "SCCS", "CVS", "RCS", ".hg", ".git", ".svn", ".bzr", "_MTN", ".repo",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Root of all managed sources; cache keys are relative to it.
    pub source_root: PathBuf,
    /// Where `historycache/` and the default database live.
    pub data_root: PathBuf,
    /// Directory levels the repository scan descends below the source root.
    pub scanning_depth: usize,
    /// gitignore-style globs skipped during the scan.
    pub ignored_names: Vec<String>,
    pub cache: CacheBackend,
    /// Parses slower than this are stored in the file cache.
    pub history_reader_time_limit_ms: u64,
    pub remote_scm_supported: bool,
    pub tags_enabled: bool,
    pub parallel_cache_creation: bool,
    /// Deadline for every external VCS command; 0 disables the timeout.
    pub command_timeout_secs: u64,
    /// Per-kind executable overrides, keyed by lowercase kind name (`git`, `hg`, ...).
    pub commands: HashMap<String, String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            source_root: PathBuf::from("."),
            data_root: default_data_root(),
            scanning_depth: 3,
            ignored_names: DEFAULT_IGNORED_NAMES.iter().map(|s| s.to_string()).collect(),
            cache: CacheBackend::File,
            history_reader_time_limit_ms: 30_000,
            remote_scm_supported: true,
            tags_enabled: false,
            parallel_cache_creation: true,
            command_timeout_secs: 600,
            commands: HashMap::new(),
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/vcs-history` on Linux.
pub fn default_data_root() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("vcs-history")
}

impl HistoryConfig {
    /// Read a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HistoryError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| HistoryError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }

    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    pub fn with_cache(mut self, cache: CacheBackend) -> Self {
        self.cache = cache;
        self
    }

    pub fn history_reader_time_limit(&self) -> Duration {
        Duration::from_millis(self.history_reader_time_limit_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    /// Directory holding the per-file cache blobs.
    pub fn history_cache_dir(&self) -> PathBuf {
        self.data_root.join("historycache")
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.cache {
            CacheBackend::Database { path: Some(p) } => p.clone(),
            _ => self.data_root.join("history.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HistoryConfig::default();
        assert_eq!(cfg.scanning_depth, 3);
        assert_eq!(cfg.cache, CacheBackend::File);
        assert_eq!(cfg.history_reader_time_limit(), Duration::from_secs(30));
        assert!(cfg.ignored_names.iter().any(|n| n == ".git"));
        assert!(cfg.data_root.ends_with("vcs-history"));
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{
                "source_root": "/src",
                "scanning_depth": 5,
                "cache": {"type": "database", "path": "/tmp/h.db"},
                "commands": {"git": "/opt/git/bin/git"}
            }"#,
        )
        .unwrap();
        let cfg = HistoryConfig::load(&path).unwrap();
        assert_eq!(cfg.source_root, PathBuf::from("/src"));
        assert_eq!(cfg.scanning_depth, 5);
        assert_eq!(cfg.database_path(), PathBuf::from("/tmp/h.db"));
        assert_eq!(cfg.commands.get("git").map(String::as_str), Some("/opt/git/bin/git"));
        assert!(cfg.parallel_cache_creation);
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = HistoryConfig::load(&path).unwrap_err();
        assert!(matches!(err, HistoryError::Config(_)));
    }

    #[test]
    fn test_zero_timeout_disables() {
        let cfg = HistoryConfig {
            command_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(cfg.command_timeout(), None);
    }

    #[test]
    fn test_database_path_default() {
        let cfg = HistoryConfig::default()
            .with_data_root("/data")
            .with_cache(CacheBackend::Database { path: None });
        assert_eq!(cfg.database_path(), PathBuf::from("/data/history.db"));
        assert_eq!(cfg.history_cache_dir(), PathBuf::from("/data/historycache"));
    }
}
