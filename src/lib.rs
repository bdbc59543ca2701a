//! Version-control history layer: repository detection, per-VCS log and
//! annotate parsers, and file / SQLite history caches behind one
//! [`HistoryGuru`] context object.
//!
//! A source tree is scanned once with [`HistoryGuru::add_repositories`]; every
//! later request for a file is routed to the repository that owns it by walking
//! up its parent directories.

use std::path::{Component, Path, PathBuf};

pub mod annotation;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod guru;
pub mod history;
pub mod parser;
pub mod repository;
pub mod tag;

#[cfg(test)]
pub(crate) mod test_support;

pub use annotation::Annotation;
pub use cache::{HistoryCache, db::DbHistoryCache, file::FileHistoryCache};
pub use config::{CacheBackend, HistoryConfig};
pub use error::HistoryError;
pub use guru::HistoryGuru;
pub use history::{History, HistoryEntry, LineInfo};
pub use repository::{Repository, RepositoryInfo, RepositoryKind};
pub use tag::TagEntry;

// ─── Path helpers ───────────────────────────────────────────────────

/// Strip the `\\?\` prefix that `std::fs::canonicalize` adds on Windows.
pub fn clean_path(p: &str) -> String {
    p.strip_prefix(r"\\?\").unwrap_or(p).to_string()
}

/// Canonicalize when the path exists, otherwise normalize `.`/`..` lexically.
pub fn canonical_or_normalized(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => PathBuf::from(clean_path(&p.to_string_lossy())),
        Err(_) => normalize_lexically(path),
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` relative to `root`, with `/` separators. `""` when they are equal.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Check if a `/` separated path lies at or below `prefix`.
///
/// `proj-a` does not match `proj-ab`. An empty prefix matches everything.
pub fn matches_path_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

// ─── Tests ──────────────────────────────────────────────────────────
