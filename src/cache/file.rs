//! File-backed history cache: one LZ4-compressed bincode blob per source file.
//!
//! Layout under `<data_root>/historycache/`:
//!
//! ```text
//! <path relative to source root>.hist   per-file history blob
//! <repository relative path>/.latest-rev newest stored revision of a repository
//! <repository relative path>/.repository marks a repository root
//! ```
//!
//! A blob is fresh while it is not older than the source file. Directories
//! are never cached here: their history depends on every descendant.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::HistoryCache;
use crate::error::HistoryError;
use crate::history::{History, HistoryEntry};
use crate::repository::Repository;
use crate::{canonical_or_normalized, relative_slash_path};

/// Magic bytes identifying a history blob.
pub const CACHE_MAGIC: &[u8; 4] = b"VHC1";

/// Bumped whenever [`CacheFile`] changes shape; other versions are misses.
pub const FORMAT_VERSION: u32 = 1;

const EXTENSION: &str = "hist";
const LATEST_REV_FILE: &str = ".latest-rev";
const ROOT_MARKER: &str = ".repository";

/// Serializes every rename into place, across all keys.
static STORE_LOCK: Mutex<()> = Mutex::new(());

// ─── On-disk schema ─────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    format_version: u32,
    entries: Vec<CachedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry {
    revision: String,
    /// Milliseconds since the Unix epoch.
    timestamp_ms: Option<i64>,
    author: String,
    message: String,
    active: bool,
    tags: Option<String>,
    files: Vec<String>,
}

impl From<&HistoryEntry> for CachedEntry {
    fn from(e: &HistoryEntry) -> Self {
        CachedEntry {
            revision: e.revision.clone(),
            timestamp_ms: e.date.map(|d| d.timestamp_millis()),
            author: e.author.clone(),
            message: e.message.clone(),
            active: e.active,
            tags: e.tags.clone(),
            files: e.files.iter().cloned().collect(),
        }
    }
}

impl From<CachedEntry> for HistoryEntry {
    fn from(c: CachedEntry) -> Self {
        let date = c.timestamp_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        let mut entry = HistoryEntry::new(c.revision, date, c.author).with_message(c.message);
        entry.active = c.active;
        entry.tags = c.tags;
        entry.files = c.files.into_iter().collect();
        entry
    }
}

// ─── Blob I/O ───────────────────────────────────────────────────────

/// Write `history` to `path` through a temporary file renamed into place.
fn write_blob(path: &Path, history: &History) -> Result<(), HistoryError> {
    let parent = path
        .parent()
        .ok_or_else(|| HistoryError::InvalidPath(path.display().to_string()))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(CACHE_MAGIC)?;
        let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
        let blob = CacheFile {
            format_version: FORMAT_VERSION,
            entries: history.entries().iter().map(CachedEntry::from).collect(),
        };
        bincode::serialize_into(&mut encoder, &blob)?;
        let mut writer = encoder
            .finish()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writer.flush()?;
    }

    let _guard = STORE_LOCK
        .lock()
        .map_err(|e| HistoryError::LockPoisoned(e.to_string()))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn load_blob(path: &Path) -> Result<History, HistoryError> {
    let path_str = path.display().to_string();
    let load_err = |message: String| HistoryError::CacheLoad {
        path: path_str.clone(),
        message,
    };

    let file = fs::File::open(path).map_err(|e| load_err(format!("cannot open file: {}", e)))?;
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| load_err(format!("read error (magic bytes): {}", e)))?;
    if &magic != CACHE_MAGIC {
        return Err(load_err("not a history cache file".to_string()));
    }

    let decoder = lz4_flex::frame::FrameDecoder::new(reader);
    let blob: CacheFile = bincode::deserialize_from(decoder)
        .map_err(|e| load_err(format!("LZ4 deserialization failed: {}", e)))?;
    if blob.format_version != FORMAT_VERSION {
        return Err(load_err(format!(
            "format version {} (expected {})",
            blob.format_version, FORMAT_VERSION
        )));
    }
    Ok(History::from_entries(
        blob.entries.into_iter().map(HistoryEntry::from).collect(),
    ))
}

/// Delete the blobs and revision marker below `dir`, skipping subtrees
/// that carry another repository's root marker. Returns the number removed.
fn remove_owned(dir: &Path, top: bool) -> Result<usize, HistoryError> {
    if !top && (dir.join(ROOT_MARKER).exists() || dir.join(LATEST_REV_FILE).exists()) {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            removed += remove_owned(&path, false)?;
            continue;
        }
        let is_blob = path.extension().is_some_and(|ext| ext == EXTENSION);
        let is_marker = path.file_name().is_some_and(|name| name == LATEST_REV_FILE);
        if is_blob || is_marker {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Whether the cache entry is at least as new as the source file.
fn is_fresh(source: &Path, cached: &Path) -> bool {
    let mtime = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (mtime(source), mtime(cached)) {
        (Some(src), Some(cache)) => cache >= src,
        _ => false,
    }
}

// ─── FileHistoryCache ───────────────────────────────────────────────

#[derive(Debug)]
pub struct FileHistoryCache {
    cache_root: PathBuf,
    source_root: PathBuf,
    time_limit: Duration,
}

impl FileHistoryCache {
    /// `cache_root` is usually `<data_root>/historycache`; keys are taken
    /// relative to `source_root`, which should be canonical.
    pub fn new(cache_root: PathBuf, source_root: PathBuf, time_limit: Duration) -> Self {
        FileHistoryCache {
            cache_root,
            source_root,
            time_limit,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Cache location mirroring `path` below the source root, without extension.
    fn mirror_path(&self, path: &Path) -> Result<PathBuf, HistoryError> {
        let canonical = canonical_or_normalized(path);
        let rel = relative_slash_path(&self.source_root, &canonical).ok_or_else(|| {
            HistoryError::InvalidPath(format!(
                "{} is outside the source root {}",
                path.display(),
                self.source_root.display()
            ))
        })?;
        Ok(rel
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.cache_root.clone(), |acc, part| acc.join(part)))
    }

    /// Blob location for a source file.
    pub fn cache_path(&self, file: &Path) -> Result<PathBuf, HistoryError> {
        let mut path = self.mirror_path(file)?.into_os_string();
        path.push(".");
        path.push(EXTENSION);
        Ok(PathBuf::from(path))
    }

    fn latest_rev_path(&self, repo: &dyn Repository) -> Result<PathBuf, HistoryError> {
        Ok(self.mirror_path(repo.directory())?.join(LATEST_REV_FILE))
    }

    /// Record that the mirror of `repo`'s root belongs to a repository.
    fn mark_root(&self, repo: &dyn Repository) -> Result<(), HistoryError> {
        let dir = self.mirror_path(repo.directory())?;
        let marker = dir.join(ROOT_MARKER);
        if !marker.exists() {
            fs::create_dir_all(&dir)?;
            fs::write(&marker, repo.kind().name())?;
        }
        Ok(())
    }

    /// Re-read a file's history through the repository and store it when
    /// it is worth keeping.
    fn refresh(&self, file: &Path, repo: &dyn Repository, cached: &Path) -> Result<History, HistoryError> {
        let existed = cached.exists();
        let start = Instant::now();
        let history = repo.history(file)?;
        let elapsed = start.elapsed();

        if existed || elapsed > self.time_limit {
            let mut stored = history.clone();
            stored.strip_files();
            match self.mark_root(repo).and_then(|()| write_blob(cached, &stored)) {
                Ok(()) => debug!(
                    file = %file.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Stored history in file cache"
                ),
                Err(e) => warn!(file = %file.display(), error = %e, "Failed to store history in file cache"),
            }
        }
        Ok(history)
    }
}

impl HistoryCache for FileHistoryCache {
    fn initialize(&self) -> Result<(), HistoryError> {
        fs::create_dir_all(&self.cache_root)?;
        Ok(())
    }

    fn get(&self, file: &Path, repo: &dyn Repository, with_files: bool) -> Result<Option<History>, HistoryError> {
        if file.is_dir() {
            let mut history = repo.history(file)?;
            if !with_files {
                history.strip_files();
            }
            return Ok(Some(history));
        }

        let cached = self.cache_path(file)?;
        if is_fresh(file, &cached) {
            match load_blob(&cached) {
                Ok(history) => return Ok(Some(history)),
                Err(e) => warn!(file = %file.display(), error = %e, "Unreadable history cache entry, re-parsing"),
            }
        }

        let mut history = self.refresh(file, repo, &cached)?;
        if !with_files {
            history.strip_files();
        }
        Ok(Some(history))
    }

    fn store(&self, history: &History, repo: &dyn Repository) -> Result<(), HistoryError> {
        let repo_dir = repo.directory();
        let mut per_file: HashMap<&str, Vec<HistoryEntry>> = HashMap::new();
        for entry in history.entries() {
            let mut stripped = entry.clone();
            stripped.strip_files();
            for file in &entry.files {
                per_file.entry(file.as_str()).or_default().push(stripped.clone());
            }
        }

        let start = Instant::now();
        self.mark_root(repo)?;
        let mut written = 0usize;
        for (rel, entries) in per_file {
            let file = repo_dir.join(rel);
            if file.is_dir() {
                continue;
            }
            let cached = self.cache_path(&file)?;
            let newer = History::from_entries(entries);
            let merged = match cached.exists().then(|| load_blob(&cached)) {
                Some(Ok(mut existing)) => {
                    existing.prepend(newer);
                    existing
                }
                Some(Err(e)) => {
                    debug!(file = %file.display(), error = %e, "Replacing unreadable cache entry");
                    newer
                }
                None => newer,
            };
            write_blob(&cached, &merged)?;
            written += 1;
        }

        if let Some(head) = history.head_revision() {
            let marker = self.latest_rev_path(repo)?;
            if let Some(parent) = marker.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&marker, head)?;
        }
        info!(
            repo = %repo_dir.display(),
            files = written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stored history in file cache"
        );
        Ok(())
    }

    fn has_cache_for_directory(&self, dir: &Path, _repo: &dyn Repository) -> Result<bool, HistoryError> {
        Ok(self.mirror_path(dir)?.is_dir())
    }

    fn latest_cached_revision(&self, repo: &dyn Repository) -> Result<Option<String>, HistoryError> {
        match fs::read_to_string(self.latest_rev_path(repo)?) {
            Ok(rev) => Ok(Some(rev.trim().to_string()).filter(|r| !r.is_empty())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self, repo_dir: &Path) -> Result<(), HistoryError> {
        let dir = self.mirror_path(repo_dir)?;
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
            info!(repo = %repo_dir.display(), "Cleared file history cache");
        }
        // clearing the source root itself removes the cache root
        fs::create_dir_all(&self.cache_root)?;
        Ok(())
    }

    fn invalidate(&self, repo: &dyn Repository) -> Result<(), HistoryError> {
        let dir = self.mirror_path(repo.directory())?;
        if !dir.is_dir() {
            return Ok(());
        }
        let _guard = STORE_LOCK
            .lock()
            .map_err(|e| HistoryError::LockPoisoned(e.to_string()))?;
        let removed = remove_owned(&dir, true)?;
        info!(repo = %repo.directory().display(), files = removed, "Invalidated file history cache");
        Ok(())
    }

    fn info(&self) -> String {
        format!("file cache at {}", self.cache_root.display())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
