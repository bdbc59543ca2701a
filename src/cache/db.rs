//! SQLite-backed history cache.
//!
//! Changesets are inserted oldest first, so the surrogate id doubles as a
//! chronological key and `ORDER BY id DESC` yields head-first history.
//! Every directory above a touched file gets a `dirchanges` row, which makes
//! directory history a single indexed query.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, TransactionBehavior, params};
use tracing::{debug, info, warn};

use super::{HistoryCache, schema};
use crate::error::HistoryError;
use crate::history::{History, HistoryEntry};
use crate::repository::Repository;
use crate::{canonical_or_normalized, matches_path_prefix, relative_slash_path};

/// Longest stored commit message, in characters, marker included.
pub const MAX_MESSAGE_LENGTH: usize = 32672;

const TRUNCATION_MARKER: &str = "\n[... message truncated]";

/// Attempts per operation when SQLite reports busy/locked.
const MAX_ATTEMPTS: u32 = 5;

/// Changesets per transaction during bulk stores.
const COMMIT_INTERVAL: usize = 500;

const GET_FILE_HISTORY: &str = "\
    SELECT cs.id, cs.revision, a.name, cs.timestamp_ms, cs.message, cs.active
    FROM changesets cs
    JOIN authors a ON a.id = cs.author
    JOIN filechanges fc ON fc.changeset = cs.id
    JOIN files f ON f.id = fc.file
    JOIN directories d ON d.id = f.directory
    WHERE cs.repository = ?1 AND d.repository = ?1 AND d.path = ?2 AND f.name = ?3
    ORDER BY cs.id DESC";

const GET_DIRECTORY_HISTORY: &str = "\
    SELECT cs.id, cs.revision, a.name, cs.timestamp_ms, cs.message, cs.active
    FROM changesets cs
    JOIN authors a ON a.id = cs.author
    JOIN dirchanges dc ON dc.changeset = cs.id
    JOIN directories d ON d.id = dc.directory
    WHERE cs.repository = ?1 AND d.repository = ?1 AND d.path = ?2
    ORDER BY cs.id DESC";

const GET_CHANGESET_FILES: &str = "\
    SELECT d.path, f.name
    FROM filechanges fc
    JOIN files f ON f.id = fc.file
    JOIN directories d ON d.id = f.directory
    WHERE fc.changeset = ?1";

// ─── Id counters ────────────────────────────────────────────────────

/// Process-local id generators, seeded from `MAX(id) + 1`.
#[derive(Debug, Default)]
struct IdCounters {
    repositories: AtomicI64,
    directories: AtomicI64,
    files: AtomicI64,
    authors: AtomicI64,
    changesets: AtomicI64,
}

impl IdCounters {
    fn counter(&self, table: &str) -> Option<&AtomicI64> {
        match table {
            "repositories" => Some(&self.repositories),
            "directories" => Some(&self.directories),
            "files" => Some(&self.files),
            "authors" => Some(&self.authors),
            "changesets" => Some(&self.changesets),
            _ => None,
        }
    }

    fn seed(&self, conn: &Connection) -> Result<(), HistoryError> {
        for table in schema::ID_TABLES {
            let next: i64 = conn.query_row(
                &format!("SELECT COALESCE(MAX(id), 0) + 1 FROM {}", table),
                [],
                |row| row.get(0),
            )?;
            if let Some(counter) = self.counter(table) {
                counter.fetch_max(next, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

fn next_id(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::SeqCst)
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Cap `message` at [`MAX_MESSAGE_LENGTH`] characters, marking the cut.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LENGTH {
        return message.to_string();
    }
    let keep = MAX_MESSAGE_LENGTH - TRUNCATION_MARKER.chars().count();
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Every directory above `path`, innermost first, ending with the root `""`.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(path);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.rfind('/') {
            Some(idx) => {
                rest = Some(&current[..idx]);
                Some(&current[..idx])
            }
            None => {
                rest = None;
                Some("")
            }
        }
    })
}

/// `("a/b", "c.c")` for `a/b/c.c`, `("", "c.c")` for a root file.
fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn repository_key(repo: &dyn Repository) -> String {
    repo.directory().to_string_lossy().into_owned()
}

fn repository_id(conn: &Connection, path: &str) -> Result<Option<i64>, HistoryError> {
    match conn.query_row("SELECT id FROM repositories WHERE path = ?1", params![path], |row| row.get(0)) {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, HistoryEntry)> {
    let id: i64 = row.get(0)?;
    let timestamp: Option<i64> = row.get(3)?;
    let date = timestamp.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    let mut entry = HistoryEntry::new(row.get::<_, String>(1)?, date, row.get::<_, String>(2)?)
        .with_message(row.get::<_, String>(4)?);
    entry.active = row.get(5)?;
    Ok((id, entry))
}

// ─── Writer ─────────────────────────────────────────────────────────

/// Upserting writer for one `store` call; memoizes looked-up ids.
struct Writer<'a> {
    counters: &'a IdCounters,
    repo_id: i64,
    authors: HashMap<String, i64>,
    directories: HashMap<String, i64>,
    files: HashMap<String, i64>,
}

impl<'a> Writer<'a> {
    fn new(counters: &'a IdCounters, repo_id: i64) -> Self {
        Writer {
            counters,
            repo_id,
            authors: HashMap::new(),
            directories: HashMap::new(),
            files: HashMap::new(),
        }
    }

    fn author(&mut self, conn: &Connection, name: &str) -> Result<i64, HistoryError> {
        if let Some(id) = self.authors.get(name) {
            return Ok(*id);
        }
        conn.execute(
            "INSERT INTO authors(id, repository, name) VALUES (?1, ?2, ?3) \
             ON CONFLICT(repository, name) DO NOTHING;",
            params![next_id(&self.counters.authors), self.repo_id, name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM authors WHERE repository = ?1 AND name = ?2",
            params![self.repo_id, name],
            |row| row.get(0),
        )?;
        self.authors.insert(name.to_string(), id);
        Ok(id)
    }

    fn directory(&mut self, conn: &Connection, path: &str) -> Result<i64, HistoryError> {
        if let Some(id) = self.directories.get(path) {
            return Ok(*id);
        }
        conn.execute(
            "INSERT INTO directories(id, repository, path) VALUES (?1, ?2, ?3) \
             ON CONFLICT(repository, path) DO NOTHING;",
            params![next_id(&self.counters.directories), self.repo_id, path],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM directories WHERE repository = ?1 AND path = ?2",
            params![self.repo_id, path],
            |row| row.get(0),
        )?;
        self.directories.insert(path.to_string(), id);
        Ok(id)
    }

    fn file(&mut self, conn: &Connection, path: &str) -> Result<i64, HistoryError> {
        if let Some(id) = self.files.get(path) {
            return Ok(*id);
        }
        let (dir, name) = split_parent(path);
        let dir_id = self.directory(conn, dir)?;
        conn.execute(
            "INSERT INTO files(id, directory, name) VALUES (?1, ?2, ?3) \
             ON CONFLICT(directory, name) DO NOTHING;",
            params![next_id(&self.counters.files), dir_id, name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM files WHERE directory = ?1 AND name = ?2",
            params![dir_id, name],
            |row| row.get(0),
        )?;
        self.files.insert(path.to_string(), id);
        Ok(id)
    }

    /// Insert one changeset with its file and directory touches.
    /// Returns false when the revision was already stored.
    fn changeset(&mut self, conn: &Connection, entry: &HistoryEntry) -> Result<bool, HistoryError> {
        let author = self.author(conn, &entry.author)?;
        let id = next_id(&self.counters.changesets);
        let inserted = conn.execute(
            "INSERT INTO changesets(id, repository, revision, author, timestamp_ms, message, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(repository, revision) DO NOTHING;",
            params![
                id,
                self.repo_id,
                entry.revision,
                author,
                entry.date.map(|d| d.timestamp_millis()),
                truncate_message(&entry.message),
                entry.active,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        for path in &entry.files {
            let file = self.file(conn, path)?;
            conn.execute(
                "INSERT INTO filechanges(changeset, file) VALUES (?1, ?2) ON CONFLICT DO NOTHING;",
                params![id, file],
            )?;
            for dir in ancestors(path) {
                let dir_id = self.directory(conn, dir)?;
                conn.execute(
                    "INSERT INTO dirchanges(changeset, directory) VALUES (?1, ?2) ON CONFLICT DO NOTHING;",
                    params![id, dir_id],
                )?;
            }
        }
        Ok(true)
    }
}

// ─── DbHistoryCache ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct DbHistoryCache {
    db_path: PathBuf,
    counters: IdCounters,
}

impl DbHistoryCache {
    pub fn new(db_path: PathBuf) -> Self {
        DbHistoryCache {
            db_path,
            counters: IdCounters::default(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, HistoryError> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Run `op`, retrying transient SQLite failures up to [`MAX_ATTEMPTS`] times.
    fn with_retry<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(operation, attempt, error = %e, "Transient database error, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn get_once(&self, file: &Path, repo: &dyn Repository, with_files: bool) -> Result<Option<History>, HistoryError> {
        let conn = self.connect()?;
        let Some(repo_id) = repository_id(&conn, &repository_key(repo))? else {
            return Ok(None);
        };
        let rel = relative_slash_path(repo.directory(), &canonical_or_normalized(file)).ok_or_else(|| {
            HistoryError::InvalidPath(format!(
                "{} is not inside repository {}",
                file.display(),
                repo.directory().display()
            ))
        })?;

        let rows: Vec<(i64, HistoryEntry)> = if file.is_dir() {
            let mut stmt = conn.prepare(GET_DIRECTORY_HISTORY)?;
            let rows = stmt.query_map(params![repo_id, rel], row_to_entry)?;
            rows.collect::<rusqlite::Result<_>>()?
        } else {
            let (dir, name) = split_parent(&rel);
            let mut stmt = conn.prepare(GET_FILE_HISTORY)?;
            let rows = stmt.query_map(params![repo_id, dir, name], row_to_entry)?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut entries = Vec::with_capacity(rows.len());
        let mut files_stmt = conn.prepare(GET_CHANGESET_FILES)?;
        for (id, mut entry) in rows {
            if with_files {
                let paths = files_stmt.query_map(params![id], |row| {
                    Ok(join_rel(&row.get::<_, String>(0)?, &row.get::<_, String>(1)?))
                })?;
                for path in paths {
                    let path = path?;
                    if matches_path_prefix(&path, &rel) {
                        entry.add_file(path);
                    }
                }
            }
            entries.push(entry);
        }
        Ok(Some(History::from_entries(entries)))
    }

    fn store_once(&self, history: &History, repo: &dyn Repository) -> Result<usize, HistoryError> {
        let mut conn = self.connect()?;
        let key = repository_key(repo);
        conn.execute(
            "INSERT INTO repositories(id, path) VALUES (?1, ?2) ON CONFLICT(path) DO NOTHING;",
            params![next_id(&self.counters.repositories), key],
        )?;
        let repo_id = repository_id(&conn, &key)?.ok_or_else(|| {
            HistoryError::InvalidPath(format!("repository row for {} vanished", key))
        })?;

        let mut writer = Writer::new(&self.counters, repo_id);
        let oldest_first: Vec<&HistoryEntry> = history.entries().iter().rev().collect();
        let mut inserted = 0usize;
        for chunk in oldest_first.chunks(COMMIT_INTERVAL) {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for entry in chunk {
                if writer.changeset(&tx, entry)? {
                    inserted += 1;
                }
            }
            tx.commit()?;
            debug!(repo = %key, changesets = chunk.len(), "Committed changeset batch");
        }
        Ok(inserted)
    }
}

impl HistoryCache for DbHistoryCache {
    fn initialize(&self) -> Result<(), HistoryError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.with_retry("initialize", || {
            let conn = self.connect()?;
            if schema::stored_version(&conn)?.is_none() {
                info!(db = %self.db_path.display(), "Creating history database");
            }
            schema::apply(&conn)?;
            self.counters.seed(&conn)
        })
    }

    fn optimize(&self) -> Result<(), HistoryError> {
        self.with_retry("optimize", || {
            self.connect()?.execute_batch("PRAGMA optimize;")?;
            Ok(())
        })
    }

    fn get(&self, file: &Path, repo: &dyn Repository, with_files: bool) -> Result<Option<History>, HistoryError> {
        self.with_retry("get", || self.get_once(file, repo, with_files))
    }

    fn store(&self, history: &History, repo: &dyn Repository) -> Result<(), HistoryError> {
        let start = std::time::Instant::now();
        let inserted = self.with_retry("store", || self.store_once(history, repo))?;
        info!(
            repo = %repo.directory().display(),
            changesets = inserted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stored history in database cache"
        );
        Ok(())
    }

    fn has_cache_for_directory(&self, _dir: &Path, repo: &dyn Repository) -> Result<bool, HistoryError> {
        self.with_retry("has_cache_for_directory", || {
            let conn = self.connect()?;
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM changesets cs JOIN repositories r ON r.id = cs.repository \
                 WHERE r.path = ?1)",
                params![repository_key(repo)],
                |row| row.get(0),
            )?;
            Ok(found)
        })
    }

    fn latest_cached_revision(&self, repo: &dyn Repository) -> Result<Option<String>, HistoryError> {
        self.with_retry("latest_cached_revision", || {
            let conn = self.connect()?;
            match conn.query_row(
                "SELECT cs.revision FROM changesets cs JOIN repositories r ON r.id = cs.repository \
                 WHERE r.path = ?1 ORDER BY cs.id DESC LIMIT 1",
                params![repository_key(repo)],
                |row| row.get(0),
            ) {
                Ok(rev) => Ok(Some(rev)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn clear(&self, repo_dir: &Path) -> Result<(), HistoryError> {
        let prefix = canonical_or_normalized(repo_dir).to_string_lossy().into_owned();
        self.with_retry("clear", || {
            let conn = self.connect()?;
            let repos: Vec<(i64, String)> = {
                let mut stmt = conn.prepare("SELECT id, path FROM repositories")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            for (id, path) in repos.iter().filter(|(_, path)| matches_path_prefix(path, &prefix)) {
                conn.execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
                info!(repo = %path, "Cleared database history cache");
            }
            Ok(())
        })
    }

    fn invalidate(&self, repo: &dyn Repository) -> Result<(), HistoryError> {
        let key = repository_key(repo);
        self.with_retry("invalidate", || {
            let conn = self.connect()?;
            let deleted = conn.execute("DELETE FROM repositories WHERE path = ?1", params![key])?;
            if deleted > 0 {
                info!(repo = %key, "Invalidated database history cache");
            }
            Ok(())
        })
    }

    fn info(&self) -> String {
        format!("database cache at {}", self.db_path.display())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
