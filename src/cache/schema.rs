//! SQLite schema of the relational history cache.

use rusqlite::{Connection, params};

use crate::error::HistoryError;

/// Stored in `cache_meta`; bump together with [`SCHEMA_STATEMENTS`].
pub const SCHEMA_VERSION: i64 = 1;

/// Tables with surrogate ids handed out by in-process counters.
pub const ID_TABLES: [&str; 5] = ["repositories", "directories", "files", "authors", "changesets"];

/// Replayable DDL (`IF NOT EXISTS` throughout).
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS cache_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY,
        path TEXT NOT NULL UNIQUE
    );",
    "CREATE TABLE IF NOT EXISTS directories (
        id INTEGER PRIMARY KEY,
        repository INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        UNIQUE(repository, path)
    );",
    "CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        directory INTEGER NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        UNIQUE(directory, name)
    );",
    "CREATE TABLE IF NOT EXISTS authors (
        id INTEGER PRIMARY KEY,
        repository INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        UNIQUE(repository, name)
    );",
    "CREATE TABLE IF NOT EXISTS changesets (
        id INTEGER PRIMARY KEY,
        repository INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
        revision TEXT NOT NULL,
        author INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
        timestamp_ms INTEGER,
        message TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        UNIQUE(repository, revision)
    );",
    "CREATE TABLE IF NOT EXISTS filechanges (
        changeset INTEGER NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
        file INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        PRIMARY KEY(changeset, file)
    );",
    "CREATE TABLE IF NOT EXISTS dirchanges (
        changeset INTEGER NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
        directory INTEGER NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
        PRIMARY KEY(changeset, directory)
    );",
    // ── indexes ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_changesets_repository ON changesets(repository, id);",
    "CREATE INDEX IF NOT EXISTS idx_changesets_author ON changesets(author);",
    "CREATE INDEX IF NOT EXISTS idx_filechanges_file ON filechanges(file);",
    "CREATE INDEX IF NOT EXISTS idx_dirchanges_directory ON dirchanges(directory);",
];

/// Switch to WAL, create every table and index, record the schema version.
pub fn apply(conn: &Connection) -> Result<(), HistoryError> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    conn.execute(
        "INSERT INTO cache_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Stored schema version, `None` for a database [`apply`] never touched.
pub fn stored_version(conn: &Connection) -> Result<Option<i64>, HistoryError> {
    match conn.query_row(
        "SELECT value FROM cache_meta WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(v) => Ok(v.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("no such table") => Ok(None),
        Err(e) => Err(e.into()),
    }
}
