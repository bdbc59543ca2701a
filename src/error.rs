//! Unified error type for the history layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::repository::RepositoryKind;

/// All errors that can occur in history, annotation and cache operations.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// I/O error (cache file read/write, directory access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error (bincode)
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Relational cache failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// External VCS client exited with a non-zero status
    #[error("'{program} {}' failed with {status}: {stderr}", .args.join(" "))]
    Command {
        program: String,
        args: Vec<String>,
        status: String,
        stderr: String,
    },

    /// External VCS client could not be started at all
    #[error("Failed to execute '{program}': {source}. Is it installed and in PATH?")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// External VCS client ran past its deadline and was killed
    #[error("'{program}' timed out after {timeout_secs}s and was killed")]
    CommandTimeout { program: String, timeout_secs: u64 },

    /// The client tool for this repository kind is not usable
    #[error("{kind} client is not available")]
    NotWorking { kind: RepositoryKind },

    /// The boundary entry of an incremental fetch did not match the cached revision
    #[error("Incremental history boundary mismatch: expected revision '{expected}', found {}",
        .found.as_deref().unwrap_or("nothing"))]
    IncrementalBoundary {
        expected: String,
        found: Option<String>,
    },

    /// Operation not implemented by this repository kind
    #[error("{operation} is not supported for {kind} repositories")]
    Unsupported {
        kind: RepositoryKind,
        operation: &'static str,
    },

    /// No registered repository owns the path
    #[error("No repository found for {}", .0.display())]
    NoRepository(PathBuf),

    /// Path cannot be expressed relative to a repository or source root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Failed to load a cache artifact from disk
    #[error("Failed to load history cache from {path}: {message}")]
    CacheLoad { path: String, message: String },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock poisoned (thread panicked while holding a lock)
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Argument validation error
    #[error("{0}")]
    InvalidArgs(String),
}

impl HistoryError {
    /// True for SQLite conditions that go away when retried (busy / locked).
    pub fn is_transient(&self) -> bool {
        match self {
            HistoryError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = HistoryError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_command_error_display() {
        let err = HistoryError::Command {
            program: "git".to_string(),
            args: vec!["log".to_string(), "--name-only".to_string()],
            status: "exit status: 128".to_string(),
            stderr: "fatal: not a git repository".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("git log --name-only"));
        assert!(msg.contains("128"));
        assert!(msg.contains("not a git repository"));
    }

    #[test]
    fn test_boundary_error_display() {
        let err = HistoryError::IncrementalBoundary {
            expected: "42".to_string(),
            found: None,
        };
        assert!(err.to_string().contains("'42'"));
        assert!(err.to_string().contains("nothing"));
    }

    #[test]
    fn test_unsupported_display() {
        let err = HistoryError::Unsupported {
            kind: RepositoryKind::AccuRev,
            operation: "update",
        };
        assert_eq!(err.to_string(), "update is not supported for AccuRev repositories");
    }

    #[test]
    fn test_busy_is_transient() {
        let err = HistoryError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_constraint_is_not_transient() {
        let err = HistoryError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!err.is_transient());
        assert!(!HistoryError::InvalidArgs("x".into()).is_transient());
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: HistoryError = io_err.into();
        assert!(matches!(err, HistoryError::Io(_)));
    }
}
