//! Error types
//!
//! Every failure the migration core can produce is a [`MigrateError`]. Variants
//! carry the context needed to act on them (lock owner, config field, ledger
//! version) instead of a pre-formatted string.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = MigrateError> = std::result::Result<T, E>;

/// Errors returned by the driver, lock manager, and runner
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Lock acquisition exceeded its deadline
    #[error("lock acquisition timed out after {waited:?} (held by '{owner}')")]
    LockTimeout { owner: String, waited: Duration },

    /// Lock is held by another contender (single-attempt acquisition only)
    #[error("lock already held by '{owner}'")]
    LockHeld { owner: String },

    /// Malformed connection URL or parameter
    #[error("invalid configuration: field={field}, value={value:?}: {message}")]
    InvalidConfig {
        field: &'static str,
        value: String,
        message: String,
    },

    /// No driver registered for the URL scheme
    #[error("unknown database driver scheme '{scheme}'")]
    UnknownScheme { scheme: String },

    /// Operation attempted after `close()`
    #[error("database connection is closed")]
    DatabaseClosed,

    /// Migration content could not be read or interpreted
    #[error("invalid migration content{}: {message}", fmt_version(.version))]
    InvalidMigration {
        version: Option<i64>,
        message: String,
    },

    /// Migration execution or commit failed
    #[error("transaction failed during {operation}: {source}")]
    TransactionFailed {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Writing the version ledger failed
    #[error("migration ledger error: version={version}, dirty={dirty}: {source}")]
    Ledger {
        version: i64,
        dirty: bool,
        #[source]
        source: rusqlite::Error,
    },

    /// Connection, DDL, or query failure outside a migration
    #[error("database error during {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Caller cancelled a blocking operation
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// Ledger is dirty; a human must resolve it (e.g. force a version)
    #[error("database is dirty at version {version}; fix the schema and force a version")]
    Dirty { version: i64 },

    /// Migration source could not be read
    #[error("failed to read migration source {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn fmt_version(version: &Option<i64>) -> String {
    match version {
        Some(v) => format!(" (version {})", v),
        None => String::new(),
    }
}

impl MigrateError {
    /// Build an [`MigrateError::InvalidConfig`]
    pub fn invalid_config(
        field: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            field,
            value: value.into(),
            message: message.into(),
        }
    }

    /// Build a [`MigrateError::Database`] from a rusqlite error
    pub fn database(operation: &'static str, source: rusqlite::Error) -> Self {
        Self::Database { operation, source }
    }

    /// Whether this error is a lock contention outcome (timeout or held)
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::LockHeld { .. })
    }
}

/// Whether a rusqlite error reports a missing table
pub(crate) fn is_no_such_table(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.contains("no such table"),
        other => other.to_string().contains("no such table"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = MigrateError::invalid_config("x-tx-mode", "LAZY", "unknown transaction mode");
        assert_eq!(
            err.to_string(),
            "invalid configuration: field=x-tx-mode, value=\"LAZY\": unknown transaction mode"
        );
    }

    #[test]
    fn test_invalid_migration_display() {
        let err = MigrateError::InvalidMigration {
            version: Some(3),
            message: "not valid UTF-8".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid migration content (version 3): not valid UTF-8"
        );

        let err = MigrateError::InvalidMigration {
            version: None,
            message: "empty".to_string(),
        };
        assert_eq!(err.to_string(), "invalid migration content: empty");
    }

    #[test]
    fn test_lock_contention() {
        let timeout = MigrateError::LockTimeout {
            owner: "a".to_string(),
            waited: Duration::from_secs(15),
        };
        assert!(timeout.is_lock_contention());
        assert!(!MigrateError::DatabaseClosed.is_lock_contention());
    }

    #[test]
    fn test_no_such_table_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn
            .execute("DELETE FROM missing_table", [])
            .unwrap_err();
        assert!(is_no_such_table(&err));

        let err = conn.execute("NOT SQL", []).unwrap_err();
        assert!(!is_no_such_table(&err));
    }
}
