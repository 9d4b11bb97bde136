//! Database connection management
//!
//! This module provides the core database connection wrapper used by the driver.

use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{MigrateError, Result};

/// How long a statement waits on a locked database file before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Name used for private in-memory databases
pub const IN_MEMORY: &str = ":memory:";

/// Core database connection wrapper
///
/// `DatabaseConn` provides a thin wrapper around SQLite connections,
/// handling both file-based and in-memory databases with consistent
/// configuration and error handling.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified location
    ///
    /// `":memory:"` opens a private in-memory database. A missing file is
    /// created; a missing parent directory is an error.
    pub fn open(location: &str) -> Result<Self> {
        let conn = if location == IN_MEMORY {
            Connection::open_in_memory()
        } else {
            Connection::open(location)
        }
        .map_err(|e| MigrateError::database("open database", e))?;

        Self::from_connection(conn)
    }

    /// Wrap a connection the caller already opened
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let db = DatabaseConn { conn };
        db.configure()?;
        db.ping()?;
        Ok(db)
    }

    /// Configure connection-level settings
    ///
    /// Only per-connection state is touched here; the journal mode and other
    /// persistent file settings belong to whoever owns the database.
    fn configure(&self) -> Result<()> {
        self.conn
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .map_err(|e| MigrateError::database("set busy timeout", e))
    }

    /// Verify the connection is usable
    pub fn ping(&self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| MigrateError::database("ping database", e))
    }

    /// Location of the main database file, or `":memory:"`
    pub fn location(&self) -> String {
        match self.conn.path() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => IN_MEMORY.to_string(),
        }
    }

    /// Begin a transaction with the given begin-variant
    ///
    /// The transaction is unchecked so it can be opened from a shared
    /// reference; dropping it without commit rolls back.
    pub fn transaction(&self, behavior: TransactionBehavior) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, behavior)
            .map_err(|e| MigrateError::database("begin transaction", e))
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table_name],
                |row| row.get(0),
            )
            .map_err(|e| MigrateError::database("check table existence", e))?;
        Ok(count > 0)
    }

    /// List all user tables, excluding SQLite's internal `sqlite_*` tables
    pub fn user_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(|e| MigrateError::database("list tables", e))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| MigrateError::database("list tables", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MigrateError::database("list tables", e))?;

        Ok(names)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name));
        let count: u64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| MigrateError::database("count table rows", e))?;
        Ok(count)
    }

    /// Close the connection, reporting any error SQLite raises on close
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| MigrateError::database("close database", e))
    }
}

/// Quote an identifier for interpolation into SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open(IN_MEMORY);
        assert!(db.is_ok());
        assert_eq!(db.unwrap().location(), IN_MEMORY);
    }

    #[test]
    fn test_open_file_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.db");
        let path_str = path.to_str().unwrap();

        let db = DatabaseConn::open(path_str).unwrap();
        db.ping().unwrap();
        assert!(path.exists());
        assert!(db.location().ends_with("new.db"));
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/dir/test.db");

        let result = DatabaseConn::open(path.to_str().unwrap());
        assert!(matches!(result, Err(MigrateError::Database { .. })));
    }

    #[test]
    fn test_table_exists() {
        let db = DatabaseConn::open(IN_MEMORY).unwrap();
        db.conn
            .execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)", [])
            .unwrap();

        assert!(db.table_exists("test_table").unwrap());
        assert!(!db.table_exists("nonexistent_table").unwrap());
    }

    #[test]
    fn test_user_tables_skips_internal() {
        let db = DatabaseConn::open(IN_MEMORY).unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE b (id INTEGER PRIMARY KEY AUTOINCREMENT);
                 CREATE TABLE a (id INTEGER);
                 INSERT INTO b DEFAULT VALUES;",
            )
            .unwrap();

        // AUTOINCREMENT creates sqlite_sequence
        assert!(db.table_exists("sqlite_sequence").unwrap());
        assert_eq!(db.user_tables().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_table_count() {
        let db = DatabaseConn::open(IN_MEMORY).unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE test_table (id INTEGER PRIMARY KEY);
                 INSERT INTO test_table (id) VALUES (1), (2), (3);",
            )
            .unwrap();

        assert_eq!(db.table_count("test_table").unwrap(), 3);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("plain"), "\"plain\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
