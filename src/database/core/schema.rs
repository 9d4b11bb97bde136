//! Ledger and lock table schema
//!
//! This module owns the DDL for the two tables the driver keeps inside the
//! migrated database: the version ledger and its `_lock` companion. Table
//! names come from configuration, so they are validated against a strict
//! identifier allow-list before they are ever interpolated into SQL.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Default name of the version ledger table
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Suffix appended to the ledger table name to form the lock table name
pub const LOCK_TABLE_SUFFIX: &str = "_lock";

/// Longest accepted ledger table name
pub const MAX_TABLE_NAME_LEN: usize = 63;

/// Check that a configured table name is a plain SQL identifier
///
/// Accepted: `[A-Za-z_][A-Za-z0-9_]*`, at most [`MAX_TABLE_NAME_LEN`] bytes,
/// not starting with the reserved `sqlite_` prefix.
pub fn validate_table_name(name: &str) -> Result<()> {
    let invalid = |message: &str| {
        Err(MigrateError::invalid_config(
            "x-migrations-table",
            name,
            message,
        ))
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return invalid("table name is required"),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return invalid("table name must start with a letter or underscore")
        }
        _ => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid("table name may only contain letters, digits, and underscores");
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return invalid("table name is too long");
    }
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return invalid("table names starting with 'sqlite_' are reserved");
    }
    Ok(())
}

/// SQL for the ledger and lock tables of one configured ledger name
///
/// Construct only from a name that passed [`validate_table_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSchema {
    ledger_table: String,
    lock_table: String,
}

impl LedgerSchema {
    /// Validate the ledger table name and derive the lock table name
    pub fn new(ledger_table: &str) -> Result<Self> {
        validate_table_name(ledger_table)?;
        Ok(Self {
            ledger_table: ledger_table.to_string(),
            lock_table: format!("{}{}", ledger_table, LOCK_TABLE_SUFFIX),
        })
    }

    pub fn ledger_table(&self) -> &str {
        &self.ledger_table
    }

    pub fn lock_table(&self) -> &str {
        &self.lock_table
    }

    /// SQL for creating the version ledger table
    pub fn create_ledger_table(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                dirty BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            self.ledger_table
        )
    }

    /// SQL for creating the single-row lock table
    pub fn create_lock_table(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                locked BOOLEAN NOT NULL DEFAULT FALSE,
                owner TEXT,
                acquired_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                CHECK (id = 1)
            )
            "#,
            self.lock_table
        )
    }

    /// SQL for seeding the lock row; a no-op when it already exists
    pub fn seed_lock_row(&self) -> String {
        format!(
            "INSERT OR IGNORE INTO {} (id, locked, owner, acquired_at) VALUES (1, FALSE, '', CURRENT_TIMESTAMP)",
            self.lock_table
        )
    }
}

/// Schema manager for the ledger and lock tables
///
/// Every operation is idempotent, so it is safe to run against a database
/// that another driver instance initialized already.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
    schema: &'a LedgerSchema,
}

impl<'a> SchemaManager<'a> {
    /// Create a new schema manager for the given connection
    pub fn new(conn: &'a Connection, schema: &'a LedgerSchema) -> Self {
        Self { conn, schema }
    }

    /// Create the ledger table, the lock table, and the lock row
    pub fn initialize(&self) -> Result<()> {
        self.ensure_ledger_table()?;
        self.ensure_lock_table()?;
        self.seed_lock_row()?;
        debug!(
            ledger = self.schema.ledger_table(),
            lock = self.schema.lock_table(),
            "migration tables ready"
        );
        Ok(())
    }

    pub fn ensure_ledger_table(&self) -> Result<()> {
        self.conn
            .execute(&self.schema.create_ledger_table(), [])
            .map(|_| ())
            .map_err(|e| MigrateError::database("create migrations table", e))
    }

    pub fn ensure_lock_table(&self) -> Result<()> {
        self.conn
            .execute(&self.schema.create_lock_table(), [])
            .map(|_| ())
            .map_err(|e| MigrateError::database("create lock table", e))
    }

    pub fn seed_lock_row(&self) -> Result<()> {
        self.conn
            .execute(&self.schema.seed_lock_row(), [])
            .map(|_| ())
            .map_err(|e| MigrateError::database("initialize lock row", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_sql(conn: &Connection, name: &str) -> Option<String> {
        conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get(0),
        )
        .ok()
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("schema_migrations").is_ok());
        assert!(validate_table_name("_private").is_ok());
        assert!(validate_table_name("v2_migrations").is_ok());

        for bad in [
            "",
            "2fast",
            "drop table x",
            "a;b",
            "name\"quote",
            "sqlite_master",
            "SQLITE_thing",
        ] {
            assert!(
                matches!(
                    validate_table_name(bad),
                    Err(MigrateError::InvalidConfig {
                        field: "x-migrations-table",
                        ..
                    })
                ),
                "{bad:?} should be rejected"
            );
        }

        let long = "a".repeat(MAX_TABLE_NAME_LEN + 1);
        assert!(validate_table_name(&long).is_err());
    }

    #[test]
    fn test_lock_table_name() {
        let schema = LedgerSchema::new("custom").unwrap();
        assert_eq!(schema.ledger_table(), "custom");
        assert_eq!(schema.lock_table(), "custom_lock");
    }

    #[test]
    fn test_initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = LedgerSchema::new(DEFAULT_LEDGER_TABLE).unwrap();
        SchemaManager::new(&conn, &schema).initialize().unwrap();

        let ledger = table_sql(&conn, "schema_migrations").unwrap();
        assert!(ledger.contains("version INTEGER PRIMARY KEY"));
        let lock = table_sql(&conn, "schema_migrations_lock").unwrap();
        assert!(lock.contains("CHECK (id = 1)"));

        let (count, locked, owner): (i64, bool, String) = conn
            .query_row(
                "SELECT COUNT(*), locked, owner FROM schema_migrations_lock",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!(!locked);
        assert_eq!(owner, "");
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = LedgerSchema::new(DEFAULT_LEDGER_TABLE).unwrap();
        let manager = SchemaManager::new(&conn, &schema);

        manager.initialize().unwrap();
        conn.execute(
            "UPDATE schema_migrations_lock SET locked = TRUE, owner = 'x'",
            [],
        )
        .unwrap();
        manager.initialize().unwrap();

        // Re-seeding must not reset an existing lock row
        let locked: bool = conn
            .query_row("SELECT locked FROM schema_migrations_lock", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(locked);
    }

    #[test]
    fn test_lock_row_pinned_to_single_id() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = LedgerSchema::new(DEFAULT_LEDGER_TABLE).unwrap();
        SchemaManager::new(&conn, &schema).initialize().unwrap();

        let result = conn.execute(
            "INSERT INTO schema_migrations_lock (id, locked, owner) VALUES (2, FALSE, '')",
            [],
        );
        assert!(result.is_err());
    }
}
