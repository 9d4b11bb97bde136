//! SQLite implementation of the migration driver

use std::io::Read;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::DriverConfig;
use super::lock::{LockManager, LockStatus};
use super::{Driver, NIL_VERSION};
use crate::database::core::{quote_identifier, DatabaseConn, LedgerSchema, SchemaManager};
use crate::error::{is_no_such_table, MigrateError, Result};

/// One row of the version ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    pub version: i64,
    pub dirty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}

/// Migration driver over a single SQLite connection
///
/// Created with [`SqliteDriver::open`] from a connection URL, or with
/// [`SqliteDriver::with_instance`] around a connection the application
/// already holds. Either way the ledger and lock tables are created if
/// missing before the driver is returned.
pub struct SqliteDriver {
    db: Option<DatabaseConn>,
    config: DriverConfig,
    schema: LedgerSchema,
    lock: LockManager,
}

impl SqliteDriver {
    /// Parse `url`, open the database, and initialize the migration tables
    pub fn open(url: &str) -> Result<Self> {
        let config = DriverConfig::parse(url)?;
        let db = DatabaseConn::open(&config.database_location)?;
        Self::from_db(db, config)
    }

    /// Adapt an already-open connection
    ///
    /// An empty `database_location` in `config` is filled in from the
    /// connection itself.
    pub fn with_instance(conn: Connection, mut config: DriverConfig) -> Result<Self> {
        let db = DatabaseConn::from_connection(conn)?;
        if config.database_location.is_empty() {
            config.database_location = db.location();
        }
        config.validate()?;
        Self::from_db(db, config)
    }

    fn from_db(db: DatabaseConn, config: DriverConfig) -> Result<Self> {
        let schema = config.schema()?;
        SchemaManager::new(&db.conn, &schema).initialize()?;
        let lock = LockManager::from_config(&config, LockManager::generate_owner())?;

        info!(
            database = %config.database_location,
            ledger = schema.ledger_table(),
            "opened migration driver"
        );

        Ok(Self {
            db: Some(db),
            config,
            schema,
            lock,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Owner identifier this driver writes into the lock row
    pub fn lock_owner(&self) -> &str {
        self.lock.owner()
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_none()
    }

    fn db(&self) -> Result<&DatabaseConn> {
        self.db.as_ref().ok_or(MigrateError::DatabaseClosed)
    }

    /// The underlying connection, for callers that share it with other code
    pub fn connection(&self) -> Result<&Connection> {
        Ok(&self.db()?.conn)
    }

    /// Acquire the migration lock, giving up early when `cancel` fires
    pub fn lock_with_cancel(&mut self, cancel: &CancellationToken) -> Result<()> {
        let db = self.db()?;
        self.lock.acquire(&db.conn, cancel)
    }

    /// Attempt the lock once; [`MigrateError::LockHeld`] if someone else has it
    pub fn try_lock(&mut self) -> Result<()> {
        let db = self.db()?;
        if self.lock.try_acquire(&db.conn)? {
            return Ok(());
        }
        let owner = self.lock.status(&db.conn)?.owner.unwrap_or_default();
        Err(MigrateError::LockHeld { owner })
    }

    pub fn lock_status(&self) -> Result<LockStatus> {
        let db = self.db()?;
        self.lock.status(&db.conn)
    }

    /// Clear the lock no matter who holds it
    pub fn force_unlock(&mut self) -> Result<()> {
        let db = self.db()?;
        self.lock.force_release(&db.conn)
    }

    /// All ledger rows in ascending version order
    ///
    /// More than one row means dirty attempts were recorded after the last
    /// clean version.
    pub fn history(&self) -> Result<Vec<LedgerRow>> {
        let db = self.db()?;
        if !db.table_exists(self.schema.ledger_table())? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT version, dirty, created_at FROM {} ORDER BY version ASC",
            self.schema.ledger_table()
        );
        let mut stmt = db
            .conn
            .prepare(&query)
            .map_err(|e| MigrateError::database("read ledger history", e))?;
        let rows = stmt
            .query_map([], |row| {
                let created_at: Option<String> = row.get(2)?;
                Ok(LedgerRow {
                    version: row.get(0)?,
                    dirty: row.get(1)?,
                    created_at: created_at.and_then(|s| {
                        NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()
                    }),
                })
            })
            .map_err(|e| MigrateError::database("read ledger history", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| MigrateError::database("read ledger history", e))?;

        Ok(rows)
    }

    fn execute_with_transaction(&self, db: &DatabaseConn, sql: &str) -> Result<()> {
        // The tx mode is the BEGIN variant itself
        let tx = rusqlite::Transaction::new_unchecked(&db.conn, self.config.tx_mode.behavior())
            .map_err(|e| MigrateError::TransactionFailed {
                operation: "begin migration transaction",
                source: e,
            })?;

        tx.execute_batch(sql)
            .map_err(|e| MigrateError::TransactionFailed {
                operation: "execute migration",
                source: e,
            })?;

        tx.commit().map_err(|e| MigrateError::TransactionFailed {
            operation: "commit migration",
            source: e,
        })
    }

    /// Statements before a failing one stay applied
    fn execute_without_transaction(&self, db: &DatabaseConn, sql: &str) -> Result<()> {
        db.conn
            .execute_batch(sql)
            .map_err(|e| MigrateError::TransactionFailed {
                operation: "execute migration without transaction",
                source: e,
            })
    }

    fn drop_tables(db: &DatabaseConn) -> Result<usize> {
        let mut dropped = 0;
        for table in db.user_tables()? {
            let query = format!("DROP TABLE IF EXISTS {}", quote_identifier(&table));
            match db.conn.execute(&query, []) {
                Ok(_) => {
                    debug!(table = %table, "dropped table");
                    dropped += 1;
                }
                Err(e) if is_no_such_table(&e) => {
                    debug!(table = %table, "table already gone");
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "failed to drop table");
                    return Err(MigrateError::database("drop table", e));
                }
            }
        }
        Ok(dropped)
    }
}

impl Driver for SqliteDriver {
    fn close(&mut self) -> Result<()> {
        match self.db.take() {
            Some(db) => {
                db.close()?;
                info!(database = %self.config.database_location, "closed migration driver");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn lock(&mut self) -> Result<()> {
        self.lock_with_cancel(&CancellationToken::new())
    }

    fn unlock(&mut self) -> Result<()> {
        let db = self.db()?;
        self.lock.release(&db.conn)
    }

    fn run(&mut self, migration: &mut dyn Read) -> Result<()> {
        let db = self.db()?;

        let mut content = Vec::new();
        migration
            .read_to_end(&mut content)
            .map_err(|e| MigrateError::InvalidMigration {
                version: None,
                message: format!("failed to read migration: {}", e),
            })?;
        let content = String::from_utf8(content).map_err(|e| MigrateError::InvalidMigration {
            version: None,
            message: format!("migration is not valid UTF-8: {}", e),
        })?;

        let sql = content.trim();
        if sql.is_empty() {
            debug!("empty migration, nothing to execute");
            return Ok(());
        }

        if self.config.no_tx_wrap {
            self.execute_without_transaction(db, sql)
        } else {
            self.execute_with_transaction(db, sql)
        }
    }

    fn set_version(&mut self, version: i64, dirty: bool) -> Result<()> {
        let db = self.db()?;
        let ledger = self.schema.ledger_table();
        let ledger_err = |source| MigrateError::Ledger {
            version,
            dirty,
            source,
        };

        // A previous drop_all may have removed the ledger
        SchemaManager::new(&db.conn, &self.schema).ensure_ledger_table()?;

        let insert = format!("INSERT INTO {} (version, dirty) VALUES (?1, ?2)", ledger);

        if dirty {
            db.conn
                .execute(&insert, params![version, dirty])
                .map_err(ledger_err)?;
        } else {
            let tx = db.transaction(TransactionBehavior::Immediate)?;
            tx.execute(&format!("DELETE FROM {}", ledger), [])
                .map_err(ledger_err)?;
            tx.execute(&insert, params![version, dirty])
                .map_err(ledger_err)?;
            tx.commit().map_err(ledger_err)?;
        }

        debug!(version, dirty, "recorded ledger version");
        Ok(())
    }

    fn version(&self) -> Result<(i64, bool)> {
        let db = self.db()?;
        let ledger = self.schema.ledger_table();
        if !db.table_exists(ledger)? {
            return Ok((NIL_VERSION, false));
        }

        let query = format!(
            "SELECT version, dirty FROM {} ORDER BY version DESC LIMIT 1",
            ledger
        );
        match db
            .conn
            .query_row(&query, [], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
        {
            Ok(Some(current)) => Ok(current),
            Ok(None) => Ok((NIL_VERSION, false)),
            Err(e) if is_no_such_table(&e) => Ok((NIL_VERSION, false)),
            Err(e) => Err(MigrateError::database("read version", e)),
        }
    }

    fn drop_all(&mut self) -> Result<()> {
        let db = self.db()?;

        // Dropping a referenced parent table fails with foreign keys enforced
        let foreign_keys: bool = db
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .map_err(|e| MigrateError::database("read foreign_keys pragma", e))?;
        if foreign_keys {
            db.conn
                .execute_batch("PRAGMA foreign_keys = OFF")
                .map_err(|e| MigrateError::database("disable foreign keys", e))?;
        }

        let result = Self::drop_tables(db);

        if foreign_keys {
            let restored = db
                .conn
                .execute_batch("PRAGMA foreign_keys = ON")
                .map_err(|e| MigrateError::database("restore foreign keys", e));
            if result.is_ok() {
                restored?;
            }
        }

        let dropped = result?;
        info!(tables = dropped, "dropped all tables");
        Ok(())
    }
}
