//! Table-based advisory lock
//!
//! Mutual exclusion between independent drivers (possibly in separate
//! processes) sharing one database file. The only coordination medium is a
//! single-row `<ledger>_lock` table: a contender wins by flipping
//! `locked` from false to true with a conditional `UPDATE`, and SQLite's
//! write serialization guarantees at most one such update succeeds per round.
//!
//! Acquisition polls: a losing contender sleeps for the poll interval and
//! tries again until the timeout elapses. Cancellation is observed once per
//! iteration, so a cancel issued mid-sleep takes effect after that sleep.
//!
//! Each attempt may itself wait up to the connection's busy timeout while
//! another writer holds the file, so a [`MigrateError::LockTimeout`] can
//! arrive up to that long after the configured timeout. A timeout too large
//! to represent as a deadline waits without one.

use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{DriverConfig, DEFAULT_LOCK_POLL_INTERVAL, DEFAULT_LOCK_TIMEOUT};
use crate::database::core::LedgerSchema;
use crate::error::{is_no_such_table, MigrateError, Result};

/// Prefix of generated lock owner identifiers
pub const OWNER_PREFIX: &str = "litemigrate";

const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Point-in-time view of the lock row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<NaiveDateTime>,
}

impl LockStatus {
    fn unlocked() -> Self {
        Self {
            locked: false,
            owner: None,
            acquired_at: None,
        }
    }
}

/// Advisory lock over the `<ledger>_lock` table
#[derive(Debug, Clone)]
pub struct LockManager {
    schema: LedgerSchema,
    owner: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl LockManager {
    /// Create a lock manager with the default 15s timeout and 100ms poll interval
    pub fn new(schema: LedgerSchema, owner: impl Into<String>) -> Self {
        Self {
            schema,
            owner: owner.into(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }

    /// Create a lock manager using a driver configuration's table and timing
    pub fn from_config(config: &DriverConfig, owner: impl Into<String>) -> Result<Self> {
        Ok(Self::new(config.schema()?, owner)
            .with_timing(config.lock_timeout, config.lock_poll_interval))
    }

    pub fn with_timing(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Generate a unique owner identifier
    pub fn generate_owner() -> String {
        format!("{}-{}", OWNER_PREFIX, uuid::Uuid::new_v4())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Acquire the lock, polling until it is free
    ///
    /// Fails with [`MigrateError::LockTimeout`] once the timeout elapses, or
    /// [`MigrateError::Cancelled`] when `cancel` fires.
    pub fn acquire(&self, conn: &Connection, cancel: &CancellationToken) -> Result<()> {
        let started = Instant::now();
        let deadline = started.checked_add(self.timeout);
        let mut attempts: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled {
                    operation: "lock acquisition",
                });
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let owner = self
                    .status(conn)
                    .ok()
                    .and_then(|s| s.owner)
                    .unwrap_or_default();
                warn!(
                    owner = %owner,
                    attempts,
                    "timed out waiting for migration lock"
                );
                return Err(MigrateError::LockTimeout {
                    owner,
                    waited: started.elapsed(),
                });
            }

            attempts += 1;
            if self.try_acquire(conn)? {
                info!(
                    owner = %self.owner,
                    attempts,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "acquired migration lock"
                );
                return Ok(());
            }

            debug!(attempts, "migration lock held elsewhere, retrying");
            thread::sleep(self.poll_interval);
        }
    }

    /// Make a single acquisition attempt
    ///
    /// Returns `false` when another contender holds the lock, including when
    /// SQLite reports the file busy. Creates the lock table on first use.
    pub fn try_acquire(&self, conn: &Connection) -> Result<bool> {
        match self.try_acquire_inner(conn) {
            Ok(acquired) => Ok(acquired),
            Err(e) if is_busy(&e) => Ok(false),
            Err(e) => Err(MigrateError::TransactionFailed {
                operation: "lock acquisition",
                source: e,
            }),
        }
    }

    fn try_acquire_inner(&self, conn: &Connection) -> rusqlite::Result<bool> {
        let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        tx.execute(&self.schema.create_lock_table(), [])?;
        tx.execute(&self.schema.seed_lock_row(), [])?;

        let query = format!(
            "UPDATE {} SET locked = TRUE, owner = ?1, acquired_at = CURRENT_TIMESTAMP WHERE id = 1 AND locked = FALSE",
            self.schema.lock_table()
        );
        let updated = tx.execute(&query, [&self.owner])?;
        if updated == 0 {
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    /// Release the lock
    ///
    /// Idempotent: a missing lock table or an already-deleted lock row are
    /// both treated as released.
    pub fn release(&self, conn: &Connection) -> Result<()> {
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                [self.schema.lock_table()],
                |row| row.get(0),
            )
            .map_err(|e| MigrateError::database("check lock table existence", e))?;
        if !exists {
            debug!("lock table missing, nothing to release");
            return Ok(());
        }

        let query = format!("DELETE FROM {} WHERE id = 1", self.schema.lock_table());
        match conn.execute(&query, []) {
            Ok(0) => {
                debug!("lock row already removed");
                Ok(())
            }
            Ok(_) => {
                info!(owner = %self.owner, "released migration lock");
                Ok(())
            }
            Err(e) if is_no_such_table(&e) => Ok(()),
            Err(e) => Err(MigrateError::database("release lock", e)),
        }
    }

    /// Whether the lock row currently says locked
    pub fn is_locked(&self, conn: &Connection) -> Result<bool> {
        Ok(self.status(conn)?.locked)
    }

    /// Read the lock row; a missing row or table reads as unlocked
    pub fn status(&self, conn: &Connection) -> Result<LockStatus> {
        let query = format!(
            "SELECT locked, owner, acquired_at FROM {} WHERE id = 1",
            self.schema.lock_table()
        );
        let row = conn
            .query_row(&query, [], |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .optional();

        let (locked, owner, acquired_at) = match row {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(LockStatus::unlocked()),
            Err(e) if is_no_such_table(&e) => return Ok(LockStatus::unlocked()),
            Err(e) => return Err(MigrateError::database("check lock status", e)),
        };

        Ok(LockStatus {
            locked,
            owner: owner.filter(|o| !o.is_empty()),
            acquired_at: acquired_at
                .and_then(|s| NaiveDateTime::parse_from_str(&s, SQLITE_TIMESTAMP_FORMAT).ok()),
        })
    }

    /// Clear the lock table regardless of who holds it
    ///
    /// Recovery path for a holder that crashed without unlocking.
    pub fn force_release(&self, conn: &Connection) -> Result<()> {
        let query = format!("DELETE FROM {}", self.schema.lock_table());
        match conn.execute(&query, []) {
            Ok(_) => {
                warn!(by = %self.owner, "force-released migration lock");
                Ok(())
            }
            Err(e) if is_no_such_table(&e) => Ok(()),
            Err(e) => Err(MigrateError::database("force release lock", e)),
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
