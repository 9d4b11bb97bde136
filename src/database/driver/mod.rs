//! Migration storage driver
//!
//! A migration runner talks to the database only through the [`Driver`]
//! trait, so it never needs to know which engine sits underneath. This
//! module provides:
//!
//! - **config**: connection URL parsing into a validated [`DriverConfig`]
//! - **lock**: the table-based advisory [`LockManager`]
//! - **sqlite**: [`SqliteDriver`], the SQLite implementation of the contract
//! - **registry**: [`DriverRegistry`], mapping URL schemes to driver factories
//!
//! # Ledger semantics
//!
//! The version ledger is append-on-dirty, collapse-on-clean:
//!
//! - `set_version(v, true)` inserts `(v, dirty)` and keeps every earlier row,
//!   so failed attempts leave a trail.
//! - `set_version(v, false)` replaces the whole ledger with the single row
//!   `(v, clean)` in one transaction.
//! - `version()` reports the row with the highest version, or
//!   `(NIL_VERSION, false)` when there is none.

mod config;
mod lock;
mod registry;
mod sqlite;

use std::io::Read;

use crate::error::Result;

pub use config::{
    build_url, DriverConfig, TxMode, UrlOption, DEFAULT_LOCK_POLL_INTERVAL, DEFAULT_LOCK_TIMEOUT,
    PARAM_LOCK_POLL_INTERVAL, PARAM_LOCK_TIMEOUT, PARAM_MIGRATIONS_TABLE, PARAM_NO_TX_WRAP,
    PARAM_TX_MODE, SQLITE_SCHEMES,
};
pub use lock::{LockManager, LockStatus, OWNER_PREFIX};
pub use registry::{default_registry, register_sqlite, DriverFactory, DriverRegistry};
pub use sqlite::{LedgerRow, SqliteDriver};

/// Version reported when no migration has been applied
pub const NIL_VERSION: i64 = -1;

/// Storage contract a migration runner drives
///
/// Expected call sequence: `lock`, then for each pending migration
/// `set_version(v, true)`, `run`, `set_version(v, false)`, then `unlock` and
/// `close`. A failed `run` leaves the ledger dirty at `v`.
pub trait Driver: Send {
    /// Release the underlying connection; a no-op when already closed
    fn close(&mut self) -> Result<()>;

    /// Block until the migration lock is acquired or the timeout elapses
    fn lock(&mut self) -> Result<()>;

    /// Release the migration lock; releasing a free lock succeeds
    fn unlock(&mut self) -> Result<()>;

    /// Execute one migration's SQL text
    fn run(&mut self, migration: &mut dyn Read) -> Result<()>;

    /// Record `version` in the ledger
    fn set_version(&mut self, version: i64, dirty: bool) -> Result<()>;

    /// Current `(version, dirty)`; `(NIL_VERSION, false)` on a fresh database
    fn version(&self) -> Result<(i64, bool)>;

    /// Drop every user table, including the ledger and lock tables
    fn drop_all(&mut self) -> Result<()>;
}
