//! Database module
//!
//! All storage functionality, organized into:
//!
//! - **core**: SQLite connection wrapper and the ledger/lock table definitions
//! - **driver**: the [`Driver`] contract, its SQLite implementation, the
//!   advisory lock, and the scheme registry
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # DatabaseConn wrapper
//! │   └── schema      # Ledger and lock table DDL
//! │
//! └── driver/         # Migration storage
//!     ├── config      # Connection URL parsing
//!     ├── lock        # Table-based advisory lock
//!     ├── sqlite      # SqliteDriver
//!     └── registry    # Scheme -> driver factory
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use litemigrate::database::{Driver, SqliteDriver};
//!
//! let mut driver = SqliteDriver::open("sqlite3:///tmp/app.db?x-tx-mode=IMMEDIATE")?;
//! driver.lock()?;
//! driver.set_version(1, true)?;
//! driver.run(&mut "CREATE TABLE users (id INTEGER PRIMARY KEY);".as_bytes())?;
//! driver.set_version(1, false)?;
//! driver.unlock()?;
//! driver.close()?;
//! ```

pub mod core;
pub mod driver;

pub use core::{
    quote_identifier, validate_table_name, DatabaseConn, LedgerSchema, SchemaManager,
    DEFAULT_LEDGER_TABLE, LOCK_TABLE_SUFFIX, MAX_TABLE_NAME_LEN,
};

pub use driver::{
    build_url, default_registry, register_sqlite, Driver, DriverConfig, DriverFactory,
    DriverRegistry, LedgerRow, LockManager, LockStatus, SqliteDriver, TxMode, UrlOption,
    DEFAULT_LOCK_POLL_INTERVAL, DEFAULT_LOCK_TIMEOUT, NIL_VERSION,
};
