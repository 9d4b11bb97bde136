#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! litemigrate - SQLite storage driver for schema migrations
//!
//! litemigrate records which schema migrations have been applied to a
//! SQLite database, executes migration SQL with configurable transaction
//! semantics, and keeps concurrent migrators from stepping on each other
//! with a table-based advisory lock. It can be used as a library or through
//! the `litemigrate` command-line tool.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `litemigrate` binary | `clap`, `dotenvy`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! litemigrate = { version = "0.3", default-features = false }
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: storage
//!   - `core`: connection wrapper and ledger/lock table definitions
//!   - `driver`: the [`Driver`] contract, [`SqliteDriver`], the advisory
//!     lock, and the scheme registry
//! - **[`runner`]**: [`Migrator`] and migration sources
//! - **[`config`]**: settings for the command-line tool
//! - **[`error`]**: the [`MigrateError`] taxonomy
//!
//! # Connection URL
//!
//! ```text
//! sqlite3://<path>?x-migrations-table=schema_migrations&x-no-tx-wrap=false&x-tx-mode=DEFERRED
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use litemigrate::{DirSource, Migrator};
//!
//! let source = DirSource::open("migrations")?;
//! let mut migrator = Migrator::open("sqlite3://app.db?x-tx-mode=IMMEDIATE", Box::new(source))?;
//! migrator.up()?;
//! let (version, dirty) = migrator.version()?;
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod output;
pub mod runner;

pub use config::MigrateSettings;
pub use database::{
    build_url, default_registry, Driver, DriverConfig, DriverRegistry, LedgerRow, LockStatus,
    SqliteDriver, TxMode, UrlOption, NIL_VERSION,
};
pub use error::{MigrateError, Result};
pub use output::OutputFormat;
pub use runner::{DirSource, MemorySource, MigrationInfo, MigrationSource, Migrator};
