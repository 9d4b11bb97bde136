//! Migration runner
//!
//! [`Migrator`] drives a [`Driver`] through the pending migrations of a
//! [`MigrationSource`]. Every mutating operation runs under the driver's
//! lock, so several migrators pointed at the same database serialize and
//! the late ones find nothing left to do.
//!
//! # Example
//!
//! ```rust,ignore
//! use litemigrate::runner::{DirSource, Migrator};
//!
//! let source = DirSource::open("migrations")?;
//! let mut migrator = Migrator::open("sqlite3://app.db", Box::new(source))?;
//! let applied = migrator.up()?;
//! println!("applied {} migrations", applied);
//! migrator.close()?;
//! ```

mod source;

pub use source::{DirSource, MemorySource, MigrationInfo, MigrationSource};

use tracing::{info, warn};

use crate::database::{default_registry, Driver, NIL_VERSION};
use crate::error::{MigrateError, Result};

/// Applies migrations from a source to a database
pub struct Migrator {
    driver: Box<dyn Driver>,
    source: Box<dyn MigrationSource>,
}

impl Migrator {
    pub fn new(driver: Box<dyn Driver>, source: Box<dyn MigrationSource>) -> Self {
        Self { driver, source }
    }

    /// Open the database through the default driver registry
    pub fn open(database_url: &str, source: Box<dyn MigrationSource>) -> Result<Self> {
        let driver = default_registry().open(database_url)?;
        Ok(Self::new(driver, source))
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn source(&self) -> &dyn MigrationSource {
        self.source.as_ref()
    }

    /// Current `(version, dirty)` of the database
    pub fn version(&self) -> Result<(i64, bool)> {
        self.driver.version()
    }

    /// Migrations newer than the current version
    pub fn pending(&self) -> Result<Vec<MigrationInfo>> {
        let (current, _) = self.driver.version()?;
        Ok(self
            .source
            .migrations()
            .into_iter()
            .filter(|m| m.version > current)
            .collect())
    }

    /// Apply every pending migration, returning how many ran
    ///
    /// Refuses to start on a dirty ledger. A failing migration leaves the
    /// ledger dirty at its version. The lock is released either way.
    pub fn up(&mut self) -> Result<usize> {
        self.with_lock(Self::apply_pending)
    }

    /// Record `version` as clean without running anything
    ///
    /// The recovery path after a failed migration has been fixed by hand.
    /// `-1` resets the database to "no migration applied".
    pub fn force(&mut self, version: i64) -> Result<()> {
        if version < NIL_VERSION {
            return Err(MigrateError::InvalidMigration {
                version: Some(version),
                message: format!("cannot force a version below {}", NIL_VERSION),
            });
        }
        self.with_lock(|migrator| {
            migrator.driver.set_version(version, false)?;
            warn!(version, "forced migration version");
            Ok(())
        })
    }

    /// Drop every table in the database, ledger included
    pub fn drop_all(&mut self) -> Result<()> {
        self.with_lock(|migrator| migrator.driver.drop_all())
    }

    pub fn close(mut self) -> Result<()> {
        self.driver.close()
    }

    fn with_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.driver.lock()?;
        let result = f(self);
        let unlocked = self.driver.unlock();
        let value = result?;
        unlocked?;
        Ok(value)
    }

    fn apply_pending(&mut self) -> Result<usize> {
        let (current, dirty) = self.driver.version()?;
        if dirty {
            warn!(version = current, "refusing to migrate a dirty database");
            return Err(MigrateError::Dirty { version: current });
        }

        let pending: Vec<MigrationInfo> = self
            .source
            .migrations()
            .into_iter()
            .filter(|m| m.version > current)
            .collect();
        if pending.is_empty() {
            info!(version = current, "no pending migrations");
            return Ok(0);
        }

        for migration in &pending {
            let version = migration.version;
            self.driver.set_version(version, true)?;
            {
                let mut reader = self.source.read_up(version)?;
                self.driver.run(&mut reader).map_err(|e| match e {
                    MigrateError::InvalidMigration {
                        version: None,
                        message,
                    } => MigrateError::InvalidMigration {
                        version: Some(version),
                        message,
                    },
                    other => other,
                })?;
            }
            self.driver.set_version(version, false)?;
            info!(version, title = %migration.title, "applied migration");
        }

        Ok(pending.len())
    }
}
