pub mod config;
pub mod drop;
pub mod force;
pub mod lock;
pub mod up;
pub mod version;

use anyhow::Result;
use litemigrate::output::render;
use litemigrate::{MemorySource, MigrateSettings, Migrator, OutputFormat, SqliteDriver};
use serde::Serialize;
use tabled::Tabled;

/// Open the configured database directly
pub(crate) fn open_driver(settings: &MigrateSettings) -> Result<SqliteDriver> {
    Ok(SqliteDriver::open(settings.require_database_url()?)?)
}

/// Migrator for operations that never read migration files
pub(crate) fn open_migrator_without_source(settings: &MigrateSettings) -> Result<Migrator> {
    Ok(Migrator::open(
        settings.require_database_url()?,
        Box::new(MemorySource::new()),
    )?)
}

#[derive(Debug, Serialize, Tabled)]
pub(crate) struct VersionRow {
    pub version: i64,
    pub dirty: bool,
}

pub(crate) fn print_rows<T: Tabled + Serialize>(rows: &[T], output_format: OutputFormat) -> Result<()> {
    println!("{}", render(rows, output_format)?);
    Ok(())
}
