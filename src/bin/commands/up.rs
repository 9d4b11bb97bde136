use anyhow::Result;
use litemigrate::{DirSource, MigrateSettings, Migrator, OutputFormat};

use super::{print_rows, VersionRow};

pub fn run(settings: &MigrateSettings, output_format: OutputFormat) -> Result<()> {
    let url = settings.require_database_url()?;
    let source = DirSource::open(&settings.migrations_dir)?;

    let mut migrator = Migrator::open(url, Box::new(source))?;
    let pending = migrator.pending()?;
    let applied = migrator.up()?;
    let (version, dirty) = migrator.version()?;
    migrator.close()?;

    // Another migrator may have applied the earliest ones first
    let skipped = pending.len().saturating_sub(applied);
    let applied_migrations: Vec<_> = pending.into_iter().skip(skipped).collect();

    if output_format.is_json() {
        return print_rows(&applied_migrations, output_format);
    }

    if applied_migrations.is_empty() {
        println!("No pending migrations");
    } else {
        print_rows(&applied_migrations, output_format)?;
    }
    print_rows(&[VersionRow { version, dirty }], output_format)
}
