use anyhow::Result;
use clap::Args;
use litemigrate::{MigrateSettings, OutputFormat};

use super::{open_migrator_without_source, print_rows, VersionRow};

/// Arguments for the Force command
#[derive(Args)]
pub struct ForceArgs {
    /// Version to record as clean; -1 clears the ledger
    #[clap(allow_hyphen_values = true)]
    pub version: i64,
}

pub fn run(settings: &MigrateSettings, args: ForceArgs, output_format: OutputFormat) -> Result<()> {
    let ForceArgs { version } = args;

    let mut migrator = open_migrator_without_source(settings)?;
    migrator.force(version)?;
    let (version, dirty) = migrator.version()?;
    migrator.close()?;

    print_rows(&[VersionRow { version, dirty }], output_format)
}
