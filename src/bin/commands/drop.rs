use anyhow::{anyhow, Result};
use clap::Args;
use litemigrate::MigrateSettings;

use super::open_migrator_without_source;

/// Arguments for the Drop command
#[derive(Args)]
pub struct DropArgs {
    /// Confirm dropping every table, data included
    #[clap(long)]
    pub yes: bool,
}

pub fn run(settings: &MigrateSettings, args: DropArgs) -> Result<()> {
    let DropArgs { yes } = args;
    if !yes {
        return Err(anyhow!(
            "drop removes every table in the database; re-run with --yes to confirm"
        ));
    }

    let mut migrator = open_migrator_without_source(settings)?;
    migrator.drop_all()?;
    migrator.close()?;

    println!("Dropped all tables");
    Ok(())
}
