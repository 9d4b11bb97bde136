use anyhow::Result;
use clap::Subcommand;
use litemigrate::{Driver, LockStatus, MigrateSettings, OutputFormat};
use serde::Serialize;
use tabled::Tabled;

use super::{open_driver, print_rows};

#[derive(Subcommand)]
pub enum LockCommands {
    /// Show whether the migration lock is held, and by whom.
    Status,

    /// Clear the lock regardless of its holder, e.g. after a crashed run.
    Release,
}

#[derive(Debug, Serialize, Tabled)]
struct LockRow {
    locked: bool,
    owner: String,
    acquired_at: String,
}

impl From<LockStatus> for LockRow {
    fn from(status: LockStatus) -> Self {
        LockRow {
            locked: status.locked,
            owner: status.owner.unwrap_or_default(),
            acquired_at: status
                .acquired_at
                .map(|t| t.to_string())
                .unwrap_or_default(),
        }
    }
}

pub fn run(settings: &MigrateSettings, command: LockCommands, output_format: OutputFormat) -> Result<()> {
    let mut driver = open_driver(settings)?;

    match command {
        LockCommands::Status => {
            let status = driver.lock_status()?;
            driver.close()?;
            print_rows(&[LockRow::from(status)], output_format)
        }
        LockCommands::Release => {
            let before = driver.lock_status()?;
            driver.force_unlock()?;
            driver.close()?;
            match before.owner {
                Some(owner) if before.locked => println!("Released lock held by {}", owner),
                _ => println!("Lock was not held"),
            }
            Ok(())
        }
    }
}
