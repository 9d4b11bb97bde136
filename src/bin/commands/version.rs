use anyhow::Result;
use clap::Args;
use litemigrate::{Driver, MigrateSettings, OutputFormat};
use serde::Serialize;
use tabled::Tabled;

use super::{open_driver, print_rows, VersionRow};

/// Arguments for the Version command
#[derive(Args)]
pub struct VersionArgs {
    /// Show every ledger row, including dirty attempts
    #[clap(long)]
    pub history: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct HistoryRow {
    version: i64,
    dirty: bool,
    created_at: String,
}

pub fn run(settings: &MigrateSettings, args: VersionArgs, output_format: OutputFormat) -> Result<()> {
    let VersionArgs { history } = args;

    let mut driver = open_driver(settings)?;

    if history {
        let rows: Vec<HistoryRow> = driver
            .history()?
            .into_iter()
            .map(|row| HistoryRow {
                version: row.version,
                dirty: row.dirty,
                created_at: row
                    .created_at
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            })
            .collect();
        driver.close()?;

        if rows.is_empty() && !output_format.is_json() {
            println!("No migrations recorded");
            return Ok(());
        }
        return print_rows(&rows, output_format);
    }

    let (version, dirty) = driver.version()?;
    driver.close()?;
    print_rows(&[VersionRow { version, dirty }], output_format)
}
