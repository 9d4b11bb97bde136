use anyhow::{anyhow, Result};
use clap::Args;
use litemigrate::{MigrateSettings, OutputFormat};
use std::path::PathBuf;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Write a commented-out config file to the default location (or --config)
    #[clap(long)]
    pub init: bool,
}

/// Write the config template; runs before settings are loaded
pub fn init(config_path: Option<String>) -> Result<()> {
    let path = config_path
        .map(PathBuf::from)
        .or_else(MigrateSettings::config_file_path)
        .ok_or_else(|| anyhow!("Could not determine a config directory; pass --config"))?;
    MigrateSettings::write_template(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub fn run(settings: &MigrateSettings, output_format: OutputFormat) -> Result<()> {
    if output_format.is_json() {
        let json = match output_format {
            OutputFormat::JsonPretty => serde_json::to_string_pretty(settings)?,
            _ => serde_json::to_string(settings)?,
        };
        println!("{}", json);
    } else {
        println!("{}", settings.summary());
    }
    Ok(())
}
