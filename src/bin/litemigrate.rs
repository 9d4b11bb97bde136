mod commands;

use clap::{Parser, Subcommand};
use litemigrate::{MigrateError, MigrateSettings, OutputFormat};
use tracing::Level;

use commands::config::ConfigArgs;
use commands::drop::DropArgs;
use commands::force::ForceArgs;
use commands::lock::LockCommands;
use commands::version::VersionArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default <config_dir>/litemigrate/litemigrate.toml is used
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Database connection URL, e.g. sqlite3://app.db
    #[clap(short, long, global = true)]
    database: Option<String>,

    /// Directory containing <version>_<title>.up.sql migration files
    #[clap(short, long, global = true)]
    source: Option<String>,

    /// Output format: table, markdown, json, json-pretty, json-line
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations.
    Up,

    /// Show the current migration version.
    Version(VersionArgs),

    /// Record a version as clean without running any migration.
    Force(ForceArgs),

    /// Drop every table in the database.
    Drop(DropArgs),

    /// Inspect or clear the migration lock.
    Lock {
        #[clap(subcommand)]
        command: LockCommands,
    },

    /// Show the effective configuration, or write a config template.
    Config(ConfigArgs),
}

fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    if let Commands::Config(ConfigArgs { init: true }) = &cli.command {
        if let Err(e) = commands::config::init(cli.config.clone()) {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let settings = match MigrateSettings::new(&cli.config) {
        Ok(settings) => settings.with_overrides(cli.database, cli.source),
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let output_format = cli.format;

    let result = match cli.command {
        Commands::Up => commands::up::run(&settings, output_format),
        Commands::Version(args) => commands::version::run(&settings, args, output_format),
        Commands::Force(args) => commands::force::run(&settings, args, output_format),
        Commands::Drop(args) => commands::drop::run(&settings, args),
        Commands::Lock { command } => commands::lock::run(&settings, command, output_format),
        Commands::Config(_) => commands::config::run(&settings, output_format),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        if e
            .downcast_ref::<MigrateError>()
            .is_some_and(MigrateError::is_lock_contention)
        {
            eprintln!("Run `litemigrate lock status` to see the holder, or `litemigrate lock release` if it crashed");
        }
        std::process::exit(1);
    }
}
