use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix of environment variables read into [`MigrateSettings`]
pub const ENV_PREFIX: &str = "LITEMIGRATE";

/// Migration directory used when nothing else is configured
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Settings for the `litemigrate` tool
///
/// Layered lowest to highest: TOML config file, `LITEMIGRATE_*` environment
/// variables, command-line flags (via [`MigrateSettings::with_overrides`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrateSettings {
    /// Connection URL, e.g. `sqlite3://app.db`
    pub database_url: Option<String>,

    /// Directory holding `<version>_<title>.up.sql` files
    pub migrations_dir: String,

    /// Config file that was loaded, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

pub const EMPTY_CONFIG: &str = r#"### litemigrate configuration file

### database connection URL
# database_url = "sqlite3://app.db?x-migrations-table=schema_migrations"

### directory containing <version>_<title>.up.sql files
# migrations_dir = "migrations"
"#;

impl Default for MigrateSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dir: DEFAULT_MIGRATIONS_DIR.to_string(),
            config_file: None,
        }
    }
}

impl MigrateSettings {
    /// Load settings from a config file and the environment
    ///
    /// An explicit `path` must exist. Without one, the default config file
    /// is used when present.
    pub fn new(path: &Option<String>) -> Result<MigrateSettings> {
        let file = match path {
            Some(p) => {
                let path = PathBuf::from(p);
                if !path.exists() {
                    return Err(anyhow!("Config file '{}' does not exist", p));
                }
                Some(path)
            }
            None => Self::config_file_path().filter(|p| p.exists()),
        };

        Self::build(file.as_deref(), None)
    }

    /// `env` replaces the process environment when given
    fn build(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<MigrateSettings> {
        let mut builder = Config::builder();

        let config_file = match file {
            Some(path) => {
                let path_str = path
                    .to_str()
                    .ok_or_else(|| anyhow!("Could not convert config path to string"))?;
                builder = builder.add_source(
                    config::File::with_name(path_str).format(config::FileFormat::Toml),
                );
                Some(path_str.to_string())
            }
            None => None,
        };

        // E.g. `LITEMIGRATE_DATABASE_URL=sqlite3://app.db litemigrate up`
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).source(env));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let database_url = config
            .get("database_url")
            .filter(|s| !s.trim().is_empty())
            .cloned();

        let migrations_dir = config
            .get("migrations_dir")
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_MIGRATIONS_DIR.to_string());

        Ok(MigrateSettings {
            database_url,
            migrations_dir,
            config_file,
        })
    }

    /// Apply command-line values on top of loaded settings
    pub fn with_overrides(mut self, database_url: Option<String>, migrations_dir: Option<String>) -> Self {
        if let Some(url) = database_url {
            self.database_url = Some(url);
        }
        if let Some(dir) = migrations_dir {
            self.migrations_dir = dir;
        }
        self
    }

    /// The database URL, or an error naming every way to provide one
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            anyhow!(
                "No database URL configured; pass --database, set {}_DATABASE_URL, or add database_url to the config file",
                ENV_PREFIX
            )
        })
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let lines = [
            format!(
                "Database URL:       {}",
                self.database_url.as_deref().unwrap_or("(not set)")
            ),
            format!("Migrations Dir:     {}", self.migrations_dir),
            format!(
                "Config File:        {}",
                self.config_file.as_deref().unwrap_or("(none)")
            ),
        ];
        lines.join("\n")
    }

    /// Write the commented-out template to `path`, creating parent directories
    ///
    /// Refuses to overwrite an existing file.
    pub fn write_template(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(anyhow!("Config file '{}' already exists", path.display()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create '{}': {}", parent.display(), e))?;
        }
        std::fs::write(path, EMPTY_CONFIG)
            .map_err(|e| anyhow!("Failed to write '{}': {}", path.display(), e))
    }

    /// Default config file location: `<config_dir>/litemigrate/litemigrate.toml`
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("litemigrate").join("litemigrate.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> Option<HashMap<String, String>> {
        Some(HashMap::new())
    }

    #[test]
    fn test_default_settings() {
        let settings = MigrateSettings::default();
        assert_eq!(settings.database_url, None);
        assert_eq!(settings.migrations_dir, "migrations");
        assert!(settings.require_database_url().is_err());
    }

    #[test]
    fn test_build_without_sources() {
        let settings = MigrateSettings::build(None, no_env()).unwrap();
        assert_eq!(settings, MigrateSettings::default());
    }

    #[test]
    fn test_build_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("litemigrate.toml");
        std::fs::write(
            &path,
            "database_url = \"sqlite3://app.db\"\nmigrations_dir = \"db/migrations\"\n",
        )
        .unwrap();

        let settings = MigrateSettings::build(Some(&path), no_env()).unwrap();
        assert_eq!(settings.database_url.as_deref(), Some("sqlite3://app.db"));
        assert_eq!(settings.migrations_dir, "db/migrations");
        assert_eq!(
            settings.config_file.as_deref(),
            Some(path.to_str().unwrap())
        );
    }

    #[test]
    fn test_empty_config_template_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("litemigrate.toml");
        std::fs::write(&path, EMPTY_CONFIG).unwrap();

        let settings = MigrateSettings::build(Some(&path), no_env()).unwrap();
        assert_eq!(settings.database_url, None);
        assert_eq!(settings.migrations_dir, "migrations");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("litemigrate.toml");
        std::fs::write(&path, "database_url = \"sqlite3://file.db\"\n").unwrap();

        let env = HashMap::from([(
            "LITEMIGRATE_DATABASE_URL".to_string(),
            "sqlite3://env.db".to_string(),
        )]);
        let settings = MigrateSettings::build(Some(&path), Some(env)).unwrap();
        assert_eq!(settings.database_url.as_deref(), Some("sqlite3://env.db"));
    }

    #[test]
    fn test_with_overrides() {
        let settings = MigrateSettings::default().with_overrides(
            Some("sqlite3://cli.db".to_string()),
            Some("sql".to_string()),
        );
        assert_eq!(settings.require_database_url().unwrap(), "sqlite3://cli.db");
        assert_eq!(settings.migrations_dir, "sql");

        let kept = settings.clone().with_overrides(None, None);
        assert_eq!(kept, settings);
    }

    #[test]
    fn test_missing_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let result = MigrateSettings::new(&Some(path.to_string_lossy().to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_write_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("litemigrate.toml");

        MigrateSettings::write_template(&path).unwrap();
        let settings = MigrateSettings::build(Some(&path), no_env()).unwrap();
        assert_eq!(settings.database_url, None);
        assert_eq!(settings.config_file.as_deref(), path.to_str());

        // Existing files are left alone
        std::fs::write(&path, "database_url = \"sqlite3://kept.db\"\n").unwrap();
        assert!(MigrateSettings::write_template(&path).is_err());
        let settings = MigrateSettings::build(Some(&path), no_env()).unwrap();
        assert_eq!(settings.database_url.as_deref(), Some("sqlite3://kept.db"));
    }

    #[test]
    fn test_summary() {
        let summary = MigrateSettings::default().summary();
        assert!(summary.contains("(not set)"));
        assert!(summary.contains("migrations"));
    }
}
