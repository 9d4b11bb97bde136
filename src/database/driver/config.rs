//! Driver configuration parsed from a connection URL
//!
//! URL form:
//!
//! ```text
//! sqlite3://<path>[?x-migrations-table=<name>][&x-no-tx-wrap=<bool>][&x-tx-mode=<mode>]
//!                 [&x-lock-timeout=<duration>][&x-lock-poll-interval=<duration>]
//! ```
//!
//! `sqlite3:///abs/path.db` addresses an absolute path, `sqlite3://rel/path.db`
//! a path relative to the working directory. Durations use humantime syntax
//! (`15s`, `250ms`). Unknown `x-` parameters are ignored.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::database::core::{validate_table_name, LedgerSchema, DEFAULT_LEDGER_TABLE};
use crate::error::{MigrateError, Result};

/// URL schemes the SQLite driver answers to
pub const SQLITE_SCHEMES: &[&str] = &["sqlite3", "sqlite"];

/// Default ceiling on lock acquisition
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Default sleep between lock acquisition attempts
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const PARAM_MIGRATIONS_TABLE: &str = "x-migrations-table";
pub const PARAM_NO_TX_WRAP: &str = "x-no-tx-wrap";
pub const PARAM_TX_MODE: &str = "x-tx-mode";
pub const PARAM_LOCK_TIMEOUT: &str = "x-lock-timeout";
pub const PARAM_LOCK_POLL_INTERVAL: &str = "x-lock-poll-interval";

/// SQLite begin-transaction variant used for transactional migrations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxMode {
    #[default]
    Deferred,
    Immediate,
    Exclusive,
}

impl TxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxMode::Deferred => "DEFERRED",
            TxMode::Immediate => "IMMEDIATE",
            TxMode::Exclusive => "EXCLUSIVE",
        }
    }

    pub fn behavior(&self) -> TransactionBehavior {
        match self {
            TxMode::Deferred => TransactionBehavior::Deferred,
            TxMode::Immediate => TransactionBehavior::Immediate,
            TxMode::Exclusive => TransactionBehavior::Exclusive,
        }
    }
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxMode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DEFERRED" => Ok(TxMode::Deferred),
            "IMMEDIATE" => Ok(TxMode::Immediate),
            "EXCLUSIVE" => Ok(TxMode::Exclusive),
            _ => Err(MigrateError::invalid_config(
                PARAM_TX_MODE,
                s,
                "transaction mode must be DEFERRED, IMMEDIATE, or EXCLUSIVE",
            )),
        }
    }
}

/// Validated driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Database file path, or `:memory:`
    pub database_location: String,
    /// Name of the version ledger table; the lock table is `<name>_lock`
    pub ledger_table: String,
    /// Execute migrations directly on the connection, without a transaction
    pub no_tx_wrap: bool,
    pub tx_mode: TxMode,
    pub lock_timeout: Duration,
    pub lock_poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            database_location: String::new(),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            no_tx_wrap: false,
            tx_mode: TxMode::Deferred,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }
}

impl DriverConfig {
    /// Default configuration for a database location
    pub fn new(database_location: impl Into<String>) -> Self {
        Self {
            database_location: database_location.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a connection URL
    pub fn parse(raw_url: &str) -> Result<Self> {
        let url = Url::parse(raw_url)
            .map_err(|e| MigrateError::invalid_config("url", raw_url, e.to_string()))?;

        if !SQLITE_SCHEMES.contains(&url.scheme()) {
            return Err(MigrateError::invalid_config(
                "scheme",
                url.scheme(),
                format!("expected one of {}", SQLITE_SCHEMES.join(", ")),
            ));
        }

        let mut config = DriverConfig::new(location_from_url(&url)?);

        // First occurrence of a repeated key wins
        let mut params: HashMap<String, String> = HashMap::new();
        for (key, value) in url.query_pairs() {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }

        for (key, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
            match key.as_str() {
                PARAM_MIGRATIONS_TABLE => config.ledger_table = value.clone(),
                PARAM_NO_TX_WRAP => config.no_tx_wrap = parse_bool(PARAM_NO_TX_WRAP, value)?,
                PARAM_TX_MODE => config.tx_mode = value.parse()?,
                PARAM_LOCK_TIMEOUT => {
                    config.lock_timeout = parse_duration(PARAM_LOCK_TIMEOUT, value)?
                }
                PARAM_LOCK_POLL_INTERVAL => {
                    config.lock_poll_interval = parse_duration(PARAM_LOCK_POLL_INTERVAL, value)?
                }
                other => debug!(param = other, "ignoring unknown connection parameter"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every field; `parse` calls this before returning
    pub fn validate(&self) -> Result<()> {
        if self.database_location.is_empty() {
            return Err(MigrateError::invalid_config(
                "path",
                "",
                "database path is required",
            ));
        }
        validate_table_name(&self.ledger_table)?;
        if self.lock_timeout.is_zero() {
            return Err(MigrateError::invalid_config(
                PARAM_LOCK_TIMEOUT,
                "0",
                "lock timeout must be positive",
            ));
        }
        if self.lock_poll_interval.is_zero() {
            return Err(MigrateError::invalid_config(
                PARAM_LOCK_POLL_INTERVAL,
                "0",
                "lock poll interval must be positive",
            ));
        }
        Ok(())
    }

    /// Table definitions for this configuration's ledger name
    pub fn schema(&self) -> Result<LedgerSchema> {
        LedgerSchema::new(&self.ledger_table)
    }

    /// Rebuild a URL that parses back to an equal configuration
    ///
    /// Only parameters that differ from their defaults are emitted.
    pub fn to_url(&self) -> String {
        let path = self
            .database_location
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let defaults = DriverConfig::default();
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if self.ledger_table != defaults.ledger_table {
            query.append_pair(PARAM_MIGRATIONS_TABLE, &self.ledger_table);
        }
        if self.no_tx_wrap {
            query.append_pair(PARAM_NO_TX_WRAP, "true");
        }
        if self.tx_mode != defaults.tx_mode {
            query.append_pair(PARAM_TX_MODE, self.tx_mode.as_str());
        }
        if self.lock_timeout != defaults.lock_timeout {
            query.append_pair(
                PARAM_LOCK_TIMEOUT,
                &humantime::format_duration(self.lock_timeout).to_string(),
            );
        }
        if self.lock_poll_interval != defaults.lock_poll_interval {
            query.append_pair(
                PARAM_LOCK_POLL_INTERVAL,
                &humantime::format_duration(self.lock_poll_interval).to_string(),
            );
        }
        let query = query.finish();

        if query.is_empty() {
            format!("{}://{}", SQLITE_SCHEMES[0], path)
        } else {
            format!("{}://{}?{}", SQLITE_SCHEMES[0], path, query)
        }
    }
}

/// Typed connection URL options for [`build_url`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOption {
    MigrationsTable(String),
    NoTxWrap,
    TxMode(TxMode),
    LockTimeout(Duration),
    LockPollInterval(Duration),
}

/// Construct a connection URL for a database path
pub fn build_url(path: &str, options: &[UrlOption]) -> String {
    let mut config = DriverConfig::new(path);
    for option in options {
        match option {
            UrlOption::MigrationsTable(table) => config.ledger_table = table.clone(),
            UrlOption::NoTxWrap => config.no_tx_wrap = true,
            UrlOption::TxMode(mode) => config.tx_mode = *mode,
            UrlOption::LockTimeout(timeout) => config.lock_timeout = *timeout,
            UrlOption::LockPollInterval(interval) => config.lock_poll_interval = *interval,
        }
    }
    config.to_url()
}

fn location_from_url(url: &Url) -> Result<String> {
    let mut raw = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        raw.push_str(&format!(":{}", port));
    }
    raw.push_str(url.path());

    let location = urlencoding::decode(&raw)
        .map_err(|e| MigrateError::invalid_config("path", raw.as_str(), e.to_string()))?
        .into_owned();

    if location.is_empty() {
        return Err(MigrateError::invalid_config(
            "path",
            "",
            "empty database path",
        ));
    }
    Ok(location)
}

/// Boolean spellings accepted for flag parameters
fn parse_bool(field: &'static str, value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(MigrateError::invalid_config(
            field,
            value,
            "expected a boolean",
        )),
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value)
        .map_err(|e| MigrateError::invalid_config(field, value, e.to_string()))?;
    if duration.is_zero() {
        return Err(MigrateError::invalid_config(
            field,
            value,
            "duration must be positive",
        ));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_error_field(result: Result<DriverConfig>) -> &'static str {
        match result {
            Err(MigrateError::InvalidConfig { field, .. }) => field,
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_defaults() {
        let config = DriverConfig::parse("sqlite3://test.db").unwrap();
        assert_eq!(config.database_location, "test.db");
        assert_eq!(config.ledger_table, "schema_migrations");
        assert!(!config.no_tx_wrap);
        assert_eq!(config.tx_mode, TxMode::Deferred);
        assert_eq!(config.lock_timeout, Duration::from_secs(15));
        assert_eq!(config.lock_poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_parse_paths() {
        let cases = [
            ("sqlite3:///tmp/app.db", "/tmp/app.db"),
            ("sqlite3://data/app.db", "data/app.db"),
            ("sqlite3://./app.db", "./app.db"),
            ("sqlite://app.db", "app.db"),
            ("sqlite3:///tmp/with%20space.db", "/tmp/with space.db"),
        ];
        for (url, expected) in cases {
            let config = DriverConfig::parse(url).unwrap();
            assert_eq!(config.database_location, expected, "{url}");
        }
    }

    #[test]
    fn test_parse_all_params() {
        let config = DriverConfig::parse(
            "sqlite3:///tmp/app.db?x-migrations-table=custom&x-no-tx-wrap=true&x-tx-mode=IMMEDIATE&x-lock-timeout=2s&x-lock-poll-interval=20ms",
        )
        .unwrap();
        assert_eq!(config.ledger_table, "custom");
        assert!(config.no_tx_wrap);
        assert_eq!(config.tx_mode, TxMode::Immediate);
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.lock_poll_interval, Duration::from_millis(20));
        assert_eq!(config.schema().unwrap().lock_table(), "custom_lock");
    }

    #[test]
    fn test_parse_tx_mode_case_insensitive() {
        let config = DriverConfig::parse("sqlite3://a.db?x-tx-mode=exclusive").unwrap();
        assert_eq!(config.tx_mode, TxMode::Exclusive);
    }

    #[test]
    fn test_parse_ignores_unknown_and_empty_params() {
        let config =
            DriverConfig::parse("sqlite3://a.db?x-unknown=1&x-migrations-table=&x-tx-mode=")
                .unwrap();
        assert_eq!(config.ledger_table, "schema_migrations");
        assert_eq!(config.tx_mode, TxMode::Deferred);
    }

    #[test]
    fn test_parse_bool_spellings() {
        for v in ["1", "t", "T", "TRUE", "true", "True"] {
            let url = format!("sqlite3://a.db?x-no-tx-wrap={v}");
            assert!(DriverConfig::parse(&url).unwrap().no_tx_wrap, "{v}");
        }
        for v in ["0", "f", "F", "FALSE", "false", "False"] {
            let url = format!("sqlite3://a.db?x-no-tx-wrap={v}");
            assert!(!DriverConfig::parse(&url).unwrap().no_tx_wrap, "{v}");
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            config_error_field(DriverConfig::parse("postgres://localhost/db")),
            "scheme"
        );
        assert_eq!(config_error_field(DriverConfig::parse("sqlite3://")), "path");
        assert_eq!(config_error_field(DriverConfig::parse("not a url")), "url");
        assert_eq!(
            config_error_field(DriverConfig::parse("sqlite3://a.db?x-tx-mode=LAZY")),
            PARAM_TX_MODE
        );
        assert_eq!(
            config_error_field(DriverConfig::parse("sqlite3://a.db?x-no-tx-wrap=maybe")),
            PARAM_NO_TX_WRAP
        );
        assert_eq!(
            config_error_field(DriverConfig::parse(
                "sqlite3://a.db?x-migrations-table=bad%3Bname"
            )),
            PARAM_MIGRATIONS_TABLE
        );
        assert_eq!(
            config_error_field(DriverConfig::parse("sqlite3://a.db?x-lock-timeout=soon")),
            PARAM_LOCK_TIMEOUT
        );
        assert_eq!(
            config_error_field(DriverConfig::parse("sqlite3://a.db?x-lock-poll-interval=0s")),
            PARAM_LOCK_POLL_INTERVAL
        );
    }

    #[test]
    fn test_validate() {
        assert!(DriverConfig::new("a.db").validate().is_ok());
        assert!(DriverConfig::default().validate().is_err());

        let mut config = DriverConfig::new("a.db");
        config.ledger_table = String::new();
        assert!(config.validate().is_err());

        let mut config = DriverConfig::new("a.db");
        config.lock_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_round_trip() {
        let urls = [
            "sqlite3://test.db",
            "sqlite3:///tmp/app.db?x-migrations-table=custom",
            "sqlite3://data/app.db?x-no-tx-wrap=1&x-tx-mode=immediate",
            "sqlite3:///tmp/with%20space.db?x-tx-mode=EXCLUSIVE&x-lock-timeout=1m&x-lock-poll-interval=5ms",
            "sqlite:///tmp/other.db?x-no-tx-wrap=false",
        ];
        for url in urls {
            let parsed = DriverConfig::parse(url).unwrap();
            let rebuilt = parsed.to_url();
            let reparsed = DriverConfig::parse(&rebuilt).unwrap();
            assert_eq!(parsed, reparsed, "{url} -> {rebuilt}");
            // Rebuilding is stable
            assert_eq!(rebuilt, reparsed.to_url());
        }
    }

    #[test]
    fn test_to_url_omits_defaults() {
        assert_eq!(DriverConfig::new("/tmp/a.db").to_url(), "sqlite3:///tmp/a.db");
    }

    #[test]
    fn test_build_url() {
        let url = build_url(
            "/tmp/app.db",
            &[
                UrlOption::MigrationsTable("versions".to_string()),
                UrlOption::NoTxWrap,
                UrlOption::TxMode(TxMode::Immediate),
            ],
        );
        assert_eq!(
            url,
            "sqlite3:///tmp/app.db?x-migrations-table=versions&x-no-tx-wrap=true&x-tx-mode=IMMEDIATE"
        );

        let config = DriverConfig::parse(&url).unwrap();
        assert_eq!(config.ledger_table, "versions");
        assert!(config.no_tx_wrap);
        assert_eq!(config.tx_mode, TxMode::Immediate);
    }

    #[test]
    fn test_tx_mode_behavior() {
        assert_eq!(TxMode::default(), TxMode::Deferred);
        assert_eq!(TxMode::Immediate.to_string(), "IMMEDIATE");
        assert!(matches!(
            TxMode::Exclusive.behavior(),
            TransactionBehavior::Exclusive
        ));
    }
}
