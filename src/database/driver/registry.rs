//! Scheme-to-driver registry

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use tracing::debug;

use super::config::SQLITE_SCHEMES;
use super::sqlite::SqliteDriver;
use super::Driver;
use crate::error::{MigrateError, Result};

/// Opens a driver from a full connection URL
pub type DriverFactory = fn(&str) -> Result<Box<dyn Driver>>;

/// Maps URL schemes to driver factories
#[derive(Default)]
pub struct DriverRegistry {
    factories: RwLock<HashMap<String, DriverFactory>>,
}

impl DriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the SQLite driver under every scheme it answers to
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        register_sqlite(&registry);
        registry
    }

    /// Register `factory` for `scheme`, replacing any previous entry
    pub fn register(&self, scheme: &str, factory: DriverFactory) {
        let mut factories = match self.factories.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if factories.insert(scheme.to_string(), factory).is_some() {
            debug!(scheme, "replaced driver registration");
        }
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.factory(scheme).is_some()
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<String> {
        let factories = match self.factories.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut schemes: Vec<String> = factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Open a driver for `url` using the factory registered for its scheme
    pub fn open(&self, url: &str) -> Result<Box<dyn Driver>> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| MigrateError::invalid_config("url", url, "missing scheme"))?;

        let factory = self
            .factory(scheme)
            .ok_or_else(|| MigrateError::UnknownScheme {
                scheme: scheme.to_string(),
            })?;
        factory(url)
    }

    fn factory(&self, scheme: &str) -> Option<DriverFactory> {
        let factories = match self.factories.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        factories.get(scheme).copied()
    }
}

fn open_sqlite(url: &str) -> Result<Box<dyn Driver>> {
    Ok(Box::new(SqliteDriver::open(url)?))
}

/// Register the SQLite driver under `sqlite3` and `sqlite`
pub fn register_sqlite(registry: &DriverRegistry) {
    for scheme in SQLITE_SCHEMES {
        registry.register(scheme, open_sqlite);
    }
}

/// Process-wide registry, pre-populated with the SQLite driver
pub fn default_registry() -> &'static DriverRegistry {
    static REGISTRY: OnceLock<DriverRegistry> = OnceLock::new();
    REGISTRY.get_or_init(DriverRegistry::with_defaults)
}
