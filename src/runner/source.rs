//! Migration sources
//!
//! A source lists migrations in ascending version order and hands out the
//! SQL text of each one as a reader. File names follow the
//! `<version>_<title>.up.sql` convention; `.down.sql` companions are
//! recognised and skipped.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{MigrateError, Result};

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// Version and title of one available migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct MigrationInfo {
    pub version: i64,
    pub title: String,
}

/// Ordered collection of migrations
pub trait MigrationSource: Send {
    /// Every available migration, ascending by version
    fn migrations(&self) -> Vec<MigrationInfo>;

    /// SQL text of the migration that moves the schema to `version`
    fn read_up(&self, version: i64) -> Result<Box<dyn Read + '_>>;
}

/// Direction encoded in a migration file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Split `<version>_<title>.(up|down).sql`
///
/// `Ok(None)` for names that are not migration files at all.
fn parse_file_name(name: &str) -> Result<Option<(i64, String, Direction)>> {
    let (stem, direction) = if let Some(stem) = name.strip_suffix(UP_SUFFIX) {
        (stem, Direction::Up)
    } else if let Some(stem) = name.strip_suffix(DOWN_SUFFIX) {
        (stem, Direction::Down)
    } else {
        return Ok(None);
    };

    let invalid = |message: String| MigrateError::InvalidMigration {
        version: None,
        message,
    };

    let (version, title) = match stem.split_once('_') {
        Some((version, title)) => (version, title),
        None => (stem, ""),
    };
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!(
            "file '{}' does not start with a numeric version",
            name
        )));
    }
    let version: i64 = version
        .parse()
        .map_err(|e| invalid(format!("file '{}': {}", name, e)))?;

    Ok(Some((version, title.to_string(), direction)))
}

fn duplicate(version: i64, existing: &str, other: &str) -> MigrateError {
    MigrateError::InvalidMigration {
        version: Some(version),
        message: format!("duplicate migration version: '{}' and '{}'", existing, other),
    }
}

fn unknown_version(version: i64) -> MigrateError {
    MigrateError::InvalidMigration {
        version: Some(version),
        message: "no such migration in source".to_string(),
    }
}

#[derive(Debug, Clone)]
struct DirEntry {
    title: String,
    path: PathBuf,
}

/// Migrations read from `.sql` files in a directory
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
    entries: BTreeMap<i64, DirEntry>,
}

impl DirSource {
    /// Scan `dir` for migration files
    ///
    /// Subdirectories and files without a `.up.sql`/`.down.sql` suffix are
    /// ignored.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let source_err = |path: &Path, source| MigrateError::Source {
            path: path.to_path_buf(),
            source,
        };

        let mut entries: BTreeMap<i64, DirEntry> = BTreeMap::new();
        for entry in fs::read_dir(&dir).map_err(|e| source_err(&dir, e))? {
            let entry = entry.map_err(|e| source_err(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();

            let Some((version, title, direction)) = parse_file_name(&name)? else {
                debug!(file = %name, "skipping non-migration file");
                continue;
            };
            if direction == Direction::Down {
                continue;
            }

            if let Some(existing) = entries.get(&version) {
                let existing = existing.path.display().to_string();
                return Err(duplicate(version, &existing, &name));
            }
            entries.insert(version, DirEntry { title, path });
        }

        debug!(dir = %dir.display(), migrations = entries.len(), "loaded migration directory");
        Ok(Self { dir, entries })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MigrationSource for DirSource {
    fn migrations(&self) -> Vec<MigrationInfo> {
        self.entries
            .iter()
            .map(|(version, entry)| MigrationInfo {
                version: *version,
                title: entry.title.clone(),
            })
            .collect()
    }

    fn read_up(&self, version: i64) -> Result<Box<dyn Read + '_>> {
        let entry = self
            .entries
            .get(&version)
            .ok_or_else(|| unknown_version(version))?;
        let file = File::open(&entry.path).map_err(|e| MigrateError::Source {
            path: entry.path.clone(),
            source: e,
        })?;
        Ok(Box::new(file))
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    title: String,
    sql: String,
}

/// Migrations held in memory, typically embedded with `include_str!`
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: BTreeMap<i64, MemoryEntry>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(file name, contents)` pairs using the directory naming rules
    pub fn from_files<'a, I>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut source = Self::new();
        for (name, sql) in files {
            match parse_file_name(name)? {
                Some((version, title, Direction::Up)) => source.add(version, &title, sql)?,
                Some((_, _, Direction::Down)) => {}
                None => {
                    return Err(MigrateError::InvalidMigration {
                        version: None,
                        message: format!("'{}' is not a migration file name", name),
                    })
                }
            }
        }
        Ok(source)
    }

    /// Add one migration; versions must be unique
    pub fn add(&mut self, version: i64, title: &str, sql: &str) -> Result<()> {
        if version < 0 {
            return Err(MigrateError::InvalidMigration {
                version: Some(version),
                message: "migration versions must not be negative".to_string(),
            });
        }
        if let Some(existing) = self.entries.get(&version) {
            return Err(duplicate(version, &existing.title, title));
        }
        self.entries.insert(
            version,
            MemoryEntry {
                title: title.to_string(),
                sql: sql.to_string(),
            },
        );
        Ok(())
    }

    /// Builder form of [`MemorySource::add`]
    pub fn with_migration(mut self, version: i64, title: &str, sql: &str) -> Result<Self> {
        self.add(version, title, sql)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MigrationSource for MemorySource {
    fn migrations(&self) -> Vec<MigrationInfo> {
        self.entries
            .iter()
            .map(|(version, entry)| MigrationInfo {
                version: *version,
                title: entry.title.clone(),
            })
            .collect()
    }

    fn read_up(&self, version: i64) -> Result<Box<dyn Read + '_>> {
        let entry = self
            .entries
            .get(&version)
            .ok_or_else(|| unknown_version(version))?;
        Ok(Box::new(Cursor::new(entry.sql.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut reader: Box<dyn Read + '_>) -> String {
        let mut s = String::new();
        reader.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("1_init.up.sql").unwrap(),
            Some((1, "init".to_string(), Direction::Up))
        );
        assert_eq!(
            parse_file_name("20240101120000_add_users_table.down.sql").unwrap(),
            Some((20240101120000, "add_users_table".to_string(), Direction::Down))
        );
        assert_eq!(
            parse_file_name("7.up.sql").unwrap(),
            Some((7, String::new(), Direction::Up))
        );
        assert_eq!(parse_file_name("README.md").unwrap(), None);
        assert_eq!(parse_file_name("schema.sql").unwrap(), None);
        assert!(parse_file_name("init_1.up.sql").is_err());
        assert!(parse_file_name("-1_neg.up.sql").is_err());
        assert!(parse_file_name("_x.up.sql").is_err());
    }

    #[test]
    fn test_dir_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2_posts.up.sql"), "CREATE TABLE posts (id INTEGER);").unwrap();
        fs::write(dir.path().join("2_posts.down.sql"), "DROP TABLE posts;").unwrap();
        fs::write(dir.path().join("1_users.up.sql"), "CREATE TABLE users (id INTEGER);").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("3_nested.up.sql")).unwrap();

        let source = DirSource::open(dir.path()).unwrap();
        assert_eq!(
            source.migrations(),
            vec![
                MigrationInfo {
                    version: 1,
                    title: "users".to_string()
                },
                MigrationInfo {
                    version: 2,
                    title: "posts".to_string()
                },
            ]
        );
        assert_eq!(
            read_all(source.read_up(2).unwrap()),
            "CREATE TABLE posts (id INTEGER);"
        );
        assert!(matches!(
            source.read_up(3),
            Err(MigrateError::InvalidMigration { version: Some(3), .. })
        ));
    }

    #[test]
    fn test_dir_source_duplicate_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1_a.up.sql"), "").unwrap();
        fs::write(dir.path().join("01_b.up.sql"), "").unwrap();

        assert!(matches!(
            DirSource::open(dir.path()),
            Err(MigrateError::InvalidMigration { version: Some(1), .. })
        ));
    }

    #[test]
    fn test_dir_source_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("first.up.sql"), "").unwrap();

        assert!(matches!(
            DirSource::open(dir.path()),
            Err(MigrateError::InvalidMigration { .. })
        ));
    }

    #[test]
    fn test_dir_source_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DirSource::open(dir.path().join("missing")),
            Err(MigrateError::Source { .. })
        ));
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new()
            .with_migration(3, "third", "SELECT 3")
            .unwrap()
            .with_migration(1, "first", "SELECT 1")
            .unwrap();

        assert_eq!(source.len(), 2);
        let versions: Vec<i64> = source.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 3]);
        assert_eq!(read_all(source.read_up(3).unwrap()), "SELECT 3");
        assert!(source.read_up(2).is_err());
    }

    #[test]
    fn test_memory_source_rejects_duplicates_and_negatives() {
        let mut source = MemorySource::new();
        source.add(1, "a", "").unwrap();
        assert!(source.add(1, "b", "").is_err());
        assert!(source.add(-1, "neg", "").is_err());
    }

    #[test]
    fn test_memory_source_from_files() {
        let source = MemorySource::from_files([
            ("1_init.up.sql", "CREATE TABLE a (id INTEGER);"),
            ("1_init.down.sql", "DROP TABLE a;"),
            ("2_more.up.sql", "CREATE TABLE b (id INTEGER);"),
        ])
        .unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(
            read_all(source.read_up(1).unwrap()),
            "CREATE TABLE a (id INTEGER);"
        );

        assert!(MemorySource::from_files([("init.sql", "")]).is_err());
    }
}
