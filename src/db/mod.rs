// src/db/mod.rs

//! Package database layer
//!
//! One trait, two engines: an in-memory map for scratch solving and an
//! embedded SQLite store for installed-system state. Both keep the same
//! contract: unique identities, exact lookup, constraint search, and a
//! whole-world snapshot. Only the installer writes to a database; solver
//! and compiler treat it as read-only for the duration of a call.

use crate::error::{Error, Result};
use crate::package::{Dependency, Package, PackageId};
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, RwLock};
use tempfile::TempDir;
use tracing::debug;

/// Read/write contract of a package store
pub trait PackageDatabase: Send + Sync {
    /// Exact lookup by identity
    fn get(&self, id: &PackageId) -> Result<Option<Package>>;

    /// All packages satisfying the dependency, in identity order
    fn find_all(&self, dep: &Dependency) -> Result<Vec<Package>>;

    /// Insert or replace a package, preserving identity uniqueness
    fn save(&self, package: &Package) -> Result<()>;

    /// Remove a package by identity; removing an absent identity is a no-op
    fn delete(&self, id: &PackageId) -> Result<()>;

    /// Snapshot of every known package, in identity order
    fn world(&self) -> Result<Vec<Package>>;

    /// Lifecycle teardown: release temp-backed storage
    fn clean(&self) -> Result<()>;
}

/// Which database engine to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Memory,
    File,
}

impl DatabaseKind {
    /// Open a throwaway store for the duration of one solve/build
    pub fn open_scratch(&self) -> Result<Box<dyn PackageDatabase>> {
        match self {
            DatabaseKind::Memory => Ok(Box::new(MemoryDatabase::new())),
            DatabaseKind::File => Ok(Box::new(FileDatabase::temporary()?)),
        }
    }

    /// Open a persistent store rooted at `path`
    pub fn open_system(&self, path: &Path) -> Result<Box<dyn PackageDatabase>> {
        match self {
            DatabaseKind::Memory => Ok(Box::new(MemoryDatabase::new())),
            DatabaseKind::File => Ok(Box::new(FileDatabase::open(path)?)),
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(DatabaseKind::Memory),
            "file" => Ok(DatabaseKind::File),
            _ => Err(Error::Configuration(format!(
                "unknown database engine '{}' (available: memory, file)",
                s
            ))),
        }
    }
}

/// In-memory package store
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    packages: RwLock<BTreeMap<PackageId, Package>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackageDatabase for MemoryDatabase {
    fn get(&self, id: &PackageId) -> Result<Option<Package>> {
        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        Ok(packages.get(id).cloned())
    }

    fn find_all(&self, dep: &Dependency) -> Result<Vec<Package>> {
        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        Ok(packages
            .values()
            .filter(|p| dep.matches(&p.id))
            .cloned()
            .collect())
    }

    fn save(&self, package: &Package) -> Result<()> {
        let mut packages = self.packages.write().unwrap_or_else(|e| e.into_inner());
        packages.insert(package.id.clone(), package.clone());
        Ok(())
    }

    fn delete(&self, id: &PackageId) -> Result<()> {
        let mut packages = self.packages.write().unwrap_or_else(|e| e.into_inner());
        packages.remove(id);
        Ok(())
    }

    fn world(&self) -> Result<Vec<Package>> {
        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        Ok(packages.values().cloned().collect())
    }

    fn clean(&self) -> Result<()> {
        let mut packages = self.packages.write().unwrap_or_else(|e| e.into_inner());
        packages.clear();
        Ok(())
    }
}

/// SQLite-backed package store
///
/// One table keyed by identity with the full package definition stored as a
/// JSON document, so the schema never lags the model.
pub struct FileDatabase {
    conn: Mutex<Connection>,
    scratch: Mutex<Option<TempDir>>,
}

impl FileDatabase {
    /// Open (or create) a database file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening package database at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS packages (
                category TEXT NOT NULL,
                name     TEXT NOT NULL,
                version  TEXT NOT NULL,
                document TEXT NOT NULL,
                PRIMARY KEY (category, name, version)
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            scratch: Mutex::new(None),
        })
    }

    /// Open a temp-directory-backed database, removed by `clean` (or drop)
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("strata-db").tempdir()?;
        let db = Self::open(&dir.path().join("packages.db"))?;
        *db.scratch.lock().unwrap_or_else(|e| e.into_inner()) = Some(dir);
        Ok(db)
    }

    fn decode(document: &str) -> Result<Package> {
        Ok(serde_json::from_str(document)?)
    }
}

impl PackageDatabase for FileDatabase {
    fn get(&self, id: &PackageId) -> Result<Option<Package>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT document FROM packages WHERE category = ?1 AND name = ?2 AND version = ?3",
        )?;
        let mut rows = stmt.query(params![
            &id.category,
            &id.name,
            id.version.to_string()
        ])?;
        match rows.next()? {
            Some(row) => {
                let document: String = row.get(0)?;
                Ok(Some(Self::decode(&document)?))
            }
            None => Ok(None),
        }
    }

    fn find_all(&self, dep: &Dependency) -> Result<Vec<Package>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare("SELECT document FROM packages WHERE category = ?1 AND name = ?2")?;
        let documents = stmt
            .query_map(params![&dep.category, &dep.name], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Version order is not textual, so constraint filtering and the
        // identity sort happen after decoding.
        let mut packages = Vec::new();
        for document in documents {
            let package = Self::decode(&document)?;
            if dep.req.matches(&package.id.version) {
                packages.push(package);
            }
        }
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(packages)
    }

    fn save(&self, package: &Package) -> Result<()> {
        let document = serde_json::to_string(package)?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO packages (category, name, version, document)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &package.id.category,
                &package.id.name,
                package.id.version.to_string(),
                document
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &PackageId) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "DELETE FROM packages WHERE category = ?1 AND name = ?2 AND version = ?3",
            params![&id.category, &id.name, id.version.to_string()],
        )?;
        Ok(())
    }

    fn world(&self) -> Result<Vec<Package>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT document FROM packages")?;
        let documents = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut packages = documents
            .iter()
            .map(|d| Self::decode(d))
            .collect::<Result<Vec<_>>>()?;
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(packages)
    }

    fn clean(&self) -> Result<()> {
        let mut scratch = self.scratch.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(dir) = scratch.take() {
            debug!("Removing scratch database at: {}", dir.path().display());
            dir.close()?;
        }
        Ok(())
    }
}
