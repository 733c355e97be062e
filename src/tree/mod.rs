// src/tree/mod.rs

//! Recipe tree loading
//!
//! A tree is a directory hierarchy where each package lives in its own
//! directory as a `package.json` definition (identity, runtime dependencies,
//! conflicts) with an optional sibling `build.json` recipe (seed image,
//! steps, env, build-time dependencies). Loading walks the hierarchy,
//! validates each definition, and stores the packages into a database whose
//! world snapshot feeds the solver and compiler.

use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::package::{BuildRecipe, Package, PackageSet};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Definition file name expected in each package directory
const DEFINITION_FILE: &str = "package.json";

/// Optional recipe file next to the definition
const RECIPE_FILE: &str = "build.json";

/// A recipe tree bound to its backing database
pub struct TreeRecipe {
    db: Box<dyn PackageDatabase>,
    loaded: usize,
}

impl TreeRecipe {
    pub fn new(db: Box<dyn PackageDatabase>) -> Self {
        Self { db, loaded: 0 }
    }

    /// Walk `path` recursively and load every package definition found
    ///
    /// Malformed definitions or recipes are configuration errors naming the
    /// offending file; nothing is partially skipped.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(Error::Configuration(format!(
                "tree path {} is not a directory",
                path.display()
            )));
        }
        self.walk(path)?;
        info!("Loaded {} packages from {}", self.loaded, path.display());
        Ok(())
    }

    fn walk(&mut self, dir: &Path) -> Result<()> {
        let definition = dir.join(DEFINITION_FILE);
        if definition.is_file() {
            self.load_package(&definition)?;
        }

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();
        for entry in entries {
            self.walk(&entry)?;
        }
        Ok(())
    }

    fn load_package(&mut self, definition: &Path) -> Result<()> {
        let mut package: Package =
            serde_json::from_reader(File::open(definition)?).map_err(|e| {
                Error::Configuration(format!("malformed {}: {}", definition.display(), e))
            })?;

        let recipe_path = definition.with_file_name(RECIPE_FILE);
        if recipe_path.is_file() {
            let recipe: BuildRecipe =
                serde_json::from_reader(File::open(&recipe_path)?).map_err(|e| {
                    Error::Configuration(format!("malformed {}: {}", recipe_path.display(), e))
                })?;
            package.recipe = Some(recipe);
        }

        debug!("Loaded {} from {}", package.id, definition.display());
        self.db.save(&package)?;
        self.loaded += 1;
        Ok(())
    }

    /// The full known set, as a package set
    pub fn package_set(&self) -> Result<PackageSet> {
        Ok(self.db.world()?.into_iter().collect())
    }

    /// Snapshot of every loaded package, in identity order
    pub fn world(&self) -> Result<Vec<Package>> {
        self.db.world()
    }

    /// The backing database
    pub fn database(&self) -> &dyn PackageDatabase {
        self.db.as_ref()
    }
}
