// src/package/mod.rs

//! Package model: identities, dependencies, recipes, and package sets
//!
//! A package is identified by its (category, name, version) triple, carries
//! runtime dependencies and conflicts, and optionally a build recipe.
//! Packages are immutable by convention: helpers produce logical copies
//! with substituted fields instead of mutating in place.

use crate::error::{Error, Result};
use crate::version::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// The (category, name, version) triple uniquely naming a package
///
/// Ordering is lexicographic on (category, name, version), which is the
/// stable identity order used for deterministic tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId {
    pub category: String,
    pub name: String,
    pub version: Version,
}

impl PackageId {
    pub fn new(category: &str, name: &str, version: Version) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            version,
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{}", self.category, self.name, self.version)
    }
}

/// A dependency edge: a named package plus a version constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub category: String,
    pub name: String,
    #[serde(default = "VersionReq::any")]
    pub req: VersionReq,
}

impl Dependency {
    pub fn new(category: &str, name: &str, req: VersionReq) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            req,
        }
    }

    /// Unconstrained dependency on `category/name`
    pub fn any(category: &str, name: &str) -> Self {
        Self::new(category, name, VersionReq::any())
    }

    /// Dependency satisfied only by this exact identity
    pub fn exact(id: &PackageId) -> Self {
        Self::new(&id.category, &id.name, VersionReq::exact(id.version.clone()))
    }

    /// Parse a package selector of the form `[<op>]<category>/<name>[-<version>]`
    ///
    /// Examples: `app/foo`, `app/foo-1.0`, `>=lib/bar-2.0`, `~sys/core-1.2`.
    /// A selector without a version is unconstrained; a bare version means
    /// exact match.
    pub fn parse(selector: &str) -> Result<Self> {
        let s = selector.trim();
        let (op, rest) = split_operator(s);

        let (category, remainder) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidSelector(selector.to_string()))?;
        if category.is_empty() || remainder.is_empty() {
            return Err(Error::InvalidSelector(selector.to_string()));
        }

        // The name may itself contain dashes; the version starts at the
        // first dash followed by a digit whose suffix parses as a version.
        for (idx, _) in remainder.match_indices('-') {
            let candidate = &remainder[idx + 1..];
            if candidate.starts_with(|c: char| c.is_ascii_digit()) {
                if let Ok(version) = Version::parse(candidate) {
                    let name = &remainder[..idx];
                    if name.is_empty() {
                        return Err(Error::InvalidSelector(selector.to_string()));
                    }
                    let req = match op {
                        Some(op) => VersionReq::new(op, version),
                        None => VersionReq::exact(version),
                    };
                    return Ok(Self::new(category, name, req));
                }
            }
        }

        // No version part: the selector is unconstrained.
        Ok(Self::new(category, remainder, VersionReq::any()))
    }

    /// True when `id` names this dependency's package and satisfies its
    /// version constraint
    pub fn matches(&self, id: &PackageId) -> bool {
        self.category == id.category && self.name == id.name && self.req.matches(&id.version)
    }
}

fn split_operator(s: &str) -> (Option<crate::version::VersionOp>, &str) {
    use crate::version::VersionOp;
    for (prefix, op) in [
        (">=", VersionOp::GreaterEq),
        ("<=", VersionOp::LessEq),
        (">", VersionOp::Greater),
        ("<", VersionOp::Less),
        ("~", VersionOp::Tilde),
        ("=", VersionOp::Equal),
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return (Some(op), rest);
        }
    }
    (None, s)
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.req.version {
            Some(_) => write!(f, "{}/{} {}", self.category, self.name, self.req),
            None => write!(f, "{}/{}", self.category, self.name),
        }
    }
}

/// Build instructions attached to a package definition
///
/// `build_depends` are build-time dependencies: packages needed to produce
/// this package's artifact, distinct from the runtime `depends` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecipe {
    /// Seed image the isolated build environment starts from
    pub image: String,
    /// Shell steps executed inside the environment
    #[serde(default)]
    pub steps: Vec<String>,
    /// Environment variables exported to the build steps
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Build-time dependencies (not part of the runtime closure)
    #[serde(default)]
    pub build_depends: Vec<Dependency>,
}

/// A package definition: identity, runtime dependencies, conflicts, recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(flatten)]
    pub id: PackageId,
    #[serde(default)]
    pub depends: Vec<Dependency>,
    #[serde(default)]
    pub conflicts: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<BuildRecipe>,
}

impl Package {
    pub fn new(category: &str, name: &str, version: Version) -> Self {
        Self {
            id: PackageId::new(category, name, version),
            depends: Vec::new(),
            conflicts: Vec::new(),
            recipe: None,
        }
    }

    /// Logical copy with the given runtime dependencies
    pub fn with_depends(mut self, depends: Vec<Dependency>) -> Self {
        self.depends = depends;
        self
    }

    /// Logical copy with the given conflicts
    pub fn with_conflicts(mut self, conflicts: Vec<Dependency>) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Logical copy with the given build recipe
    pub fn with_recipe(mut self, recipe: BuildRecipe) -> Self {
        self.recipe = Some(recipe);
        self
    }

    /// Content fingerprint over the full package definition
    ///
    /// Two packages with the same identity but different dependencies or
    /// recipes hash differently, so a recipe change invalidates the cache.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        // Serialization of a Package cannot fail: all fields are plain data.
        let doc = serde_json::to_string(self).unwrap_or_default();
        hasher.update(doc.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// An ordered collection of packages, unique by identity
///
/// Backed by a `BTreeMap` so iteration order is deterministic, which keeps
/// solver tie-breaks and test output reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    packages: BTreeMap<PackageId, Package>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a package, replacing any existing entry with the same identity
    pub fn insert(&mut self, package: Package) {
        self.packages.insert(package.id.clone(), package);
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.packages.contains_key(id)
    }

    pub fn get(&self, id: &PackageId) -> Option<&Package> {
        self.packages.get(id)
    }

    pub fn remove(&mut self, id: &PackageId) -> Option<Package> {
        self.packages.remove(id)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate packages in identity order
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Look up a package by its content fingerprint
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<&Package> {
        self.packages.values().find(|p| p.fingerprint() == fingerprint)
    }

    /// All packages satisfying the given dependency, in identity order
    pub fn satisfying(&self, dep: &Dependency) -> Vec<&Package> {
        self.packages
            .values()
            .filter(|p| dep.matches(&p.id))
            .collect()
    }

    /// Set union; entries from `other` win on identity collision
    pub fn union(&self, other: &PackageSet) -> PackageSet {
        let mut merged = self.clone();
        for package in other.iter() {
            merged.insert(package.clone());
        }
        merged
    }

    /// Set difference: packages of `self` not present in `other`
    pub fn difference(&self, other: &PackageSet) -> PackageSet {
        let mut out = PackageSet::new();
        for package in self.iter() {
            if !other.contains(&package.id) {
                out.insert(package.clone());
            }
        }
        out
    }
}

impl FromIterator<Package> for PackageSet {
    fn from_iter<I: IntoIterator<Item = Package>>(iter: I) -> Self {
        let mut set = PackageSet::new();
        for package in iter {
            set.insert(package);
        }
        set
    }
}
