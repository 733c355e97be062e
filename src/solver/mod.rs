// src/solver/mod.rs

//! Dependency solver
//!
//! Turns a partial request (packages to add and/or remove) plus the
//! currently-installed set into a full keep/install/remove assignment whose
//! install+keep side has no unresolved dependency and no active conflict.
//!
//! Three interchangeable strategies share the contract:
//! - [`Strategy::Exact`]: exhaustive single-threaded backtracking, the
//!   deterministic ground truth
//! - [`Strategy::Parallel`]: the same search partitioned across top-level
//!   candidate branches, short-circuiting on the first satisfying result
//! - [`Strategy::Stochastic`]: cost-minimizing local search for requests too
//!   large for exhaustive search, bounded by an attempt budget and able to
//!   return a best-effort (non-zero-cost) assignment

mod exact;
mod parallel;
mod stochastic;

use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::package::{Dependency, Package, PackageId, PackageSet};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, warn};

/// The solver's verdict for one package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Install,
    Remove,
}

/// A full resolution: every touched package mapped to a decision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    decisions: BTreeMap<PackageId, Decision>,
    best_effort_cost: Option<f64>,
    waived: Vec<(PackageId, Dependency)>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: PackageId, decision: Decision) {
        self.decisions.insert(id, decision);
    }

    pub fn decision(&self, id: &PackageId) -> Option<Decision> {
        self.decisions.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PackageId, Decision)> {
        self.decisions.iter().map(|(id, d)| (id, *d))
    }

    fn with_decision(decision: Decision) -> impl Fn(&(&PackageId, Decision)) -> bool {
        move |(_, d)| *d == decision
    }

    /// Identities to be newly installed, in identity order
    pub fn to_install(&self) -> Vec<PackageId> {
        self.iter()
            .filter(Self::with_decision(Decision::Install))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Identities to be removed, in identity order
    pub fn to_remove(&self) -> Vec<PackageId> {
        self.iter()
            .filter(Self::with_decision(Decision::Remove))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Identities left untouched, in identity order
    pub fn kept(&self) -> Vec<PackageId> {
        self.iter()
            .filter(Self::with_decision(Decision::Keep))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Non-fatal marker: the stochastic strategy ran out of attempts and
    /// this is the lowest-cost assignment it found, not a proven solution
    pub fn best_effort_cost(&self) -> Option<f64> {
        self.best_effort_cost
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort_cost.is_some()
    }

    /// Dependencies of kept packages left unsatisfied because the request
    /// was forced, as (owner, dependency) pairs
    pub fn waived(&self) -> &[(PackageId, Dependency)] {
        &self.waived
    }

    fn mark_best_effort(&mut self, cost: f64) {
        self.best_effort_cost = Some(cost);
    }

    /// Deterministic comparison key: fewest removals, then fewest installs,
    /// then lexicographic identity order of the install list
    fn tie_break_key(&self) -> (usize, usize, Vec<PackageId>) {
        let installs = self.to_install();
        (self.to_remove().len(), installs.len(), installs)
    }
}

/// The requested change: packages to add and/or remove
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub install: Vec<Dependency>,
    pub remove: Vec<PackageId>,
    /// Demote removal-stranding failures to warnings
    pub force: bool,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(mut self, dep: Dependency) -> Self {
        self.install.push(dep);
        self
    }

    pub fn remove(mut self, id: PackageId) -> Self {
        self.remove.push(id);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.remove.is_empty()
    }
}

/// Which resolution strategy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Exact,
    Parallel,
    Stochastic,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(Strategy::Exact),
            "parallel" => Ok(Strategy::Parallel),
            "stochastic" => Ok(Strategy::Stochastic),
            _ => Err(Error::Configuration(format!(
                "unknown solver type '{}' (available: exact, parallel, stochastic)",
                s
            ))),
        }
    }
}

/// Solver tuning, passed explicitly to the constructor
///
/// `learn_rate`, `discount` and `max_attempts` only affect the stochastic
/// strategy; `seed` pins its RNG for reproducible runs.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub strategy: Strategy,
    pub learn_rate: f32,
    pub discount: f32,
    pub max_attempts: usize,
    pub seed: Option<u64>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Exact,
            learn_rate: 0.7,
            discount: 1.0,
            max_attempts: 9000,
            seed: None,
        }
    }
}

/// The solver: one entry point, strategy selected by options
pub struct Solver {
    options: SolverOptions,
}

impl Solver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    /// Resolve `delta` against `installed`, drawing candidates from `db`
    pub fn solve(
        &self,
        db: &dyn PackageDatabase,
        installed: &PackageSet,
        delta: &Delta,
    ) -> Result<Assignment> {
        let ctx = SolveContext::prepare(db, installed, delta)?;
        debug!(
            strategy = ?self.options.strategy,
            roots = ctx.roots.len(),
            removed = ctx.removed.len(),
            "Solving"
        );
        match self.options.strategy {
            Strategy::Exact => exact::solve(&ctx),
            Strategy::Parallel => parallel::solve(&ctx),
            Strategy::Stochastic => stochastic::solve(&ctx, &self.options),
        }
    }
}

/// Preprocessed solve state shared by every strategy
pub(crate) struct SolveContext<'a> {
    pub db: &'a dyn PackageDatabase,
    /// Installed packages surviving the requested removals
    pub kept: PackageSet,
    /// Requested removals actually present in the installed set
    pub removed: Vec<PackageId>,
    /// Dependencies the solution must satisfy: the requested installs plus
    /// any dependency of a kept package no longer satisfied
    pub roots: Vec<Dependency>,
    /// Stranded kept-package dependencies demoted to warnings by `force`;
    /// carried into the final [`Assignment`] so callers can inspect them
    pub waived: Vec<(PackageId, Dependency)>,
}

impl<'a> SolveContext<'a> {
    fn prepare(
        db: &'a dyn PackageDatabase,
        installed: &PackageSet,
        delta: &Delta,
    ) -> Result<Self> {
        // A delta adding and removing the same identity is malformed.
        for id in &delta.remove {
            if delta.install.iter().any(|dep| dep.matches(id)) {
                return Err(Error::ConflictingRequest(id.to_string()));
            }
        }

        let mut kept = installed.clone();
        let mut removed = Vec::new();
        for id in &delta.remove {
            if kept.remove(id).is_some() {
                removed.push(id.clone());
            } else {
                warn!("Removal of {} requested but it is not installed", id);
            }
        }
        removed.sort();
        removed.dedup();

        let mut roots = delta.install.clone();
        let mut waived = Vec::new();
        for (owner, dep) in unsatisfied_dependencies(&kept) {
            if delta.force {
                warn!("Dependency {} of {} left unsatisfied (forced)", dep, owner);
                waived.push((owner, dep));
            } else {
                roots.push(dep);
            }
        }

        Ok(Self {
            db,
            kept,
            removed,
            roots,
            waived,
        })
    }

    /// True when `dep` is satisfied by the kept set or the chosen installs
    pub fn satisfied(&self, dep: &Dependency, chosen: &PackageSet) -> bool {
        !self.kept.satisfying(dep).is_empty() || !chosen.satisfying(dep).is_empty()
    }

    /// Candidates for `dep` from the database, newest version first so the
    /// search prefers up-to-date packages, identity order within a version
    pub fn candidates(&self, dep: &Dependency) -> Result<Vec<Package>> {
        let mut found = self.db.find_all(dep)?;
        found.retain(|p| !self.removed.contains(&p.id));
        found.sort_by(|a, b| b.id.version.cmp(&a.id.version).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    /// True when adding `candidate` to kept+chosen would activate a conflict
    pub fn conflicts_with(&self, candidate: &Package, chosen: &PackageSet) -> bool {
        let against = |p: &Package| {
            p.conflicts.iter().any(|c| c.matches(&candidate.id))
                || candidate.conflicts.iter().any(|c| c.matches(&p.id))
        };
        self.kept.iter().any(against) || chosen.iter().any(against)
    }

    /// Assemble the final assignment from the chosen install set
    pub fn assignment(&self, chosen: &PackageSet) -> Assignment {
        let mut assignment = Assignment::new();
        for package in self.kept.iter() {
            assignment.set(package.id.clone(), Decision::Keep);
        }
        for id in &self.removed {
            assignment.set(id.clone(), Decision::Remove);
        }
        for package in chosen.iter() {
            // A package can be both kept and re-chosen when a root asked for
            // something the kept set already satisfies; Keep wins.
            if !self.kept.contains(&package.id) {
                assignment.set(package.id.clone(), Decision::Install);
            }
        }
        assignment.waived = self.waived.clone();
        assignment
    }
}

/// Every (owner, dependency) edge in `set` not satisfied within `set`
pub(crate) fn unsatisfied_dependencies(set: &PackageSet) -> Vec<(PackageId, Dependency)> {
    let mut out = Vec::new();
    for package in set.iter() {
        for dep in &package.depends {
            if set.satisfying(dep).is_empty() {
                out.push((package.id.clone(), dep.clone()));
            }
        }
    }
    out
}

/// Every active conflict pair in `set` (each pair reported once)
pub(crate) fn active_conflicts(set: &PackageSet) -> Vec<(PackageId, PackageId)> {
    let mut out = Vec::new();
    for package in set.iter() {
        for conflict in &package.conflicts {
            for other in set.satisfying(conflict) {
                if other.id != package.id {
                    out.push((package.id.clone(), other.id.clone()));
                }
            }
        }
    }
    out
}
