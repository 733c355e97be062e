// src/installer/mod.rs

//! Installer orchestration
//!
//! Composes solver, compiler, and backend to realize install, uninstall,
//! and swap operations against a target system. The installer consumes the
//! core through narrow interfaces: it solves against the tree's package
//! database, compiles whatever has no artifact yet, extracts artifact
//! layers into the target root, and records the outcome in the system
//! database. A swap applies nothing until both its removal and its addition
//! have fully resolved and built.

use crate::compiler::{Artifact, Compiler};
use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::package::{Dependency, PackageId, PackageSet};
use crate::solver::{Delta, Solver, SolverOptions};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// The target system: its installed-package database and root path
pub struct System {
    pub database: Box<dyn PackageDatabase>,
    pub target: PathBuf,
}

/// Installer tuning, passed explicitly to the constructor
#[derive(Debug, Clone)]
pub struct InstallerOptions {
    pub concurrency: usize,
    /// Demote solver stranding failures to warnings and accept best-effort
    /// assignments
    pub force: bool,
    /// Install only the dependencies of the requested packages
    pub only_deps: bool,
    /// Preserve ownership metadata during extraction (needs elevated rights)
    pub privileged: bool,
    /// Stop after artifacts are produced, applying nothing
    pub download_only: bool,
    pub solver: SolverOptions,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            force: false,
            only_deps: false,
            privileged: false,
            download_only: false,
            solver: SolverOptions::default(),
        }
    }
}

pub struct Installer {
    options: InstallerOptions,
}

impl Installer {
    pub fn new(options: InstallerOptions) -> Self {
        Self { options }
    }

    /// Install the requested packages (and their dependency closure) into
    /// the system
    pub fn install(
        &self,
        wanted: &[Dependency],
        source: &dyn PackageDatabase,
        compiler: &Compiler,
        system: &mut System,
    ) -> Result<Vec<PackageId>> {
        let installed: PackageSet = system.database.world()?.into_iter().collect();

        let mut delta = Delta::new();
        delta.install = wanted.to_vec();
        delta.force = self.options.force;

        let assignment = Solver::new(self.options.solver.clone()).solve(source, &installed, &delta)?;
        if let Some(cost) = assignment.best_effort_cost() {
            if !self.options.force {
                return Err(Error::Unsatisfiable(format!(
                    "only a best-effort assignment was found (cost {:.1}); rerun with force to apply it",
                    cost
                )));
            }
            warn!("Applying best-effort assignment with cost {:.1}", cost);
        }

        let mut to_install = assignment.to_install();
        if self.options.only_deps {
            to_install.retain(|id| !wanted.iter().any(|dep| dep.matches(id)));
        }
        if to_install.is_empty() {
            info!("Nothing to install");
            return Ok(Vec::new());
        }

        let artifacts = self.build(&to_install, compiler)?;
        if self.options.download_only {
            info!("Download-only: leaving {} artifacts unapplied", artifacts.len());
            return Ok(Vec::new());
        }

        self.apply(&to_install, &artifacts, source, compiler, system)?;
        Ok(to_install)
    }

    /// Remove the given packages from the system
    pub fn uninstall(
        &self,
        unwanted: &[PackageId],
        system: &mut System,
    ) -> Result<Vec<PackageId>> {
        let installed: PackageSet = system.database.world()?.into_iter().collect();

        let mut delta = Delta::new();
        delta.remove = unwanted.to_vec();
        delta.force = self.options.force;

        // The system database doubles as the candidate source: a removal
        // may only be repaired from what is already known to the system.
        let assignment =
            Solver::new(self.options.solver.clone()).solve(system.database.as_ref(), &installed, &delta)?;

        let removed = assignment.to_remove();
        for (owner, dep) in assignment.waived() {
            warn!("{} is left with unsatisfied dependency {}", owner, dep);
        }
        for id in &assignment.to_install() {
            warn!("Removal would be repaired by installing {}; skipping repair", id);
        }
        for id in &removed {
            system.database.delete(id)?;
            info!("Removed {}", id);
        }
        Ok(removed)
    }

    /// Replace `remove` with `add` as one operation
    ///
    /// Both sides are resolved and the additions built before anything is
    /// applied, so a failure leaves the system database untouched.
    pub fn swap(
        &self,
        remove: &[PackageId],
        add: &[Dependency],
        source: &dyn PackageDatabase,
        compiler: &Compiler,
        system: &mut System,
    ) -> Result<Vec<PackageId>> {
        let installed: PackageSet = system.database.world()?.into_iter().collect();
        let solver = Solver::new(self.options.solver.clone());

        // Resolve the removal side against the present state.
        let mut removal = Delta::new();
        removal.remove = remove.to_vec();
        removal.force = self.options.force;
        let removal_assignment = solver.solve(system.database.as_ref(), &installed, &removal)?;
        for (owner, dep) in removal_assignment.waived() {
            warn!("{} is left with unsatisfied dependency {}", owner, dep);
        }

        // Resolve the addition side against the state the removal leaves.
        let mut survivors = installed.clone();
        for id in &removal_assignment.to_remove() {
            survivors.remove(id);
        }
        let mut addition = Delta::new();
        addition.install = add.to_vec();
        addition.force = self.options.force;
        let addition_assignment = solver.solve(source, &survivors, &addition)?;
        if addition_assignment.is_best_effort() && !self.options.force {
            return Err(Error::Unsatisfiable(
                "swap addition resolved only best-effort; rerun with force to apply it".to_string(),
            ));
        }

        let to_install = addition_assignment.to_install();
        let artifacts = self.build(&to_install, compiler)?;
        if self.options.download_only {
            return Ok(Vec::new());
        }

        // Point of no return: both sides are resolved and built.
        for id in &removal_assignment.to_remove() {
            system.database.delete(id)?;
            info!("Removed {}", id);
        }
        self.apply(&to_install, &artifacts, source, compiler, system)?;
        Ok(to_install)
    }

    /// Compile artifacts for the given identities, failing on any collected
    /// build error
    fn build(&self, ids: &[PackageId], compiler: &Compiler) -> Result<Vec<Artifact>> {
        let mut specs = Vec::with_capacity(ids.len());
        for id in ids {
            specs.push(compiler.from_package(&Dependency::exact(id))?);
        }

        let (artifacts, errors) = compiler.compile_parallel(
            self.options.concurrency,
            self.options.privileged,
            specs,
        );
        if !errors.is_empty() {
            for e in &errors {
                error!("{}", e);
            }
            let mut errors = errors;
            return Err(errors.remove(0));
        }
        Ok(artifacts)
    }

    /// Extract each identity's artifact into the target root and record it
    fn apply(
        &self,
        ids: &[PackageId],
        artifacts: &[Artifact],
        source: &dyn PackageDatabase,
        compiler: &Compiler,
        system: &mut System,
    ) -> Result<()> {
        for id in ids {
            let package = source
                .get(id)?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            let artifact = artifacts
                .iter()
                .find(|a| &a.id == id)
                .ok_or_else(|| Error::BuildFailure {
                    id: id.to_string(),
                    reason: "no artifact produced".to_string(),
                })?;

            compiler.backend().extract_rootfs(
                &artifact.path,
                &system.target,
                self.options.privileged,
            )?;
            system.database.save(&package)?;
            info!("Installed {} into {}", id, system.target.display());
        }
        Ok(())
    }
}
