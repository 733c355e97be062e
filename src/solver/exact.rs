// src/solver/exact.rs

//! Exhaustive single-threaded backtracking strategy
//!
//! Walks every way of satisfying the root dependencies, propagating each
//! chosen package's own dependencies as new obligations, and keeps the best
//! complete assignment under the deterministic tie-break. Because the search
//! is exhaustive, an empty result is a proof of unsatisfiability.

use super::{Assignment, SolveContext, active_conflicts};
use crate::error::{Error, Result};
use crate::package::{Dependency, PackageSet};
use tracing::trace;

pub(crate) fn solve(ctx: &SolveContext) -> Result<Assignment> {
    let mut best = None;
    search(ctx, &ctx.roots, &PackageSet::new(), &mut best)?;

    best.ok_or_else(|| {
        let wanted = ctx
            .roots
            .iter()
            .map(Dependency::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Error::Unsatisfiable(format!("no consistent assignment satisfies [{}]", wanted))
    })
}

/// Depth-first search over candidate choices
///
/// `pending` holds obligations not yet examined; an obligation already
/// satisfied by kept or chosen packages is discharged without branching.
fn search(
    ctx: &SolveContext,
    pending: &[Dependency],
    chosen: &PackageSet,
    best: &mut Option<Assignment>,
) -> Result<()> {
    // Bound: a branch already installing more than the best solution can
    // never win the tie-break.
    if let Some(found) = best {
        if chosen.len() > found.to_install().len() {
            return Ok(());
        }
    }

    let next = pending.iter().position(|dep| !ctx.satisfied(dep, chosen));
    let Some(idx) = next else {
        // Every obligation discharged: candidate solution, if conflict-free.
        let result = ctx.kept.union(chosen);
        if !active_conflicts(&result).is_empty() {
            return Ok(());
        }
        let assignment = ctx.assignment(chosen);
        let better = best
            .as_ref()
            .is_none_or(|b| assignment.tie_break_key() < b.tie_break_key());
        if better {
            trace!(installs = assignment.to_install().len(), "New best assignment");
            *best = Some(assignment);
        }
        return Ok(());
    };

    let dep = &pending[idx];
    let mut rest: Vec<Dependency> = Vec::with_capacity(pending.len() - 1);
    rest.extend_from_slice(&pending[..idx]);
    rest.extend_from_slice(&pending[idx + 1..]);

    for candidate in ctx.candidates(dep)? {
        if ctx.conflicts_with(&candidate, chosen) {
            trace!("Candidate {} rejected: conflict", candidate.id);
            continue;
        }
        let mut next_chosen = chosen.clone();
        let mut next_pending = rest.clone();
        next_pending.extend(candidate.depends.iter().cloned());
        next_chosen.insert(candidate);
        search(ctx, &next_pending, &next_chosen, best)?;
    }

    Ok(())
}
