// src/solver/parallel.rs

//! Branch-partitioned parallel strategy
//!
//! Partitions the search on the first choice point's candidates and explores
//! each branch on the rayon pool. The first branch to complete a satisfying
//! assignment raises a cancellation flag; sibling branches observe it and
//! abandon their partial work, which is never merged. Exhausting every
//! branch proves unsatisfiability, exactly like the exact strategy.

use super::{Assignment, SolveContext, active_conflicts, exact};
use crate::error::{Error, Result};
use crate::package::{Dependency, PackageSet};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

pub(crate) fn solve(ctx: &SolveContext) -> Result<Assignment> {
    let empty = PackageSet::new();
    let Some(idx) = ctx.roots.iter().position(|dep| !ctx.satisfied(dep, &empty)) else {
        // No choice point at all: the exact completion path already handles
        // this without any search.
        return exact::solve(ctx);
    };

    let dep = &ctx.roots[idx];
    let mut rest: Vec<Dependency> = Vec::with_capacity(ctx.roots.len() - 1);
    rest.extend_from_slice(&ctx.roots[..idx]);
    rest.extend_from_slice(&ctx.roots[idx + 1..]);

    let candidates = ctx.candidates(dep)?;
    debug!(branches = candidates.len(), "Partitioned solve on {}", dep);

    let stop = AtomicBool::new(false);
    let outcome = candidates.par_iter().find_map_any(|candidate| {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        if ctx.conflicts_with(candidate, &empty) {
            return None;
        }

        let mut chosen = PackageSet::new();
        let mut pending = rest.clone();
        pending.extend(candidate.depends.iter().cloned());
        chosen.insert(candidate.clone());

        match branch_search(ctx, &pending, &chosen, &stop) {
            Ok(Some(assignment)) => {
                // First satisfying result wins; signal every sibling branch.
                stop.store(true, Ordering::Relaxed);
                Some(Ok(assignment))
            }
            Ok(None) => None,
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                Some(Err(e))
            }
        }
    });

    match outcome {
        Some(result) => result,
        None => Err(Error::Unsatisfiable(format!(
            "no consistent assignment satisfies {} (all branches exhausted)",
            dep
        ))),
    }
}

/// Depth-first search within one branch, stopping at the first complete
/// consistent solution or when the cancellation flag is raised
fn branch_search(
    ctx: &SolveContext,
    pending: &[Dependency],
    chosen: &PackageSet,
    stop: &AtomicBool,
) -> Result<Option<Assignment>> {
    if stop.load(Ordering::Relaxed) {
        trace!("Branch cancelled, discarding partial assignment");
        return Ok(None);
    }

    let next = pending.iter().position(|dep| !ctx.satisfied(dep, chosen));
    let Some(idx) = next else {
        let result = ctx.kept.union(chosen);
        if !active_conflicts(&result).is_empty() {
            return Ok(None);
        }
        return Ok(Some(ctx.assignment(chosen)));
    };

    let dep = &pending[idx];
    let mut rest: Vec<Dependency> = Vec::with_capacity(pending.len() - 1);
    rest.extend_from_slice(&pending[..idx]);
    rest.extend_from_slice(&pending[idx + 1..]);

    for candidate in ctx.candidates(dep)? {
        if ctx.conflicts_with(&candidate, chosen) {
            continue;
        }
        let mut next_chosen = chosen.clone();
        let mut next_pending = rest.clone();
        next_pending.extend(candidate.depends.iter().cloned());
        next_chosen.insert(candidate);
        if let Some(assignment) = branch_search(ctx, &next_pending, &next_chosen, stop)? {
            return Ok(Some(assignment));
        }
    }

    Ok(None)
}
