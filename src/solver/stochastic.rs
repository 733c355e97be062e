// src/solver/stochastic.rs

//! Stochastic local-search strategy
//!
//! For requests where exhaustive search is too slow (or no exact assignment
//! exists without relaxation), repeatedly samples candidate assignments and
//! scores them by a cost function penalizing unresolved dependencies and
//! active conflicts. A tabular weight per candidate package biases later
//! samples toward previously good regions: after each sample, every chosen
//! package's weight moves toward the sample's reward by `learn_rate`.
//! `discount` damps the cost of violations induced transitively (by a chosen
//! package's own dependencies) relative to violations of the request itself.
//!
//! Bounded by `max_attempts`. A zero-cost sample short-circuits and is a
//! real solution; otherwise the lowest-cost assignment found is returned
//! with a best-effort marker. This strategy can never prove
//! unsatisfiability, so it never returns `Unsatisfiable`.

use super::{Assignment, SolveContext, SolverOptions, active_conflicts};
use crate::error::Result;
use crate::package::{Dependency, PackageId, PackageSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Starting weight for a candidate never sampled before
const INITIAL_WEIGHT: f64 = 0.5;

/// Weights never collapse to zero so every candidate stays reachable
const MIN_WEIGHT: f64 = 0.01;

pub(crate) fn solve(ctx: &SolveContext, options: &SolverOptions) -> Result<Assignment> {
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let learn_rate = f64::from(options.learn_rate).clamp(0.0, 1.0);
    let discount = f64::from(options.discount).clamp(0.0, 1.0);
    let attempts = options.max_attempts.max(1);

    let mut weights: HashMap<PackageId, f64> = HashMap::new();
    // The first sample always replaces this sentinel, so `best` holds a real
    // assignment whenever the loop has run.
    let mut best: (f64, PackageSet) = (f64::INFINITY, PackageSet::new());

    for attempt in 0..attempts {
        let chosen = sample(ctx, &mut rng, &weights)?;
        let cost = score(ctx, &chosen, discount);

        // Reward feedback: good (low-cost) samples pull their choices'
        // weights up, bad samples pull them down.
        let reward = 1.0 / (1.0 + cost);
        for package in chosen.iter() {
            let w = weights
                .entry(package.id.clone())
                .or_insert(INITIAL_WEIGHT);
            *w = (*w + learn_rate * (reward - *w)).max(MIN_WEIGHT);
        }

        if cost == 0.0 {
            debug!(attempt, "Zero-cost assignment found");
            return Ok(ctx.assignment(&chosen));
        }
        trace!(attempt, cost, "Sampled assignment");

        if cost < best.0 {
            best = (cost, chosen);
        }
    }

    // Budget exhausted: hand back the best attempt, flagged so the caller
    // can decide whether to proceed.
    let (cost, chosen) = best;
    debug!(cost, "Attempt budget exhausted, returning best-effort assignment");
    let mut assignment = ctx.assignment(&chosen);
    assignment.mark_best_effort(cost);
    Ok(assignment)
}

/// Sample one candidate assignment by walking the dependency frontier and
/// picking weighted-random candidates
///
/// Conflict- or constraint-violating picks are allowed here; the cost
/// function charges for them instead.
fn sample(
    ctx: &SolveContext,
    rng: &mut StdRng,
    weights: &HashMap<PackageId, f64>,
) -> Result<PackageSet> {
    let mut chosen = PackageSet::new();
    let mut frontier: Vec<Dependency> = ctx.roots.clone();

    while let Some(dep) = frontier.pop() {
        if ctx.satisfied(&dep, &chosen) {
            continue;
        }
        let candidates = ctx.candidates(&dep)?;
        if candidates.is_empty() {
            // Nothing can satisfy this edge; leave it unresolved and let the
            // score account for it.
            continue;
        }

        let total: f64 = candidates
            .iter()
            .map(|c| weights.get(&c.id).copied().unwrap_or(INITIAL_WEIGHT))
            .sum();
        let mut roll = rng.random_range(0.0..total);
        let mut picked = candidates.len() - 1;
        for (i, candidate) in candidates.iter().enumerate() {
            let w = weights.get(&candidate.id).copied().unwrap_or(INITIAL_WEIGHT);
            if roll < w {
                picked = i;
                break;
            }
            roll -= w;
        }

        let candidate = candidates[picked].clone();
        frontier.extend(candidate.depends.iter().cloned());
        chosen.insert(candidate);
    }

    Ok(chosen)
}

/// Cost of a candidate assignment: unresolved request dependencies count
/// full, violations induced by chosen packages are damped by `discount`,
/// and every active conflict counts full
fn score(ctx: &SolveContext, chosen: &PackageSet, discount: f64) -> f64 {
    let result = ctx.kept.union(chosen);
    let mut cost = 0.0;

    for dep in &ctx.roots {
        if result.satisfying(dep).is_empty() {
            cost += 1.0;
        }
    }
    for package in chosen.iter() {
        for dep in &package.depends {
            if result.satisfying(dep).is_empty() {
                cost += discount;
            }
        }
    }
    cost += active_conflicts(&result).len() as f64;

    cost
}
