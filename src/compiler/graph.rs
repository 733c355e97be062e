// src/compiler/graph.rs

//! Build graph construction and bounded-parallel execution
//!
//! Nodes are compilation specs; edges are build-time dependencies between
//! specs in the same batch. The graph is validated acyclic at construction,
//! before any backend is invoked. Execution runs over a bounded worker pool
//! with a readiness gate: a node becomes ready only once every build
//! dependency has succeeded, workers with no ready node block on a condvar,
//! and a failed node permanently skips its transitive dependents.

use super::CompilationSpec;
use super::artifact::Artifact;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use tracing::{debug, warn};

/// Lifecycle of one build node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting on at least one build dependency
    Pending,
    /// All build dependencies succeeded; eligible for a worker
    Ready,
    Running,
    Succeeded,
    Failed,
    /// Never ran: a transitive build dependency failed
    Skipped,
}

#[derive(Debug)]
pub(crate) struct BuildNode {
    pub spec: CompilationSpec,
    /// Indices of build-dependency nodes
    deps: Vec<usize>,
    /// Indices of nodes build-depending on this one
    dependents: Vec<usize>,
}

/// An acyclic graph of build nodes, deduplicated by spec fingerprint
#[derive(Debug)]
pub(crate) struct BuildGraph {
    nodes: Vec<BuildNode>,
}

impl BuildGraph {
    /// Construct and validate the graph; a dependency cycle or a build
    /// dependency missing from the batch is a configuration error
    pub fn build(specs: Vec<CompilationSpec>) -> Result<Self> {
        let mut nodes: Vec<BuildNode> = Vec::new();
        let mut by_fingerprint: HashMap<String, usize> = HashMap::new();

        for spec in specs {
            let fingerprint = spec.fingerprint();
            if by_fingerprint.contains_key(&fingerprint) {
                continue;
            }
            by_fingerprint.insert(fingerprint, nodes.len());
            nodes.push(BuildNode {
                spec,
                deps: Vec::new(),
                dependents: Vec::new(),
            });
        }

        // Resolve build-dependency edges within the batch.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.spec.recipe.build_depends {
                let target = nodes
                    .iter()
                    .position(|n| dep.matches(&n.spec.package.id))
                    .ok_or_else(|| {
                        Error::Configuration(format!(
                            "build dependency {} of {} is not part of the batch",
                            dep, node.spec.package.id
                        ))
                    })?;
                edges.push((i, target));
            }
        }
        for (i, target) in edges {
            if !nodes[i].deps.contains(&target) {
                nodes[i].deps.push(target);
                nodes[target].dependents.push(i);
            }
        }

        let graph = Self { nodes };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Kahn's algorithm; any node left unprocessed sits on a cycle
    fn check_acyclic(&self) -> Result<()> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut queue: Vec<usize> = (0..self.nodes.len()).filter(|&i| indegree[i] == 0).collect();
        let mut processed = 0;

        while let Some(i) = queue.pop() {
            processed += 1;
            for &d in &self.nodes[i].dependents {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    queue.push(d);
                }
            }
        }

        if processed < self.nodes.len() {
            let cyclic: Vec<String> = indegree
                .iter()
                .enumerate()
                .filter(|&(_, &deg)| deg > 0)
                .map(|(i, _)| self.nodes[i].spec.package.id.to_string())
                .collect();
            return Err(Error::Configuration(format!(
                "build dependency cycle involving [{}]",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }

    /// Execute every node over `concurrency` workers
    ///
    /// `run` performs one node's build. Node failures do not abort
    /// independent subgraphs: all artifacts and all errors from the batch
    /// are returned together and the caller decides what is fatal.
    pub fn execute<F>(&self, concurrency: usize, run: F) -> (Vec<Artifact>, Vec<Error>)
    where
        F: Fn(&CompilationSpec) -> Result<Artifact> + Sync,
    {
        let workers = concurrency.max(1).min(self.nodes.len().max(1));
        debug!(nodes = self.nodes.len(), workers, "Executing build graph");

        let scheduler = Mutex::new(Scheduler::new(self));
        let ready = Condvar::new();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker(&scheduler, &ready, &run));
            }
        });

        let scheduler = scheduler.into_inner().unwrap_or_else(|e| e.into_inner());
        (scheduler.artifacts, scheduler.errors)
    }

    fn worker<F>(&self, scheduler: &Mutex<Scheduler>, ready: &Condvar, run: &F)
    where
        F: Fn(&CompilationSpec) -> Result<Artifact> + Sync,
    {
        let mut sched = scheduler.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if sched.remaining == 0 {
                ready.notify_all();
                return;
            }
            let Some(idx) = sched.take_ready() else {
                // No ready node: block until a completion reshuffles the
                // frontier. Workers never busy-wait on one another.
                sched = ready.wait(sched).unwrap_or_else(|e| e.into_inner());
                continue;
            };

            drop(sched);
            let result = run(&self.nodes[idx].spec);
            sched = scheduler.lock().unwrap_or_else(|e| e.into_inner());
            sched.complete(self, idx, result);
            ready.notify_all();
        }
    }
}

/// Shared execution state behind the scheduler mutex
struct Scheduler {
    states: Vec<NodeState>,
    pending_deps: Vec<usize>,
    /// Nodes not yet in a terminal state
    remaining: usize,
    artifacts: Vec<Artifact>,
    errors: Vec<Error>,
}

impl Scheduler {
    fn new(graph: &BuildGraph) -> Self {
        let states = graph
            .nodes
            .iter()
            .map(|n| {
                if n.deps.is_empty() {
                    NodeState::Ready
                } else {
                    NodeState::Pending
                }
            })
            .collect();
        Self {
            states,
            pending_deps: graph.nodes.iter().map(|n| n.deps.len()).collect(),
            remaining: graph.nodes.len(),
            artifacts: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn take_ready(&mut self) -> Option<usize> {
        let idx = self.states.iter().position(|s| *s == NodeState::Ready)?;
        self.states[idx] = NodeState::Running;
        Some(idx)
    }

    fn complete(&mut self, graph: &BuildGraph, idx: usize, result: Result<Artifact>) {
        self.remaining -= 1;
        match result {
            Ok(artifact) => {
                self.states[idx] = NodeState::Succeeded;
                self.artifacts.push(artifact);
                for &d in &graph.nodes[idx].dependents {
                    self.pending_deps[d] -= 1;
                    if self.pending_deps[d] == 0 && self.states[d] == NodeState::Pending {
                        self.states[d] = NodeState::Ready;
                    }
                }
            }
            Err(e) => {
                warn!("Build of {} failed: {}", graph.nodes[idx].spec.package.id, e);
                self.states[idx] = NodeState::Failed;
                self.errors.push(e);
                self.skip_dependents(graph, idx, idx);
            }
        }
    }

    /// Transitively mark every dependent of `failed` as skipped, reporting
    /// each against the originally failed node
    fn skip_dependents(&mut self, graph: &BuildGraph, node: usize, failed: usize) {
        for &d in &graph.nodes[node].dependents {
            if self.states[d] != NodeState::Pending {
                continue;
            }
            self.states[d] = NodeState::Skipped;
            self.remaining -= 1;
            self.errors.push(Error::SkippedDueToDependencyFailure {
                id: graph.nodes[d].spec.package.id.to_string(),
                failed_dependency: graph.nodes[failed].spec.package.id.to_string(),
            });
            self.skip_dependents(graph, d, failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{BuildRecipe, Dependency, Package};
    use crate::version::Version;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Barrier;
    use std::sync::Mutex as StdMutex;

    fn spec(name: &str, build_deps: &[&str]) -> CompilationSpec {
        let recipe = BuildRecipe {
            image: "alpine".to_string(),
            steps: vec!["true".to_string()],
            env: Default::default(),
            build_depends: build_deps
                .iter()
                .map(|s| Dependency::parse(s).unwrap())
                .collect(),
        };
        let package = Package::new("app", name, Version::parse("1.0").unwrap())
            .with_recipe(recipe.clone());
        CompilationSpec::new(package, recipe, PathBuf::from("/tmp"))
    }

    fn ok_artifact(s: &CompilationSpec) -> Artifact {
        Artifact {
            id: s.package.id.clone(),
            path: PathBuf::from("/dev/null"),
            fingerprint: s.fingerprint(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        let a = spec("a", &["app/b"]);
        let b = spec("b", &["app/a"]);
        let err = BuildGraph::build(vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let a = spec("a", &["app/a"]);
        let err = BuildGraph::build(vec![a]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_missing_batch_dependency_rejected() {
        let a = spec("a", &["app/absent"]);
        let err = BuildGraph::build(vec![a]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_duplicate_fingerprints_deduplicated() {
        let graph = BuildGraph::build(vec![spec("a", &[]), spec("a", &[])]).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_chain_executes_in_dependency_order() {
        let graph = BuildGraph::build(vec![
            spec("c", &["app/b"]),
            spec("a", &[]),
            spec("b", &["app/a"]),
        ])
        .unwrap();

        let order = StdMutex::new(Vec::new());
        let (artifacts, errors) = graph.execute(4, |s| {
            order.lock().unwrap().push(s.package.id.name.clone());
            Ok(ok_artifact(s))
        });

        assert!(errors.is_empty());
        assert_eq!(artifacts.len(), 3);
        let order = order.into_inner().unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_nodes_run_concurrently() {
        // Both nodes block on a shared barrier; the pool must run them at
        // the same time for either to finish.
        let graph = BuildGraph::build(vec![spec("x", &[]), spec("y", &[])]).unwrap();
        let barrier = Barrier::new(2);

        let (artifacts, errors) = graph.execute(2, |s| {
            barrier.wait();
            Ok(ok_artifact(s))
        });

        assert!(errors.is_empty());
        assert_eq!(artifacts.len(), 2);
    }

    #[test]
    fn test_failure_skips_dependents_but_not_siblings() {
        // a fails; b and c (depending on a and b) are skipped; d is an
        // independent subgraph and still builds.
        let graph = BuildGraph::build(vec![
            spec("a", &[]),
            spec("b", &["app/a"]),
            spec("c", &["app/b"]),
            spec("d", &[]),
        ])
        .unwrap();

        let (artifacts, errors) = graph.execute(2, |s| {
            if s.package.id.name == "a" {
                Err(Error::BuildFailure {
                    id: s.package.id.to_string(),
                    reason: "boom".to_string(),
                })
            } else {
                Ok(ok_artifact(s))
            }
        });

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].id.name, "d");
        assert_eq!(errors.len(), 3);
        let skipped = errors
            .iter()
            .filter(|e| matches!(e, Error::SkippedDueToDependencyFailure { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_single_worker_still_completes() {
        let graph = BuildGraph::build(vec![
            spec("a", &[]),
            spec("b", &["app/a"]),
        ])
        .unwrap();
        let (artifacts, errors) = graph.execute(1, |s| Ok(ok_artifact(s)));
        assert!(errors.is_empty());
        assert_eq!(artifacts.len(), 2);
    }
}
