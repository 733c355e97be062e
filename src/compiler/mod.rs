// src/compiler/mod.rs

//! Build compiler
//!
//! Turns resolved packages into compilation specs, expands their build-time
//! dependency closure into an acyclic build graph, and executes it over a
//! bounded worker pool through the configured backend. Successful nodes
//! yield content-addressed artifacts; already-built fingerprints are reused
//! without invoking the backend.

mod artifact;
pub mod backend;
mod graph;

pub use artifact::Artifact;
pub use backend::{Backend, BackendKind, BuildRequest};
pub use graph::NodeState;

use crate::error::{Error, Result};
use crate::package::{BuildRecipe, Dependency, Package, PackageId, PackageSet};
use graph::BuildGraph;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One package bound to its build instructions and an output location
#[derive(Debug, Clone)]
pub struct CompilationSpec {
    pub package: Package,
    pub recipe: BuildRecipe,
    output_dir: PathBuf,
}

impl CompilationSpec {
    pub fn new(package: Package, recipe: BuildRecipe, output_dir: PathBuf) -> Self {
        Self {
            package,
            recipe,
            output_dir,
        }
    }

    /// Content fingerprint covering identity, dependencies, and recipe
    pub fn fingerprint(&self) -> String {
        self.package.fingerprint()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The output directory is the only mutable part of a spec
    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = dir;
    }
}

/// Compiler construction options, passed explicitly
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Default output directory for artifacts
    pub output_dir: PathBuf,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
        }
    }
}

/// The build pipeline: spec resolution, graph construction, execution
pub struct Compiler {
    backend: Box<dyn Backend>,
    /// Every package known to the recipe tree
    world: PackageSet,
    options: CompilerOptions,
    default_concurrency: usize,
    prepared: bool,
    /// Serializes concurrent builds of the same fingerprint; the second
    /// waiter observes the first's completed artifact through the cache
    fingerprint_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Compiler {
    pub fn new(backend: Box<dyn Backend>, world: PackageSet, options: CompilerOptions) -> Self {
        Self {
            backend,
            world,
            options,
            default_concurrency: 1,
            prepared: false,
            fingerprint_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Validate every recipe in the tree once, before any build
    ///
    /// Fatal on malformed recipes: empty seed image, no build steps, or a
    /// build dependency nothing in the tree can satisfy.
    pub fn prepare(&mut self, concurrency: usize) -> Result<()> {
        for package in self.world.iter() {
            let Some(recipe) = &package.recipe else {
                continue;
            };
            if recipe.image.trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "recipe of {} has no seed image",
                    package.id
                )));
            }
            if recipe.steps.is_empty() {
                return Err(Error::Configuration(format!(
                    "recipe of {} has no build steps",
                    package.id
                )));
            }
            for dep in &recipe.build_depends {
                if self.world.satisfying(dep).is_empty() {
                    return Err(Error::Configuration(format!(
                        "build dependency {} of {} matches nothing in the tree",
                        dep, package.id
                    )));
                }
            }
        }
        self.default_concurrency = concurrency.max(1);
        self.prepared = true;
        debug!(packages = self.world.len(), "Compiler prepared");
        Ok(())
    }

    /// Resolve one package selector to its compilation spec
    ///
    /// `NotFound` when nothing matches; `AmbiguousMatch` when the selector
    /// is under-specified and several versions match, surfacing every
    /// candidate instead of silently picking one.
    pub fn from_package(&self, selector: &Dependency) -> Result<CompilationSpec> {
        let matches = self.world.satisfying(selector);
        match matches.len() {
            0 => Err(Error::NotFound(selector.to_string())),
            1 => {
                let package = matches[0].clone();
                let recipe = package.recipe.clone().ok_or_else(|| {
                    Error::Configuration(format!("{} has no build recipe", package.id))
                })?;
                Ok(CompilationSpec::new(
                    package,
                    recipe,
                    self.options.output_dir.clone(),
                ))
            }
            _ => Err(Error::AmbiguousMatch {
                selector: selector.to_string(),
                candidates: matches.iter().map(|p| p.id.to_string()).collect(),
            }),
        }
    }

    /// Compile the given specs and everything they build-depend on
    ///
    /// Returns every artifact produced and every error collected; the batch
    /// never aborts early on a node failure, so independent subgraphs still
    /// complete. The caller decides whether any error is fatal.
    pub fn compile_parallel(
        &self,
        concurrency: usize,
        privileged: bool,
        specs: Vec<CompilationSpec>,
    ) -> (Vec<Artifact>, Vec<Error>) {
        if !self.prepared {
            return (
                Vec::new(),
                vec![Error::Configuration(
                    "compiler used before prepare".to_string(),
                )],
            );
        }

        let expanded = match self.expand_build_closure(specs) {
            Ok(specs) => specs,
            Err(e) => return (Vec::new(), vec![e]),
        };
        let graph = match BuildGraph::build(expanded) {
            Ok(graph) => graph,
            Err(e) => return (Vec::new(), vec![e]),
        };

        let concurrency = if concurrency == 0 {
            self.default_concurrency
        } else {
            concurrency
        };
        info!(nodes = graph.len(), concurrency, "Compiling build graph");
        graph.execute(concurrency, |spec| self.execute_node(spec, privileged))
    }

    /// Like [`Self::compile_parallel`], but first widens the work set with
    /// the reverse runtime-dependency closure of every given spec
    ///
    /// Anything that (transitively) runtime-depends on a spec being rebuilt
    /// is rebuilt too, so no artifact on disk keeps depending on a stale
    /// copy of something it was built against.
    pub fn compile_with_revdeps(
        &self,
        concurrency: usize,
        privileged: bool,
        specs: Vec<CompilationSpec>,
    ) -> (Vec<Artifact>, Vec<Error>) {
        let mut errors = Vec::new();
        let mut work = specs;

        let mut seen: BTreeSet<PackageId> =
            work.iter().map(|s| s.package.id.clone()).collect();
        let mut frontier: Vec<PackageId> = seen.iter().cloned().collect();

        while let Some(id) = frontier.pop() {
            for consumer in self.reverse_dependents(&id) {
                if !seen.insert(consumer.id.clone()) {
                    continue;
                }
                debug!("Rebuilding {} (runtime-depends on {})", consumer.id, id);
                match self.from_package(&Dependency::exact(&consumer.id)) {
                    Ok(spec) => {
                        frontier.push(consumer.id.clone());
                        work.push(spec);
                    }
                    Err(e) => errors.push(e),
                }
            }
        }

        let (artifacts, mut build_errors) = self.compile_parallel(concurrency, privileged, work);
        errors.append(&mut build_errors);
        (artifacts, errors)
    }

    /// Packages in the world whose runtime dependencies match `id`
    fn reverse_dependents(&self, id: &PackageId) -> Vec<&Package> {
        self.world
            .iter()
            .filter(|p| p.depends.iter().any(|dep| dep.matches(id)))
            .collect()
    }

    /// Add specs for every transitive build dependency not already in the
    /// batch, resolving through the tree
    fn expand_build_closure(
        &self,
        specs: Vec<CompilationSpec>,
    ) -> Result<Vec<CompilationSpec>> {
        let mut out = specs;
        let mut seen: BTreeSet<String> = out.iter().map(|s| s.fingerprint()).collect();

        let mut cursor = 0;
        while cursor < out.len() {
            let deps = out[cursor].recipe.build_depends.clone();
            let output_dir = out[cursor].output_dir.clone();
            cursor += 1;

            for dep in deps {
                if out.iter().any(|s| dep.matches(&s.package.id)) {
                    continue;
                }
                let mut spec = self.from_package(&dep)?;
                spec.set_output_dir(output_dir.clone());
                if seen.insert(spec.fingerprint()) {
                    out.push(spec);
                }
            }
        }
        Ok(out)
    }

    /// Build one node: probe the cache, otherwise run the backend and
    /// package the emitted layer
    fn execute_node(&self, spec: &CompilationSpec, privileged: bool) -> Result<Artifact> {
        let fingerprint = spec.fingerprint();

        // Same-fingerprint builds must not race: the loser of this lock
        // finds the winner's artifact in the cache.
        let node_lock = {
            let mut locks = self
                .fingerprint_locks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            locks
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = node_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(artifact) = Artifact::load_cached(spec.output_dir(), &fingerprint)? {
            info!("Reusing artifact for {} ({})", spec.package.id, &fingerprint[..12]);
            return Ok(artifact);
        }

        let workdir = tempfile::Builder::new().prefix("strata-build").tempdir()?;
        let request = BuildRequest {
            id: spec.package.id.clone(),
            image: spec.recipe.image.clone(),
            steps: spec.recipe.steps.clone(),
            env: spec.recipe.env.clone(),
            fingerprint: fingerprint.clone(),
            workdir: workdir.path().to_path_buf(),
            privileged,
        };

        let layer = self.backend.build_image(&request)?;
        let artifact = Artifact::package(
            &spec.package.id,
            &fingerprint,
            &layer,
            spec.output_dir(),
        )?;

        if let Err(e) = self.backend.clean(&[request.tag()]) {
            warn!("Backend cleanup for {} failed: {}", spec.package.id, e);
        }
        Ok(artifact)
    }

    /// The backend this compiler dispatches builds to
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::RecordingBackend;
    use super::*;
    use crate::version::Version;
    use std::collections::BTreeMap;

    fn recipe(image: &str, steps: &[&str], build_deps: &[&str]) -> BuildRecipe {
        BuildRecipe {
            image: image.to_string(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            build_depends: build_deps
                .iter()
                .map(|s| Dependency::parse(s).unwrap())
                .collect(),
        }
    }

    fn pkg(category: &str, name: &str, version: &str, r: BuildRecipe) -> Package {
        Package::new(category, name, Version::parse(version).unwrap()).with_recipe(r)
    }

    fn compiler_for(world: PackageSet, output: &Path) -> Compiler {
        let mut compiler = Compiler::new(
            Box::new(RecordingBackend::new()),
            world,
            CompilerOptions {
                output_dir: output.to_path_buf(),
            },
        );
        compiler.prepare(2).unwrap();
        compiler
    }

    #[test]
    fn test_prepare_rejects_empty_steps() {
        let world: PackageSet = [pkg("app", "foo", "1.0", recipe("alpine", &[], &[]))]
            .into_iter()
            .collect();
        let mut compiler = Compiler::new(
            Box::new(RecordingBackend::new()),
            world,
            CompilerOptions::default(),
        );
        assert!(matches!(
            compiler.prepare(1).unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn test_prepare_rejects_dangling_build_dependency() {
        let world: PackageSet = [pkg(
            "app",
            "foo",
            "1.0",
            recipe("alpine", &["make"], &["lib/ghost"]),
        )]
        .into_iter()
        .collect();
        let mut compiler = Compiler::new(
            Box::new(RecordingBackend::new()),
            world,
            CompilerOptions::default(),
        );
        assert!(matches!(
            compiler.prepare(1).unwrap_err(),
            Error::Configuration(_)
        ));
    }

    #[test]
    fn test_from_package_not_found() {
        let out = tempfile::tempdir().unwrap();
        let compiler = compiler_for(PackageSet::new(), out.path());
        let err = compiler
            .from_package(&Dependency::parse("app/ghost").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_from_package_ambiguous_surfaces_candidates() {
        let out = tempfile::tempdir().unwrap();
        let world: PackageSet = [
            pkg("app", "foo", "1.0", recipe("alpine", &["make"], &[])),
            pkg("app", "foo", "2.0", recipe("alpine", &["make"], &[])),
        ]
        .into_iter()
        .collect();
        let compiler = compiler_for(world, out.path());

        let err = compiler
            .from_package(&Dependency::parse("app/foo").unwrap())
            .unwrap_err();
        match err {
            Error::AmbiguousMatch { candidates, .. } => {
                assert_eq!(candidates, vec!["app/foo-1.0", "app/foo-2.0"]);
            }
            other => panic!("expected AmbiguousMatch, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_produces_artifact() {
        let out = tempfile::tempdir().unwrap();
        let world: PackageSet = [pkg("app", "foo", "1.0", recipe("alpine", &["make"], &[]))]
            .into_iter()
            .collect();
        let compiler = compiler_for(world, out.path());

        let spec = compiler
            .from_package(&Dependency::parse("app/foo-1.0").unwrap())
            .unwrap();
        let (artifacts, errors) = compiler.compile_parallel(2, false, vec![spec]);

        assert!(errors.is_empty());
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].path.exists());
    }

    #[test]
    fn test_build_cache_skips_second_compile() {
        let out = tempfile::tempdir().unwrap();
        let world: PackageSet = [pkg("app", "foo", "1.0", recipe("alpine", &["make"], &[]))]
            .into_iter()
            .collect();
        let backend = RecordingBackend::new();
        let builds = backend.counter();
        let mut compiler = Compiler::new(
            Box::new(backend),
            world,
            CompilerOptions {
                output_dir: out.path().to_path_buf(),
            },
        );
        compiler.prepare(1).unwrap();
        let dep = Dependency::parse("app/foo-1.0").unwrap();

        let spec = compiler.from_package(&dep).unwrap();
        let (first, errors) = compiler.compile_parallel(1, false, vec![spec]);
        assert!(errors.is_empty());

        let spec = compiler.from_package(&dep).unwrap();
        let (second, errors) = compiler.compile_parallel(1, false, vec![spec]);
        assert!(errors.is_empty());

        assert_eq!(first[0].fingerprint, second[0].fingerprint);
        // The backend ran exactly once; the second compile hit the cache.
        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_same_fingerprint_builds_serialize() {
        // Two threads compile the same spec at the same time. The
        // per-fingerprint lock must serialize them so the loser observes the
        // winner's artifact through the cache instead of building again.
        let out = tempfile::tempdir().unwrap();
        let world: PackageSet = [pkg("app", "foo", "1.0", recipe("alpine", &["make"], &[]))]
            .into_iter()
            .collect();
        let backend = RecordingBackend::new();
        let builds = backend.counter();
        let mut compiler = Compiler::new(
            Box::new(backend),
            world,
            CompilerOptions {
                output_dir: out.path().to_path_buf(),
            },
        );
        compiler.prepare(2).unwrap();
        let dep = Dependency::parse("app/foo-1.0").unwrap();

        let barrier = std::sync::Barrier::new(2);
        std::thread::scope(|scope| {
            for _ in 0..2 {
                let compiler = &compiler;
                let barrier = &barrier;
                let dep = dep.clone();
                scope.spawn(move || {
                    let spec = compiler.from_package(&dep).unwrap();
                    barrier.wait();
                    let (artifacts, errors) = compiler.compile_parallel(1, false, vec![spec]);
                    assert!(errors.is_empty());
                    assert_eq!(artifacts.len(), 1);
                    assert!(artifacts[0].path.exists());
                });
            }
        });

        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_build_dependencies_expand_and_order() {
        let out = tempfile::tempdir().unwrap();
        let world: PackageSet = [
            pkg("lib", "base", "1.0", recipe("alpine", &["make"], &[])),
            pkg(
                "app",
                "foo",
                "1.0",
                recipe("alpine", &["make"], &["lib/base"]),
            ),
        ]
        .into_iter()
        .collect();
        let compiler = compiler_for(world, out.path());

        let spec = compiler
            .from_package(&Dependency::parse("app/foo-1.0").unwrap())
            .unwrap();
        let (artifacts, errors) = compiler.compile_parallel(2, false, vec![spec]);

        assert!(errors.is_empty());
        assert_eq!(artifacts.len(), 2);
        // The build dependency completes before its consumer.
        assert_eq!(artifacts[0].id.name, "base");
        assert_eq!(artifacts[1].id.name, "foo");
    }

    #[test]
    fn test_failure_collects_all_errors() {
        let out = tempfile::tempdir().unwrap();
        let world: PackageSet = [
            pkg("lib", "base", "1.0", recipe("alpine", &["make"], &[])),
            pkg(
                "app",
                "foo",
                "1.0",
                recipe("alpine", &["make"], &["lib/base"]),
            ),
            pkg("app", "solo", "1.0", recipe("alpine", &["make"], &[])),
        ]
        .into_iter()
        .collect();
        let mut compiler = Compiler::new(
            Box::new(RecordingBackend::failing_on(&["base"])),
            world,
            CompilerOptions {
                output_dir: out.path().to_path_buf(),
            },
        );
        compiler.prepare(2).unwrap();

        let specs = vec![
            compiler
                .from_package(&Dependency::parse("app/foo-1.0").unwrap())
                .unwrap(),
            compiler
                .from_package(&Dependency::parse("app/solo-1.0").unwrap())
                .unwrap(),
        ];
        let (artifacts, errors) = compiler.compile_parallel(2, false, specs);

        // solo still builds; base fails and foo is skipped.
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].id.name, "solo");
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| matches!(e, Error::BuildFailure { .. })));
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, Error::SkippedDueToDependencyFailure { .. }))
        );
    }

    #[test]
    fn test_revdeps_rebuild_transitive_consumers_in_order() {
        // A ← B ← C through runtime deps; rebuilding A rebuilds B and C,
        // with A before B and B before C.
        let out = tempfile::tempdir().unwrap();
        let a = pkg("lib", "a", "1.0", recipe("alpine", &["make"], &[]));
        let b = pkg("lib", "b", "1.0", recipe("alpine", &["make"], &["lib/a"]))
            .with_depends(vec![Dependency::parse("lib/a").unwrap()]);
        let c = pkg("lib", "c", "1.0", recipe("alpine", &["make"], &["lib/b"]))
            .with_depends(vec![Dependency::parse("lib/b").unwrap()]);
        let world: PackageSet = [a, b, c].into_iter().collect();
        let compiler = compiler_for(world, out.path());

        let spec = compiler
            .from_package(&Dependency::parse("lib/a-1.0").unwrap())
            .unwrap();
        let (artifacts, errors) = compiler.compile_with_revdeps(2, false, vec![spec]);

        assert!(errors.is_empty());
        let names: Vec<&str> = artifacts.iter().map(|a| a.id.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
