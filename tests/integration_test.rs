// tests/integration_test.rs

//! End-to-end tests driving the public API the way the CLI does: load a
//! recipe tree, resolve a request, build artifacts through a backend, and
//! apply them to a system root.

use std::path::{Path, PathBuf};
use strata::compiler::{Backend, BuildRequest, Compiler, CompilerOptions};
use strata::db::{DatabaseKind, FileDatabase, MemoryDatabase, PackageDatabase};
use strata::installer::{Installer, InstallerOptions, System};
use strata::package::Dependency;
use strata::solver::{Delta, Solver, SolverOptions, Strategy};
use strata::tree::TreeRecipe;
use strata::{Error, Result};

/// Backend that fabricates a one-file layer per package instead of calling
/// a container engine
struct FakeBackend {
    failing: Vec<String>,
}

impl FakeBackend {
    fn new() -> Self {
        Self { failing: Vec::new() }
    }

    fn failing_on(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Backend for FakeBackend {
    fn build_image(&self, request: &BuildRequest) -> Result<PathBuf> {
        if self.failing.contains(&request.id.name) {
            return Err(Error::BuildFailure {
                id: request.id.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        let layer = request.workdir.join("layer.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&layer)?);
        let contents = format!("{}\n", request.id);
        let mut header = tar::Header::new_gnu();
        header
            .set_path(format!("usr/share/{}", request.id.name))
            .map_err(Error::Io)?;
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, contents.as_bytes())?;
        builder.finish()?;
        Ok(layer)
    }

    fn extract_rootfs(&self, layer: &Path, destination: &Path, _privileged: bool) -> Result<()> {
        std::fs::create_dir_all(destination)?;
        let file = std::fs::File::open(layer)?;
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        archive.set_preserve_permissions(false);
        archive.unpack(destination)?;
        Ok(())
    }

    fn clean(&self, _resources: &[String]) -> Result<()> {
        Ok(())
    }
}

fn write_tree(root: &Path) {
    let write = |dir: &str, definition: &str, recipe: Option<&str>| {
        let pkg_dir = root.join(dir);
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join("package.json"), definition).unwrap();
        if let Some(recipe) = recipe {
            std::fs::write(pkg_dir.join("build.json"), recipe).unwrap();
        }
    };

    write(
        "app/editor",
        r#"{"category": "app", "name": "editor", "version": "2.1",
            "depends": [{"category": "lib", "name": "curses",
                         "req": {"op": "greater_eq", "version": "1.0"}}]}"#,
        Some(r#"{"image": "alpine:3.20", "steps": ["make", "make install"]}"#),
    );
    write(
        "lib/curses",
        r#"{"category": "lib", "name": "curses", "version": "1.2"}"#,
        Some(r#"{"image": "alpine:3.20", "steps": ["make"]}"#),
    );
    write(
        "lib/curses-old",
        r#"{"category": "lib", "name": "curses", "version": "0.9"}"#,
        Some(r#"{"image": "alpine:3.20", "steps": ["make"]}"#),
    );
}

fn compiler_for(tree: &TreeRecipe, output: &Path, backend: FakeBackend) -> Compiler {
    let mut compiler = Compiler::new(
        Box::new(backend),
        tree.package_set().unwrap(),
        CompilerOptions {
            output_dir: output.to_path_buf(),
        },
    );
    compiler.prepare(2).unwrap();
    compiler
}

#[test]
fn test_tree_to_artifact_pipeline() {
    let tree_dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();
    assert_eq!(tree.world().unwrap().len(), 3);

    let compiler = compiler_for(&tree, out.path(), FakeBackend::new());
    let spec = compiler
        .from_package(&Dependency::parse("app/editor-2.1").unwrap())
        .unwrap();
    let (artifacts, errors) = compiler.compile_parallel(2, false, vec![spec]);

    assert!(errors.is_empty());
    assert_eq!(artifacts.len(), 1);
    assert!(artifacts[0].path.exists());
    assert!(
        artifacts[0]
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("editor-2.1-")
    );
}

#[test]
fn test_install_into_system_root() {
    let tree_dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();
    let compiler = compiler_for(&tree, out.path(), FakeBackend::new());

    let mut system = System {
        database: Box::new(MemoryDatabase::new()),
        target: out.path().join("rootfs"),
    };
    let installer = Installer::new(InstallerOptions {
        concurrency: 2,
        ..Default::default()
    });

    let installed = installer
        .install(
            &[Dependency::parse("app/editor-2.1").unwrap()],
            tree.database(),
            &compiler,
            &mut system,
        )
        .unwrap();

    // The dependency closure was pulled in and the newest curses won.
    let ids: Vec<String> = installed.iter().map(|id| id.to_string()).collect();
    assert_eq!(ids, vec!["app/editor-2.1", "lib/curses-1.2"]);

    assert!(system.target.join("usr/share/editor").exists());
    assert!(system.target.join("usr/share/curses").exists());
    assert_eq!(system.database.world().unwrap().len(), 2);
}

#[test]
fn test_install_is_idempotent() {
    let tree_dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();
    let compiler = compiler_for(&tree, out.path(), FakeBackend::new());

    let mut system = System {
        database: Box::new(MemoryDatabase::new()),
        target: out.path().join("rootfs"),
    };
    let installer = Installer::new(InstallerOptions::default());
    let wanted = [Dependency::parse("app/editor-2.1").unwrap()];

    let first = installer
        .install(&wanted, tree.database(), &compiler, &mut system)
        .unwrap();
    assert_eq!(first.len(), 2);

    // Asking again for what is already installed changes nothing.
    let second = installer
        .install(&wanted, tree.database(), &compiler, &mut system)
        .unwrap();
    assert!(second.is_empty());
    assert_eq!(system.database.world().unwrap().len(), 2);
}

#[test]
fn test_reinstall_swap_against_file_database() {
    let tree_dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();
    let compiler = compiler_for(&tree, out.path(), FakeBackend::new());

    let db_path = out.path().join("system/strata.db");
    let mut system = System {
        database: Box::new(FileDatabase::open(&db_path).unwrap()),
        target: out.path().join("rootfs"),
    };
    let installer = Installer::new(InstallerOptions::default());
    let wanted = [Dependency::parse("lib/curses-1.2").unwrap()];

    installer
        .install(&wanted, tree.database(), &compiler, &mut system)
        .unwrap();

    // Reinstall: remove the installed copy and add it back in one operation.
    let to_remove: Vec<_> = system
        .database
        .find_all(&wanted[0])
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    let swapped = installer
        .swap(&to_remove, &wanted, tree.database(), &compiler, &mut system)
        .unwrap();

    assert_eq!(swapped.len(), 1);
    drop(system);

    // State survives reopening the file-backed store.
    let reopened = FileDatabase::open(&db_path).unwrap();
    let world = reopened.world().unwrap();
    assert_eq!(world.len(), 1);
    assert_eq!(world[0].id.to_string(), "lib/curses-1.2");
}

#[test]
fn test_unsatisfiable_install_names_the_request() {
    let tree_dir = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();

    let delta = Delta::new().install(Dependency::parse(">=app/editor-9.0").unwrap());
    let err = Solver::new(SolverOptions::default())
        .solve(tree.database(), &Default::default(), &delta)
        .unwrap_err();

    match err {
        Error::Unsatisfiable(message) => assert!(message.contains("app/editor")),
        other => panic!("expected Unsatisfiable, got {:?}", other),
    }
}

#[test]
fn test_stochastic_strategy_reports_best_effort_on_unsolvable() {
    let tree_dir = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();

    let delta = Delta::new().install(Dependency::parse(">=app/editor-9.0").unwrap());
    let options = SolverOptions {
        strategy: Strategy::Stochastic,
        max_attempts: 50,
        seed: Some(42),
        ..Default::default()
    };
    let assignment = Solver::new(options)
        .solve(tree.database(), &Default::default(), &delta)
        .unwrap();

    // An impossible request never comes back claiming to be solved.
    assert!(assignment.is_best_effort());
}

#[test]
fn test_build_failure_does_not_touch_the_system() {
    let tree_dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();
    let compiler = compiler_for(&tree, out.path(), FakeBackend::failing_on(&["curses"]));

    let mut system = System {
        database: Box::new(MemoryDatabase::new()),
        target: out.path().join("rootfs"),
    };
    let installer = Installer::new(InstallerOptions::default());

    let result = installer.install(
        &[Dependency::parse("app/editor-2.1").unwrap()],
        tree.database(),
        &compiler,
        &mut system,
    );

    assert!(result.is_err());
    assert!(system.database.world().unwrap().is_empty());
    assert!(!system.target.join("usr/share/editor").exists());
}

#[test]
fn test_parallel_strategy_matches_exact_outcome() {
    let tree_dir = tempfile::tempdir().unwrap();
    write_tree(tree_dir.path());

    let mut tree = TreeRecipe::new(DatabaseKind::Memory.open_scratch().unwrap());
    tree.load(tree_dir.path()).unwrap();
    let delta = Delta::new().install(Dependency::parse("app/editor-2.1").unwrap());

    let exact = Solver::new(SolverOptions::default())
        .solve(tree.database(), &Default::default(), &delta)
        .unwrap();
    let parallel = Solver::new(SolverOptions {
        strategy: Strategy::Parallel,
        ..Default::default()
    })
    .solve(tree.database(), &Default::default(), &delta)
    .unwrap();

    assert_eq!(exact.to_install(), parallel.to_install());
}
