// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use strata::compiler::{BackendKind, Compiler, CompilerOptions};
use strata::db::DatabaseKind;
use strata::installer::{Installer, InstallerOptions, System};
use strata::package::Dependency;
use strata::solver::{SolverOptions, Strategy};
use strata::tree::TreeRecipe;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Source package builder with full dependency resolution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build packages from a recipe tree
    Build {
        /// Package selectors, e.g. app/foo or >=app/foo-1.0
        selectors: Vec<String>,
        /// Recipe tree directory
        #[arg(short, long, default_value = "tree")]
        tree: PathBuf,
        /// Artifact output directory
        #[arg(short, long, default_value = "build")]
        output: PathBuf,
        /// Build backend (docker, img)
        #[arg(short, long, default_value = "docker")]
        backend: String,
        /// Worker count; 0 uses the available parallelism
        #[arg(short, long, default_value_t = 0)]
        concurrency: usize,
        /// Preserve ownership metadata in emitted layers
        #[arg(long)]
        privileged: bool,
        /// Also rebuild everything that runtime-depends on the targets
        #[arg(long)]
        revdeps: bool,
        /// Build every package in the tree
        #[arg(long)]
        all: bool,
        /// Scratch database engine for the tree (memory, file)
        #[arg(long, default_value = "memory")]
        database: String,
    },
    /// Reinstall packages on a target system (uninstall then install)
    Reinstall {
        /// Package selectors, e.g. app/foo or app/foo-1.0
        selectors: Vec<String>,
        /// Recipe tree directory
        #[arg(short, long, default_value = "tree")]
        tree: PathBuf,
        /// Artifact output directory
        #[arg(short, long, default_value = "build")]
        output: PathBuf,
        /// Build backend (docker, img)
        #[arg(short, long, default_value = "docker")]
        backend: String,
        /// System database path
        #[arg(long, default_value = "/var/lib/strata/strata.db")]
        system_dbpath: PathBuf,
        /// System database engine (memory, file)
        #[arg(long, default_value = "file")]
        system_engine: String,
        /// Root the packages get installed into
        #[arg(long, default_value = "/")]
        system_target: PathBuf,
        /// Resolution strategy (exact, stochastic)
        #[arg(long, default_value = "exact")]
        solver_type: String,
        /// Stochastic solver learning rate
        #[arg(long, default_value_t = 0.7)]
        solver_rate: f32,
        /// Stochastic solver discount for induced violations
        #[arg(long, default_value_t = 1.0)]
        solver_discount: f32,
        /// Stochastic solver attempt budget
        #[arg(long, default_value_t = 9000)]
        solver_attempts: usize,
        /// Run the exact search across cores
        #[arg(long)]
        solver_concurrent: bool,
        /// Worker count for builds; 0 uses the available parallelism
        #[arg(long, default_value_t = 0)]
        concurrency: usize,
        /// Preserve ownership metadata during extraction
        #[arg(long)]
        privileged: bool,
        /// Accept best-effort solutions and stranded dependencies
        #[arg(long)]
        force: bool,
        /// Install only the dependencies of the selected packages
        #[arg(long)]
        onlydeps: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Produce artifacts but apply nothing to the system
        #[arg(long)]
        download_only: bool,
    },
}

/// Parse every selector upfront so a typo fails before any work starts
fn parse_selectors(selectors: &[String]) -> Result<Vec<Dependency>> {
    selectors
        .iter()
        .map(|s| Dependency::parse(s).map_err(Into::into))
        .collect()
}

fn effective_concurrency(requested: usize) -> usize {
    if requested != 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

#[allow(clippy::too_many_arguments)]
fn cmd_build(
    selectors: Vec<String>,
    tree: PathBuf,
    output: PathBuf,
    backend: String,
    concurrency: usize,
    privileged: bool,
    revdeps: bool,
    all: bool,
    database: String,
) -> Result<()> {
    if selectors.is_empty() && !all {
        anyhow::bail!("nothing to build: pass package selectors or --all");
    }

    let backend: BackendKind = backend.parse()?;
    let engine: DatabaseKind = database.parse()?;
    let concurrency = effective_concurrency(concurrency);

    let mut recipes = TreeRecipe::new(engine.open_scratch()?);
    recipes.load(&tree)?;

    let mut compiler = Compiler::new(
        backend.backend(),
        recipes.package_set()?,
        CompilerOptions { output_dir: output },
    );
    compiler.prepare(concurrency)?;

    let mut specs = Vec::new();
    if all {
        for package in recipes.world()? {
            if package.recipe.is_some() {
                specs.push(compiler.from_package(&Dependency::exact(&package.id))?);
            }
        }
        info!("Building all {} buildable packages", specs.len());
    } else {
        for dep in parse_selectors(&selectors)? {
            specs.push(compiler.from_package(&dep)?);
        }
    }

    let (artifacts, errors) = if revdeps {
        compiler.compile_with_revdeps(concurrency, privileged, specs)
    } else {
        compiler.compile_parallel(concurrency, privileged, specs)
    };

    for artifact in &artifacts {
        println!("{}", artifact.path.display());
    }
    if let Err(e) = recipes.database().clean() {
        warn!("Scratch database cleanup failed: {}", e);
    }
    if !errors.is_empty() {
        for e in &errors {
            error!("{}", e);
        }
        anyhow::bail!("{} of {} builds failed", errors.len(), artifacts.len() + errors.len());
    }

    println!("Built {} package(s)", artifacts.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_reinstall(
    selectors: Vec<String>,
    tree: PathBuf,
    output: PathBuf,
    backend: String,
    system_dbpath: PathBuf,
    system_engine: String,
    system_target: PathBuf,
    solver: SolverOptions,
    concurrency: usize,
    privileged: bool,
    force: bool,
    onlydeps: bool,
    yes: bool,
    download_only: bool,
) -> Result<()> {
    if selectors.is_empty() {
        anyhow::bail!("nothing to reinstall: pass package selectors");
    }
    let wanted = parse_selectors(&selectors)?;

    let backend: BackendKind = backend.parse()?;
    let engine: DatabaseKind = system_engine.parse()?;
    let concurrency = effective_concurrency(concurrency);

    let mut system = System {
        database: engine.open_system(&system_dbpath)?,
        target: system_target,
    };

    let mut recipes = TreeRecipe::new(DatabaseKind::Memory.open_scratch()?);
    recipes.load(&tree)?;

    let mut compiler = Compiler::new(
        backend.backend(),
        recipes.package_set()?,
        CompilerOptions { output_dir: output },
    );
    compiler.prepare(concurrency)?;

    // The removal side is whatever the system currently has matching the
    // selectors; a selector matching nothing installed is only a warning.
    let mut to_remove = Vec::new();
    for dep in &wanted {
        let installed = system.database.find_all(dep)?;
        if installed.is_empty() {
            warn!("{} matches nothing installed; installing fresh", dep);
        }
        to_remove.extend(installed.into_iter().map(|p| p.id));
    }

    println!("Reinstalling {} selector(s) into {}", wanted.len(), system.target.display());
    for id in &to_remove {
        println!("  replacing {}", id);
    }
    if !yes && !confirm("Do you want to continue?")? {
        anyhow::bail!("aborted");
    }

    let installer = Installer::new(InstallerOptions {
        concurrency,
        force,
        only_deps: onlydeps,
        privileged,
        download_only,
        solver,
    });
    let applied = installer.swap(&to_remove, &wanted, recipes.database(), &compiler, &mut system)?;

    for id in &applied {
        println!("{}", id);
    }
    println!("Reinstalled {} package(s)", applied.len());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Build {
            selectors,
            tree,
            output,
            backend,
            concurrency,
            privileged,
            revdeps,
            all,
            database,
        }) => cmd_build(
            selectors,
            tree,
            output,
            backend,
            concurrency,
            privileged,
            revdeps,
            all,
            database,
        ),
        Some(Commands::Reinstall {
            selectors,
            tree,
            output,
            backend,
            system_dbpath,
            system_engine,
            system_target,
            solver_type,
            solver_rate,
            solver_discount,
            solver_attempts,
            solver_concurrent,
            concurrency,
            privileged,
            force,
            onlydeps,
            yes,
            download_only,
        }) => {
            let mut strategy: Strategy = solver_type.parse()?;
            if solver_concurrent && strategy == Strategy::Exact {
                strategy = Strategy::Parallel;
            }
            let solver = SolverOptions {
                strategy,
                learn_rate: solver_rate,
                discount: solver_discount,
                max_attempts: solver_attempts,
                seed: None,
            };
            cmd_reinstall(
                selectors,
                tree,
                output,
                backend,
                system_dbpath,
                system_engine,
                system_target,
                solver,
                concurrency,
                privileged,
                force,
                onlydeps,
                yes,
                download_only,
            )
        }
        None => {
            println!("strata v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'strata --help' for usage information");
            Ok(())
        }
    }
}
