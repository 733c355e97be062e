// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("strata")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Source package builder with full dependency resolution")
        .subcommand_required(false)
        .subcommand(
            Command::new("build")
                .about("Build packages from a recipe tree")
                .arg(Arg::new("selectors").num_args(0..).help("Package selectors"))
                .arg(
                    Arg::new("tree")
                        .short('t')
                        .long("tree")
                        .default_value("tree")
                        .help("Recipe tree directory"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("build")
                        .help("Artifact output directory"),
                )
                .arg(
                    Arg::new("backend")
                        .short('b')
                        .long("backend")
                        .default_value("docker")
                        .help("Build backend (docker, img)"),
                )
                .arg(
                    Arg::new("concurrency")
                        .short('c')
                        .long("concurrency")
                        .default_value("0")
                        .help("Worker count; 0 uses the available parallelism"),
                )
                .arg(
                    Arg::new("privileged")
                        .long("privileged")
                        .action(ArgAction::SetTrue)
                        .help("Preserve ownership metadata in emitted layers"),
                )
                .arg(
                    Arg::new("revdeps")
                        .long("revdeps")
                        .action(ArgAction::SetTrue)
                        .help("Also rebuild everything that runtime-depends on the targets"),
                )
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Build every package in the tree"),
                )
                .arg(
                    Arg::new("database")
                        .long("database")
                        .default_value("memory")
                        .help("Scratch database engine (memory, file)"),
                ),
        )
        .subcommand(
            Command::new("reinstall")
                .about("Reinstall packages on a target system")
                .arg(Arg::new("selectors").num_args(0..).help("Package selectors"))
                .arg(
                    Arg::new("tree")
                        .short('t')
                        .long("tree")
                        .default_value("tree")
                        .help("Recipe tree directory"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("build")
                        .help("Artifact output directory"),
                )
                .arg(
                    Arg::new("backend")
                        .short('b')
                        .long("backend")
                        .default_value("docker")
                        .help("Build backend (docker, img)"),
                )
                .arg(
                    Arg::new("system_dbpath")
                        .long("system-dbpath")
                        .default_value("/var/lib/strata/strata.db")
                        .help("System database path"),
                )
                .arg(
                    Arg::new("system_engine")
                        .long("system-engine")
                        .default_value("file")
                        .help("System database engine (memory, file)"),
                )
                .arg(
                    Arg::new("system_target")
                        .long("system-target")
                        .default_value("/")
                        .help("Root the packages get installed into"),
                )
                .arg(
                    Arg::new("solver_type")
                        .long("solver-type")
                        .default_value("exact")
                        .help("Resolution strategy (exact, stochastic)"),
                )
                .arg(
                    Arg::new("solver_rate")
                        .long("solver-rate")
                        .default_value("0.7")
                        .help("Stochastic solver learning rate"),
                )
                .arg(
                    Arg::new("solver_discount")
                        .long("solver-discount")
                        .default_value("1.0")
                        .help("Stochastic solver discount for induced violations"),
                )
                .arg(
                    Arg::new("solver_attempts")
                        .long("solver-attempts")
                        .default_value("9000")
                        .help("Stochastic solver attempt budget"),
                )
                .arg(
                    Arg::new("solver_concurrent")
                        .long("solver-concurrent")
                        .action(ArgAction::SetTrue)
                        .help("Run the exact search across cores"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value("0")
                        .help("Worker count for builds"),
                )
                .arg(
                    Arg::new("privileged")
                        .long("privileged")
                        .action(ArgAction::SetTrue)
                        .help("Preserve ownership metadata during extraction"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Accept best-effort solutions and stranded dependencies"),
                )
                .arg(
                    Arg::new("onlydeps")
                        .long("onlydeps")
                        .action(ArgAction::SetTrue)
                        .help("Install only the dependencies of the selected packages"),
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(ArgAction::SetTrue)
                        .help("Skip the confirmation prompt"),
                )
                .arg(
                    Arg::new("download_only")
                        .long("download-only")
                        .action(ArgAction::SetTrue)
                        .help("Produce artifacts but apply nothing to the system"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("strata.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
