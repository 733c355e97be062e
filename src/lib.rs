// src/lib.rs

//! Strata Package Manager
//!
//! Source/binary package manager built around two core subsystems:
//! a multi-strategy dependency solver and a parallel build compiler.
//!
//! # Architecture
//!
//! - Packages: immutable (category, name, version) identities with
//!   runtime dependencies, conflicts, and build recipes
//! - Solver: exact, parallel, and stochastic strategies behind one contract,
//!   producing keep/install/remove assignments
//! - Compiler: build-time dependency graph executed over a bounded worker
//!   pool, producing content-addressed filesystem-layer artifacts
//! - Backends: pluggable isolated build execution (docker, img)
//! - Database: in-memory or SQLite-backed package stores behind one trait

pub mod compiler;
pub mod db;
mod error;
pub mod installer;
pub mod package;
pub mod solver;
pub mod tree;
pub mod version;

pub use error::{Error, Result};
