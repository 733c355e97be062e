// src/error.rs

use thiserror::Error;

/// Core error types for Strata
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors (recipes, artifact metadata, database documents)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Version string could not be parsed
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Package selector could not be parsed
    #[error("Invalid package selector: {0}")]
    InvalidSelector(String),

    /// Malformed recipe, cyclic build graph, or other fatal setup problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The solver proved that no consistent assignment exists
    #[error("Unsatisfiable request: {0}")]
    Unsatisfiable(String),

    /// The request asks to both add and remove the same identity
    #[error("Conflicting request: {0} is both added and removed")]
    ConflictingRequest(String),

    /// No package in the tree matches the given identity
    #[error("Package not found: {0}")]
    NotFound(String),

    /// The identity is under-specified and matches several packages
    #[error("Ambiguous package {selector}: candidates are {}", .candidates.join(", "))]
    AmbiguousMatch {
        selector: String,
        candidates: Vec<String>,
    },

    /// A build node's backend execution failed
    #[error("Build of {id} failed: {reason}")]
    BuildFailure { id: String, reason: String },

    /// A build node was never run because one of its dependencies failed
    #[error("Build of {id} skipped: dependency {failed_dependency} failed")]
    SkippedDueToDependencyFailure {
        id: String,
        failed_dependency: String,
    },

    /// The container/image engine cannot be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Result type alias using Strata's Error type
pub type Result<T> = std::result::Result<T, Error>;
