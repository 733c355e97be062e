// src/compiler/artifact.rs

//! Content-addressed build artifacts
//!
//! An artifact is the durable output of one successful build: a gzipped
//! layer tarball named after the package plus a truncated fingerprint, and
//! a JSON metadata sidecar keyed by the full fingerprint. The sidecar is
//! the cache index: a later build of an identical spec finds it with a
//! single path probe and reuses the artifact without invoking a backend.

use crate::error::{Error, Result};
use crate::package::PackageId;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Durable record of one successful build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Package identity this artifact was built from
    pub id: PackageId,
    /// Compressed layer tarball
    pub path: PathBuf,
    /// Content fingerprint of the originating spec
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Sidecar path for a fingerprint within an output directory
    fn metadata_path(output_dir: &Path, fingerprint: &str) -> PathBuf {
        output_dir.join(format!("{}.metadata.json", fingerprint))
    }

    /// Probe the cache: an existing sidecar whose layer file is still on
    /// disk short-circuits the build
    pub fn load_cached(output_dir: &Path, fingerprint: &str) -> Result<Option<Artifact>> {
        let sidecar = Self::metadata_path(output_dir, fingerprint);
        if !sidecar.exists() {
            return Ok(None);
        }
        let artifact: Artifact = serde_json::from_reader(File::open(&sidecar)?)?;
        if !artifact.path.exists() {
            debug!(
                "Stale metadata for {}: layer {} missing",
                fingerprint,
                artifact.path.display()
            );
            return Ok(None);
        }
        Ok(Some(artifact))
    }

    /// Compress `layer` into the output directory and record the sidecar
    ///
    /// Artifact writes are append-only by fingerprint; an existing layer for
    /// the same fingerprint is never overwritten in place.
    pub fn package(
        id: &PackageId,
        fingerprint: &str,
        layer: &Path,
        output_dir: &Path,
    ) -> Result<Artifact> {
        std::fs::create_dir_all(output_dir)?;

        let short = &fingerprint[..12.min(fingerprint.len())];
        let file_name = format!("{}-{}-{}.tar.gz", id.name, id.version, short);
        let path = output_dir.join(file_name);

        let mut reader = File::open(layer).map_err(|e| {
            Error::BuildFailure {
                id: id.to_string(),
                reason: format!("layer {} unreadable: {}", layer.display(), e),
            }
        })?;
        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        std::io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?;

        let artifact = Artifact {
            id: id.clone(),
            path,
            fingerprint: fingerprint.to_string(),
            created_at: Utc::now(),
        };
        serde_json::to_writer_pretty(
            File::create(Self::metadata_path(output_dir, fingerprint))?,
            &artifact,
        )?;

        info!("Artifact for {} written to {}", id, artifact.path.display());
        Ok(artifact)
    }
}
