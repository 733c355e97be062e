// src/compiler/backend.rs

//! Build backend abstraction
//!
//! A backend materializes an isolated environment, runs a recipe's build
//! steps, and emits a filesystem layer. Two engine-backed variants ship:
//! [`DockerBackend`] (container engine, daemon-based) and [`ImgBackend`]
//! (rootless image builder). The compiler treats them identically; the only
//! behavioral difference surfacing in the core is whether extraction
//! preserves ownership metadata, which needs elevated rights.

use crate::error::{Error, Result};
use crate::package::PackageId;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Everything a backend needs to run one isolated build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub id: PackageId,
    /// Seed image the environment starts from
    pub image: String,
    pub steps: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Content fingerprint; also tags the intermediate image
    pub fingerprint: String,
    /// Scratch directory the backend may write build files into
    pub workdir: PathBuf,
    /// Preserve ownership/permission metadata in the emitted layer
    pub privileged: bool,
}

impl BuildRequest {
    /// Image tag for the intermediate build image
    pub fn tag(&self) -> String {
        format!("strata/{}", &self.fingerprint[..12.min(self.fingerprint.len())])
    }
}

/// Capability interface for isolated build execution
pub trait Backend: Send + Sync {
    /// Run the request's steps in an isolated environment and emit the
    /// resulting filesystem layer as a tar file; returns the layer path
    fn build_image(&self, request: &BuildRequest) -> Result<PathBuf>;

    /// Unpack a filesystem layer (tar or gzipped tar) into `destination`
    ///
    /// `privileged` preserves ownership and permission metadata, which
    /// requires elevated rights; unprivileged is the default-safe path.
    fn extract_rootfs(&self, layer: &Path, destination: &Path, privileged: bool) -> Result<()>;

    /// Release backend-side resources (intermediate image tags)
    fn clean(&self, resources: &[String]) -> Result<()>;
}

/// Which backend variant to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Docker,
    Img,
}

impl BackendKind {
    pub fn backend(&self) -> Box<dyn Backend> {
        match self {
            BackendKind::Docker => Box::new(DockerBackend::new()),
            BackendKind::Img => Box::new(ImgBackend::new()),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(BackendKind::Docker),
            "img" => Ok(BackendKind::Img),
            _ => Err(Error::Configuration(format!(
                "unknown backend '{}' (available: docker, img)",
                s
            ))),
        }
    }
}

/// Render the request as a Dockerfile in its scratch directory
fn write_build_file(request: &BuildRequest) -> Result<PathBuf> {
    let mut contents = format!("FROM {}\n", request.image);
    for (key, value) in &request.env {
        contents.push_str(&format!("ENV {}={}\n", key, value));
    }
    for step in &request.steps {
        contents.push_str(&format!("RUN {}\n", step));
    }

    let path = request.workdir.join("Dockerfile");
    let mut file = File::create(&path)?;
    file.write_all(contents.as_bytes())?;
    debug!("Build file for {} written to {}", request.id, path.display());
    Ok(path)
}

/// Run an engine command, mapping a missing binary to `BackendUnavailable`
/// and a non-zero exit to `BuildFailure`
fn run_engine(engine: &str, args: &[&str], id: &PackageId) -> Result<()> {
    debug!("Running: {} {}", engine, args.join(" "));
    let output = Command::new(engine).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::BackendUnavailable(format!("{} binary not found in PATH", engine))
        } else {
            Error::BackendUnavailable(format!("{} could not be executed: {}", engine, e))
        }
    })?;

    if !output.status.success() {
        return Err(Error::BuildFailure {
            id: id.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Shared tar unpacking for both variants
fn unpack_layer(layer: &Path, destination: &Path, privileged: bool) -> Result<()> {
    std::fs::create_dir_all(destination)?;
    let file = File::open(layer)?;

    let gzipped = layer
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if gzipped {
        apply_archive(tar::Archive::new(GzDecoder::new(file)), destination, privileged)
    } else {
        apply_archive(tar::Archive::new(file), destination, privileged)
    }
}

fn apply_archive<R: std::io::Read>(
    mut archive: tar::Archive<R>,
    destination: &Path,
    privileged: bool,
) -> Result<()> {
    archive.set_preserve_permissions(privileged);
    archive.set_preserve_ownerships(privileged);
    archive.unpack(destination)?;
    Ok(())
}

/// Container-engine-backed variant
///
/// Builds with `docker build`, then flattens the image via create/export so
/// the layer is a plain rootfs tar.
pub struct DockerBackend {
    engine: String,
}

impl DockerBackend {
    pub fn new() -> Self {
        Self {
            engine: "docker".to_string(),
        }
    }
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for DockerBackend {
    fn build_image(&self, request: &BuildRequest) -> Result<PathBuf> {
        write_build_file(request)?;
        let tag = request.tag();
        let context = request.workdir.to_string_lossy().to_string();
        info!("Building {} with {} as {}", request.id, self.engine, tag);

        run_engine(&self.engine, &["build", "-t", &tag, &context], &request.id)?;

        // Flatten to a rootfs tar: create a stopped container and export it.
        let cid_file = request.workdir.join("container.id");
        let cid_arg = cid_file.to_string_lossy().to_string();
        run_engine(
            &self.engine,
            &["create", "--cidfile", &cid_arg, &tag],
            &request.id,
        )?;
        let cid = std::fs::read_to_string(&cid_file)?.trim().to_string();

        let layer = request.workdir.join("layer.tar");
        let layer_arg = layer.to_string_lossy().to_string();
        let export = run_engine(&self.engine, &["export", "-o", &layer_arg, &cid], &request.id);
        if let Err(e) = run_engine(&self.engine, &["rm", &cid], &request.id) {
            warn!("Could not remove build container {}: {}", cid, e);
        }
        export?;

        Ok(layer)
    }

    fn extract_rootfs(&self, layer: &Path, destination: &Path, privileged: bool) -> Result<()> {
        unpack_layer(layer, destination, privileged)
    }

    fn clean(&self, resources: &[String]) -> Result<()> {
        for tag in resources {
            if let Err(e) = Command::new(&self.engine).args(["rmi", tag]).output() {
                warn!("Could not remove image {}: {}", tag, e);
            }
        }
        Ok(())
    }
}

/// Rootless image-builder variant
///
/// `img` builds and saves without a daemon or elevated rights; the saved
/// image tar is the emitted layer.
pub struct ImgBackend {
    engine: String,
}

impl ImgBackend {
    pub fn new() -> Self {
        Self {
            engine: "img".to_string(),
        }
    }
}

impl Default for ImgBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ImgBackend {
    fn build_image(&self, request: &BuildRequest) -> Result<PathBuf> {
        write_build_file(request)?;
        let tag = request.tag();
        let context = request.workdir.to_string_lossy().to_string();
        info!("Building {} with {} as {}", request.id, self.engine, tag);

        run_engine(&self.engine, &["build", "-t", &tag, &context], &request.id)?;

        let layer = request.workdir.join("layer.tar");
        let layer_arg = layer.to_string_lossy().to_string();
        run_engine(&self.engine, &["save", "-o", &layer_arg, &tag], &request.id)?;

        Ok(layer)
    }

    fn extract_rootfs(&self, layer: &Path, destination: &Path, privileged: bool) -> Result<()> {
        unpack_layer(layer, destination, privileged)
    }

    fn clean(&self, resources: &[String]) -> Result<()> {
        for tag in resources {
            if let Err(e) = Command::new(&self.engine).args(["rm", tag]).output() {
                warn!("Could not remove image {}: {}", tag, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn request(dir: &Path) -> BuildRequest {
        BuildRequest {
            id: PackageId::new("app", "foo", Version::parse("1.0").unwrap()),
            image: "alpine:3.20".to_string(),
            steps: vec!["make".to_string(), "make install".to_string()],
            env: [("CFLAGS".to_string(), "-O2".to_string())].into(),
            fingerprint: "abcdef0123456789".to_string(),
            workdir: dir.to_path_buf(),
            privileged: false,
        }
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("docker".parse::<BackendKind>().unwrap(), BackendKind::Docker);
        assert_eq!("img".parse::<BackendKind>().unwrap(), BackendKind::Img);
        assert!("podman".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_build_file_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_build_file(&request(dir.path())).unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("FROM alpine:3.20\n"));
        assert!(contents.contains("ENV CFLAGS=-O2\n"));
        assert!(contents.contains("RUN make\n"));
        assert!(contents.contains("RUN make install\n"));
    }

    #[test]
    fn test_request_tag_truncates_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(request(dir.path()).tag(), "strata/abcdef012345");
    }

    #[test]
    fn test_extract_plain_tar() {
        let dir = tempfile::tempdir().unwrap();
        let layer = dir.path().join("layer.tar");

        let mut builder = tar::Builder::new(File::create(&layer).unwrap());
        let mut header = tar::Header::new_gnu();
        header.set_path("usr/bin/foo").unwrap();
        header.set_size(5);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append(&header, "hello".as_bytes()).unwrap();
        builder.finish().unwrap();

        let dest = dir.path().join("rootfs");
        DockerBackend::new()
            .extract_rootfs(&layer, &dest, false)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("usr/bin/foo")).unwrap(),
            "hello"
        );
    }
}
