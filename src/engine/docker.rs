//! Docker engine: bundles become images, artifacts become `docker run`s.
//!
//! ## Build
//!
//! The whole archive is extracted to a scratch directory, which becomes the
//! build context. The image is tagged `bundlerun.runner/<name>` and labelled
//! with the bundle digest.
//!
//! ## Execute
//!
//! Volume keys are resolved against a fresh extraction of just the
//! volume-referenced paths:
//!
//! ```text
//! key exists in bundle?  ──yes──►  bind mount <scratch>/<key>
//!          │                      (symlinks must resolve inside <scratch>)
//!          │ no
//!          ▼
//! single bare name?      ──yes──►  named volume <key> (created)
//!          │ no
//!          ▼
//!   MissingVolumeFile
//! ```
//!
//! The scratch directory lives until the container exits.

use super::backend::{BuildRequest, ContainerBackend, Mount, RunRequest};
use super::{Artifact, Engine, ExecutionOutput};
use crate::bundle::{BundleInfo, extract, extract_volume_files};
use crate::config::BundleConfig;
use crate::constants::{
    CONTAINER_NAME_PREFIX, DIGEST_LABEL, IMAGE_TAG_PREFIX, validate_volume_key,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// [`Engine`] over a [`ContainerBackend`].
#[derive(Debug, Clone)]
pub struct DockerEngine<B> {
    backend: B,
    scratch_root: Option<PathBuf>,
}

impl<B: ContainerBackend> DockerEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            scratch_root: None,
        }
    }

    /// Creates scratch directories under `dir` instead of the system temp dir.
    pub fn with_scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(dir.into());
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let dir = match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                TempDir::new_in(root)?
            }
            None => TempDir::new()?,
        };
        Ok(dir)
    }
}

#[async_trait]
impl<B: ContainerBackend> Engine for DockerEngine<B> {
    fn name(&self) -> &str {
        "docker"
    }

    async fn build(&self, bundle: &BundleInfo) -> Result<Artifact> {
        let context = self.scratch_dir()?;
        extract(bundle, context.path())?;

        let request = BuildRequest {
            context_dir: context.path().to_path_buf(),
            tag: image_tag(bundle.config().name()),
            labels: BTreeMap::from([(DIGEST_LABEL.to_string(), bundle.digest())]),
        };

        info!(
            "Building '{}' as {} with {}",
            bundle.config().name(),
            request.tag,
            self.backend.name()
        );
        let image = self.backend.build_image(&request).await?;
        debug!("Built image {} for '{}'", image.id, bundle.config().name());

        Ok(Artifact::new(image.id.clone(), bundle.clone())
            .with_metadata("tags", serde_json::json!(image.tags))
            .with_metadata("labels", serde_json::json!(image.labels))
            .with_metadata("short_id", serde_json::json!(image.short_id())))
    }

    async fn execute(&self, artifact: &Artifact) -> Result<ExecutionOutput> {
        let scratch = self.scratch_dir()?;
        extract_volume_files(&artifact.bundle, scratch.path())?;

        // Bind sources must be absolute.
        let root = tokio::fs::canonicalize(scratch.path()).await?;
        let mounts = resolve_mounts(artifact.bundle.config(), &root)?;

        for mount in &mounts {
            if let Mount::Volume { name, .. } = mount {
                debug!("Provisioning volume '{}'", name);
                self.backend.create_volume(name).await?;
            }
        }

        let request = run_request(&artifact.id, artifact.bundle.config(), mounts);
        info!(
            "Running '{}' ({}) with {} mounts",
            artifact.bundle.config().name(),
            artifact.id,
            request.mounts.len()
        );

        let output = self.backend.run(&request).await?;
        if !output.is_success() {
            return Err(Error::RunFailed {
                artifact: artifact.id.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr_lossy().trim().to_string(),
            });
        }

        info!(
            "'{}' finished ({} bytes stdout)",
            artifact.bundle.config().name(),
            output.stdout.len()
        );
        Ok(output)
    }
}

/// Resolves a config's volumes against an extraction of its files.
///
/// Existing paths become bind mounts, bare names become named volumes, and
/// anything else fails with [`Error::MissingVolumeFile`]. Bind sources are
/// canonical paths inside `extracted_root`.
pub fn resolve_mounts(config: &BundleConfig, extracted_root: &Path) -> Result<Vec<Mount>> {
    let mut mounts = Vec::with_capacity(config.volumes().len());

    for (key, spec) in config.volumes() {
        validate_volume_key(key)?;

        let source = extracted_root.join(key);
        let parts: Vec<_> = Path::new(key)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();

        if std::fs::symlink_metadata(&source).is_ok() {
            mounts.push(Mount::Bind {
                source: contained_source(key, &source, extracted_root)?,
                target: spec.bind.clone(),
                mode: spec.mode,
            });
        } else if let [Component::Normal(name)] = parts.as_slice() {
            mounts.push(Mount::Volume {
                name: name.to_string_lossy().into_owned(),
                target: spec.bind.clone(),
                mode: spec.mode,
            });
        } else {
            return Err(Error::MissingVolumeFile { path: key.clone() });
        }
    }

    Ok(mounts)
}

/// Resolves symlinks in a bind source and requires the result to stay
/// under `extracted_root`.
///
/// # Security
///
/// Docker resolves bind sources on the host, so a bundled `data.txt ->
/// /etc/shadow` would otherwise mount a host file. Dangling links fail with
/// [`Error::MissingVolumeFile`], links leaving the root with
/// [`Error::PathTraversal`].
fn contained_source(key: &str, source: &Path, extracted_root: &Path) -> Result<PathBuf> {
    let root = extracted_root.canonicalize()?;
    let resolved = match source.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingVolumeFile {
                path: key.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if !resolved.starts_with(&root) {
        warn!(
            "Volume '{}' resolves outside the bundle to {}",
            key,
            resolved.display()
        );
        return Err(Error::PathTraversal {
            path: key.to_string(),
        });
    }
    Ok(resolved)
}

/// Maps `entrypoint`/`cmd` onto docker's single-entrypoint model: the first
/// entrypoint word overrides the image entrypoint and the rest lead the
/// arguments.
fn run_request(image: &str, config: &BundleConfig, mounts: Vec<Mount>) -> RunRequest {
    let mut args = Vec::new();
    let entrypoint = config.entrypoint().map(|ep| {
        let mut words = ep.to_args().into_iter();
        let first = words.next().unwrap_or_default();
        args.extend(words);
        first
    });
    if let Some(cmd) = config.cmd() {
        args.extend(cmd.to_args());
    }

    RunRequest {
        image: image.to_string(),
        name: Some(container_name(config.name())),
        entrypoint,
        args,
        mounts,
    }
}

/// `bundlerun.runner/<name>` with the name reduced to tag-safe characters.
pub fn image_tag(name: &str) -> String {
    format!("{}/{}", IMAGE_TAG_PREFIX, sanitize_name(name))
}

/// Unique `bundlerun-<name>-<uuid>` container name for one run.
pub fn container_name(name: &str) -> String {
    format!(
        "{}-{}-{}",
        CONTAINER_NAME_PREFIX,
        sanitize_name(name),
        uuid::Uuid::now_v7().simple()
    )
}

/// Lowercases `name` and maps characters docker rejects to `-`.
fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if sanitized.is_empty() {
        "bundle".to_string()
    } else {
        sanitized.to_string()
    }
}
