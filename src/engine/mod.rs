//! Execution engines.
//!
//! An [`Engine`] turns a [`BundleInfo`] into an [`Artifact`] (for docker, a
//! built image) and then runs that artifact under the bundle's config.
//! Neither step persists state between calls; everything an execution needs
//! is carried by the artifact.
//!
//! ```text
//! BundleInfo ──build──► Artifact ──execute──► ExecutionOutput
//! ```
//!
//! # Implementations
//!
//! - [`DockerEngine`]: images and containers via a [`ContainerBackend`]
//!   ([`DockerCli`] in production)

mod backend;
mod docker;

pub use backend::{
    BuildRequest, ContainerBackend, DockerCli, ImageInfo, Mount, RunRequest, docker_run_args,
};
pub use docker::{DockerEngine, container_name, image_tag, resolve_mounts};

use crate::bundle::BundleInfo;
use crate::error::{Error, Result};
use crate::settings::WorkerSettings;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Artifact
// =============================================================================

/// Engine-specific build result.
///
/// `id` is opaque outside the engine that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: String,
    /// Bundle the artifact was built from.
    pub bundle: BundleInfo,
    /// Engine-specific descriptors (tags, labels, short ids).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Artifact {
    pub fn new(id: impl Into<String>, bundle: BundleInfo) -> Self {
        Self {
            id: id.into(),
            bundle,
            metadata: BTreeMap::new(),
        }
    }

    /// Returns a copy with one metadata entry added.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// =============================================================================
// Execution Output
// =============================================================================

/// Exit status and captured streams of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionOutput {
    /// Returns true if the exit code is 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

// =============================================================================
// Engine Trait
// =============================================================================

/// Builds bundles into artifacts and runs them.
///
/// # Errors
///
/// Backend failures are returned unchanged; engines do not retry.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Builds an executable artifact from a bundle.
    async fn build(&self, bundle: &BundleInfo) -> Result<Artifact>;

    /// Resolves volumes and runs the artifact with the bundle's command.
    async fn execute(&self, artifact: &Artifact) -> Result<ExecutionOutput>;
}

// =============================================================================
// Engine Selection
// =============================================================================

/// Available engine implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RuntimeKind {
    #[default]
    Docker,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            other => Err(Error::InvalidValue {
                key: "engine".to_string(),
                value: other.to_string(),
                reason: "expected one of: docker".to_string(),
            }),
        }
    }
}

/// Creates the engine for `kind` configured from `settings`.
pub fn new_engine(kind: RuntimeKind, settings: &WorkerSettings) -> Box<dyn Engine> {
    match kind {
        RuntimeKind::Docker => {
            let mut engine = DockerEngine::new(DockerCli::new(&settings.docker_binary));
            if let Some(workdir) = &settings.workdir {
                engine = engine.with_scratch_root(workdir);
            }
            Box::new(engine)
        }
    }
}
