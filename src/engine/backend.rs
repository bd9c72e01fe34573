//! Container backend primitives and the `docker` CLI implementation.
//!
//! [`ContainerBackend`] is the narrow surface [`super::DockerEngine`] needs
//! from a container daemon: build an image from a directory, create a named
//! volume, run an image. [`DockerCli`] provides it by shelling out to the
//! `docker` binary.
//!
//! ## Timeouts and Output Bounds
//!
//! | Command          | Timeout                  |
//! |------------------|--------------------------|
//! | `build`          | [`BUILD_TIMEOUT`]        |
//! | `volume create`  | [`CONTROL_TIMEOUT`]      |
//! | `run`            | [`RUN_TIMEOUT`]          |
//!
//! At most [`MAX_OUTPUT_SIZE`] bytes per stream are kept in memory; the
//! remainder is read and discarded so the child never blocks on a full pipe.
//! Child processes are killed when a timeout drops them. Killing the CLI
//! client does not stop a container, so a named run that times out is
//! followed by `docker rm -f <name>`.

use super::ExecutionOutput;
use crate::config::VolumeMode;
use crate::constants::{BUILD_TIMEOUT, CONTROL_TIMEOUT, MAX_OUTPUT_SIZE, RUN_TIMEOUT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

// =============================================================================
// Requests
// =============================================================================

/// Image build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Directory used as the build context.
    pub context_dir: PathBuf,
    /// Tag applied to the image.
    pub tag: String,
    /// Labels applied to the image.
    pub labels: BTreeMap<String, String>,
}

/// A built image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Backend-assigned image id (e.g. `sha256:...`).
    pub id: String,
    pub tags: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl ImageInfo {
    /// First 12 hex characters of the id, without the algorithm prefix.
    pub fn short_id(&self) -> String {
        let hex = self.id.split_once(':').map_or(self.id.as_str(), |(_, h)| h);
        hex.chars().take(12).collect()
    }
}

/// A resolved container mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mount {
    /// Host path from the extracted bundle.
    Bind {
        source: PathBuf,
        target: String,
        mode: VolumeMode,
    },
    /// Engine-managed named volume.
    Volume {
        name: String,
        target: String,
        mode: VolumeMode,
    },
}

impl Mount {
    pub fn target(&self) -> &str {
        match self {
            Self::Bind { target, .. } | Self::Volume { target, .. } => target,
        }
    }

    pub fn mode(&self) -> VolumeMode {
        match self {
            Self::Bind { mode, .. } | Self::Volume { mode, .. } => *mode,
        }
    }

    /// `source:target:mode` form accepted by `docker run --volume`.
    pub fn to_volume_arg(&self) -> String {
        let source = match self {
            Self::Bind { source, .. } => source.to_string_lossy().into_owned(),
            Self::Volume { name, .. } => name.clone(),
        };
        format!("{}:{}:{}", source, self.target(), self.mode())
    }
}

/// Container run request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunRequest {
    /// Image id or tag.
    pub image: String,
    /// Container name, used to force-remove the container on timeout.
    pub name: Option<String>,
    /// Entrypoint override. `Some("")` clears the image entrypoint.
    pub entrypoint: Option<String>,
    /// Arguments after the image.
    pub args: Vec<String>,
    pub mounts: Vec<Mount>,
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Container daemon operations used by the docker engine.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Builds an image from `request.context_dir`.
    async fn build_image(&self, request: &BuildRequest) -> Result<ImageInfo>;

    /// Creates a named volume. Existing volumes are reused.
    async fn create_volume(&self, name: &str) -> Result<()>;

    /// Runs an image to completion, capturing output.
    ///
    /// A non-zero exit is reported in the output, not as an error.
    async fn run(&self, request: &RunRequest) -> Result<ExecutionOutput>;
}

// =============================================================================
// Docker CLI
// =============================================================================

/// [`ContainerBackend`] that invokes the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    run_timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            run_timeout: RUN_TIMEOUT,
        }
    }

    /// Overrides [`RUN_TIMEOUT`] for `docker run`.
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Runs `docker <args>` with a timeout, keeping at most
    /// [`MAX_OUTPUT_SIZE`] bytes of each output stream.
    async fn command(
        &self,
        operation: &str,
        args: &[String],
        timeout_dur: Duration,
    ) -> Result<std::process::Output> {
        debug!("Docker command: {} {}", self.binary, args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::backend("docker", operation, e.to_string()))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, stdout, stderr) = timeout(timeout_dur, async {
            tokio::join!(
                child.wait(),
                read_bounded(stdout, MAX_OUTPUT_SIZE),
                read_bounded(stderr, MAX_OUTPUT_SIZE),
            )
        })
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("docker {}", operation),
            duration: timeout_dur,
        })?;

        let status = status.map_err(|e| Error::backend("docker", operation, e.to_string()))?;
        let (stdout, stdout_dropped) =
            stdout.map_err(|e| Error::backend("docker", operation, e.to_string()))?;
        let (stderr, stderr_dropped) =
            stderr.map_err(|e| Error::backend("docker", operation, e.to_string()))?;

        if stdout_dropped > 0 {
            warn!(
                "docker {} stdout truncated to {} bytes ({} discarded)",
                operation, MAX_OUTPUT_SIZE, stdout_dropped
            );
        }
        if stderr_dropped > 0 {
            warn!(
                "docker {} stderr truncated to {} bytes ({} discarded)",
                operation, MAX_OUTPUT_SIZE, stderr_dropped
            );
        }

        Ok(std::process::Output {
            status,
            stdout,
            stderr,
        })
    }

    /// Force-removes a container left behind by a timed-out run.
    async fn remove_container(&self, name: &str) {
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        match self.command("rm", &args, CONTROL_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                debug!("Removed timed-out container {}", name);
            }
            Ok(output) => warn!(
                "Failed to remove container {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

/// Reads up to `limit` bytes, then drains the rest of the stream.
///
/// Returns the kept bytes and the number of bytes discarded.
async fn read_bounded<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> io::Result<(Vec<u8>, u64)> {
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), 0));
    };

    let mut buf = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut buf).await?;
    let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok((buf, dropped))
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_DOCKER_BINARY)
    }
}

#[async_trait]
impl ContainerBackend for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<ImageInfo> {
        let mut args = vec![
            "build".to_string(),
            "--quiet".to_string(),
            "--rm".to_string(),
            "--tag".to_string(),
            request.tag.clone(),
        ];
        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(request.context_dir.to_string_lossy().into_owned());

        let output = self.command("build", &args, BUILD_TIMEOUT).await?;
        if !output.status.success() {
            return Err(Error::BuildFailed {
                name: request.tag.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let id = String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .to_string();
        if id.is_empty() {
            return Err(Error::BuildFailed {
                name: request.tag.clone(),
                reason: "docker build printed no image id".to_string(),
            });
        }

        Ok(ImageInfo {
            id,
            tags: vec![request.tag.clone()],
            labels: request.labels.clone(),
        })
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        let args = vec![
            "volume".to_string(),
            "create".to_string(),
            "--driver".to_string(),
            "local".to_string(),
            name.to_string(),
        ];
        let output = self.command("volume create", &args, CONTROL_TIMEOUT).await?;
        if !output.status.success() {
            return Err(Error::backend(
                "docker",
                "volume create",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(())
    }

    async fn run(&self, request: &RunRequest) -> Result<ExecutionOutput> {
        let args = docker_run_args(request);
        let output = match self.command("run", &args, self.run_timeout).await {
            Ok(output) => output,
            Err(e @ Error::Timeout { .. }) => {
                if let Some(name) = &request.name {
                    self.remove_container(name).await;
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        Ok(ExecutionOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Argument vector for `docker run`.
pub fn docker_run_args(request: &RunRequest) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string()];
    if let Some(name) = &request.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    if let Some(entrypoint) = &request.entrypoint {
        args.push("--entrypoint".to_string());
        args.push(entrypoint.clone());
    }
    for mount in &request.mounts {
        args.push("--volume".to_string());
        args.push(mount.to_volume_arg());
    }
    args.push(request.image.clone());
    args.extend(request.args.iter().cloned());
    args
}
