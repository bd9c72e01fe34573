//! # Worker
//!
//! Runs the job lifecycle, one job at a time:
//!
//! ```text
//!  ┌──────┐  get_open_request   ┌──────────┐  download  ┌─────────────┐
//!  │ idle │ ──────────────────► │ fetching │ ─────────► │ downloading │
//!  └──────┘                     └──────────┘            └─────────────┘
//!     ▲   no job (Idle)              │                         │
//!     └──────────────────────────────┘                         ▼
//!     │                                                  ┌──────────┐
//!     │          ┌─────────────┐      ┌───────────┐      │ building │
//!     └───────── │ cleaning-up │ ◄─── │ executing │ ◄─── └──────────┘
//!                └─────────────┘      └───────────┘
//! ```
//!
//! ## Cleanup
//!
//! Each cycle owns a scratch directory ([`TempDir`]) and the archive
//! downloaded into it. The archive is removed by a drop guard and the
//! directory by `TempDir`'s own drop, so both are gone when
//! [`Worker::execute_next_job`] returns, whether the cycle succeeded,
//! failed, or was cancelled.
//!
//! ## Failure Semantics
//!
//! A failed build or execution ends the cycle with `Err`. The job is not
//! requeued: the queue already removed it on receipt.
//!
//! ## Shutdown
//!
//! [`ShutdownHandle::signal`] is cooperative. It is checked only before a
//! cycle starts; an in-flight build or run finishes first.

use crate::bundle::BundleInfo;
use crate::constants::DEFAULT_RECEIVE_TIMEOUT;
use crate::engine::{Engine, ExecutionOutput};
use crate::error::{Error, Result};
use crate::queue::{Job, JobQueue};
use crate::storage::Storage;
use crate::uri::ObjectUri;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

// =============================================================================
// Shutdown
// =============================================================================

/// Cloneable cooperative shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent.
    pub fn signal(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            info!("Worker shutdown requested");
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Cycle Results
// =============================================================================

/// Result of one successful [`Worker::execute_next_job`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No job arrived within the receive timeout.
    Idle,
    /// A job ran to completion. `job` carries the output URI when the
    /// worker publishes completions.
    Completed { job: Job, output: ExecutionOutput },
}

/// Counters returned by [`Worker::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub idle: u64,
}

/// Deletes the downloaded archive when dropped.
struct ArchiveGuard {
    path: PathBuf,
}

impl ArchiveGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed archive {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove archive {}: {}", self.path.display(), e),
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Pulls jobs from a queue and runs them on an engine.
pub struct Worker {
    engine: Arc<dyn Engine>,
    queue: Arc<dyn JobQueue>,
    storage: Arc<dyn Storage>,
    workdir: Option<PathBuf>,
    receive_timeout: Duration,
    output_base: Option<ObjectUri>,
    shutdown: ShutdownHandle,
}

impl Worker {
    pub fn new(
        engine: Arc<dyn Engine>,
        queue: Arc<dyn JobQueue>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            engine,
            queue,
            storage,
            workdir: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            output_base: None,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Parent directory for per-cycle scratch directories.
    pub fn with_workdir(mut self, workdir: Option<PathBuf>) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Publishes successful jobs as completed under `<base>/<job id>`.
    pub fn with_output_base(mut self, base: Option<ObjectUri>) -> Self {
        self.output_base = base;
        self
    }

    /// Handle that stops [`Worker::run`] between cycles.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Signals shutdown. Does not interrupt an in-flight cycle.
    pub fn shutdown(&self) {
        self.shutdown.signal();
    }

    /// Runs one cycle.
    ///
    /// Returns [`CycleOutcome::Idle`] if no job arrived, and
    /// [`Error::WorkerShutdown`] without touching the queue once shutdown
    /// has been signaled.
    pub async fn execute_next_job(&self) -> Result<CycleOutcome> {
        if self.shutdown.is_signaled() {
            return Err(Error::WorkerShutdown);
        }

        let Some(job) = self.queue.get_open_request(self.receive_timeout).await? else {
            debug!("No open job within {:?}", self.receive_timeout);
            return Ok(CycleOutcome::Idle);
        };
        info!("Processing {}", job);

        let uri = job.bundle_uri();
        if uri.authority() != self.storage.bucket() {
            return Err(Error::BucketMismatch {
                uri: uri.to_uri_string(),
                bucket: self.storage.bucket().to_string(),
            });
        }

        let scratch = self.scratch_dir()?;
        let bundle = self
            .storage
            .download(uri.key(), scratch.path())
            .await?;

        let output = {
            let _archive = ArchiveGuard::new(bundle.archive_path());
            self.build_and_execute(&bundle).await?
        };
        drop(scratch);

        let job = match &self.output_base {
            Some(base) => {
                let completed = job.complete(base.join(job.id()))?;
                self.queue.mark_completed(&completed).await?;
                completed
            }
            None => job,
        };

        info!("Finished {} (exit {})", job, output.exit_code);
        Ok(CycleOutcome::Completed { job, output })
    }

    /// Runs cycles until shutdown, logging failures.
    pub async fn run(&self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!("Worker started with engine '{}'", self.engine.name());

        while !self.shutdown.is_signaled() {
            match self.execute_next_job().await {
                Ok(CycleOutcome::Idle) => stats.idle += 1,
                Ok(CycleOutcome::Completed { .. }) => stats.completed += 1,
                Err(Error::WorkerShutdown) => break,
                Err(e) => {
                    error!("Job cycle failed: {}", e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Worker stopped: {} completed, {} failed, {} idle cycles",
            stats.completed, stats.failed, stats.idle
        );
        stats
    }

    async fn build_and_execute(&self, bundle: &BundleInfo) -> Result<ExecutionOutput> {
        let artifact = self.engine.build(bundle).await?;
        self.engine.execute(&artifact).await
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bundlerun-job-");
        let dir = match &self.workdir {
            Some(workdir) => {
                std::fs::create_dir_all(workdir)?;
                builder.tempdir_in(workdir)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shutdown_handle_is_shared() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_signaled());
        clone.signal();
        clone.signal();
        assert!(handle.is_signaled());
    }

    #[test]
    fn test_archive_guard_removes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("x.bundle");
        std::fs::write(&path, b"data").unwrap();

        drop(ArchiveGuard::new(&path));
        assert!(!path.exists());

        // Already gone is fine.
        drop(ArchiveGuard::new(&path));
    }
}
