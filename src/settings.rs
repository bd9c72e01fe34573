//! Worker and CLI settings.
//!
//! Settings come from the environment with a default for every field:
//!
//! | Variable                          | Field             | Default          |
//! |-----------------------------------|-------------------|------------------|
//! | `BUNDLERUN_ROOT`                  | `root`            | `~/.bundlerun`   |
//! | `BUNDLERUN_WORKDIR`               | `workdir`         | system temp dir  |
//! | `BUNDLERUN_BUCKET`                | `bucket`          | `bundles`        |
//! | `BUNDLERUN_RECEIVE_TIMEOUT_SECS`  | `receive_timeout` | 20               |
//! | `BUNDLERUN_OUTPUT_BASE`           | `output_base`     | unset            |
//! | `BUNDLERUN_DOCKER`                | `docker_binary`   | `docker`         |
//!
//! The state root holds the local object store (`objects/`) and the spool
//! queues (`queues/`).

use crate::constants::{
    COMPLETED_CHANNEL, DEFAULT_BUCKET, DEFAULT_DOCKER_BINARY, DEFAULT_RECEIVE_TIMEOUT,
    OBJECT_STORE_DIR, OPEN_CHANNEL, QUEUE_DIR,
};
use crate::error::{Error, Result};
use crate::queue::{MessageJobQueue, SpoolQueue};
use crate::storage::{LocalObjectStore, ObjectStoreStorage};
use crate::uri::ObjectUri;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_ROOT: &str = "BUNDLERUN_ROOT";
pub const ENV_WORKDIR: &str = "BUNDLERUN_WORKDIR";
pub const ENV_BUCKET: &str = "BUNDLERUN_BUCKET";
pub const ENV_RECEIVE_TIMEOUT: &str = "BUNDLERUN_RECEIVE_TIMEOUT_SECS";
pub const ENV_OUTPUT_BASE: &str = "BUNDLERUN_OUTPUT_BASE";
pub const ENV_DOCKER: &str = "BUNDLERUN_DOCKER";

/// Resolved settings for a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// State root for the local object store and spool queues.
    pub root: PathBuf,
    /// Parent directory for per-job scratch directories.
    pub workdir: Option<PathBuf>,
    /// Object-store bucket holding bundle archives.
    pub bucket: String,
    /// Wait per `get_open_request` call.
    pub receive_timeout: Duration,
    /// When set, successful jobs are published as completed under
    /// `<output_base>/<job id>`.
    pub output_base: Option<ObjectUri>,
    /// Container engine binary.
    pub docker_binary: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            workdir: None,
            bucket: DEFAULT_BUCKET.to_string(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            output_base: None,
            docker_binary: DEFAULT_DOCKER_BINARY.to_string(),
        }
    }
}

impl WorkerSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(root) = get(ENV_ROOT) {
            settings.root = PathBuf::from(root);
        }
        settings.workdir = get(ENV_WORKDIR).map(PathBuf::from);
        if let Some(bucket) = get(ENV_BUCKET) {
            settings.bucket = bucket;
        }
        if let Some(secs) = get(ENV_RECEIVE_TIMEOUT) {
            let parsed = secs.trim().parse::<u64>().map_err(|e| Error::InvalidValue {
                key: ENV_RECEIVE_TIMEOUT.to_string(),
                value: secs.clone(),
                reason: e.to_string(),
            })?;
            settings.receive_timeout = Duration::from_secs(parsed);
        }
        if let Some(base) = get(ENV_OUTPUT_BASE) {
            let invalid = |reason: String| Error::InvalidValue {
                key: ENV_OUTPUT_BASE.to_string(),
                value: base.clone(),
                reason,
            };
            let uri = ObjectUri::parse(&base).map_err(|e| invalid(e.to_string()))?;
            uri.ensure_supported().map_err(|e| invalid(e.to_string()))?;
            settings.output_base = Some(uri);
        }
        if let Some(docker) = get(ENV_DOCKER) {
            settings.docker_binary = docker;
        }

        Ok(settings)
    }

    /// `~/.bundlerun`, or `./.bundlerun` without a home directory.
    pub fn default_root() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            home.join(".bundlerun")
        } else {
            PathBuf::from(".bundlerun")
        }
    }

    pub fn object_store_dir(&self) -> PathBuf {
        self.root.join(OBJECT_STORE_DIR)
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join(QUEUE_DIR)
    }

    /// Storage over the local bucket under the state root.
    pub fn local_storage(&self) -> Result<ObjectStoreStorage<LocalObjectStore>> {
        let store = LocalObjectStore::new(self.object_store_dir(), &self.bucket)?;
        Ok(ObjectStoreStorage::new(store))
    }

    /// Spool channel `name` under the state root.
    pub fn spool_channel(&self, name: &str) -> Result<SpoolQueue> {
        SpoolQueue::new(self.queue_dir(), name)
    }

    /// Job queue over the open and completed spool channels.
    pub fn spool_job_queue(&self) -> Result<MessageJobQueue<SpoolQueue>> {
        Ok(MessageJobQueue::new(
            self.spool_channel(OPEN_CHANNEL)?,
            self.spool_channel(COMPLETED_CHANNEL)?,
        ))
    }
}
