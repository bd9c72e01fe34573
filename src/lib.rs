//! # bundlerun
//!
//! **Content-Addressed Job Bundles on Pluggable Container Engines**
//!
//! A bundle is a directory plus a `bundlerun.toml` run configuration. This
//! crate packs bundles into content-addressed archives, stores them in an
//! object store, queues jobs that reference them, and runs those jobs on
//! workers that build and execute each bundle with a container engine.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            bundlerun                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  submit:  directory ──create_bundle──► <sha256>.bundle              │
//! │                          │                                          │
//! │                          ├──Storage::upload──► s3://bucket/<id>     │
//! │                          └──JobQueue::submit_new_request(Job)       │
//! │                                                                     │
//! │  worker:  ┌──────────────────────────────────────────────────────┐  │
//! │           │ get_open_request → download → build → execute        │  │
//! │           │        → cleanup (always) → mark_completed (opt.)    │  │
//! │           └──────────────────────────────────────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                         Collaborators                               │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │     Storage      │  │     JobQueue     │  │      Engine      │   │
//! │  │ ObjectStoreStor. │  │ MessageJobQueue  │  │   DockerEngine   │   │
//! │  │ LocalObjectStore │  │   SpoolQueue     │  │    DockerCli     │   │
//! │  └──────────────────┘  └──────────────────┘  └──────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! Jobs are removed from the queue when received, before they run. A
//! failed or interrupted job is not retried (at-most-once).
//!
//! # Security Model
//!
//! - **Integrity**: archive names are their SHA-256; see
//!   [`bundle::BundleInfo::verify`].
//! - **Path Traversal Protection**: archive extraction, volume keys and
//!   object keys reject absolute paths and `..` components.
//! - **Size Limits**: configs ([`MAX_CONFIG_SIZE`]), archives
//!   ([`MAX_ARCHIVE_SIZE`]) and captured output ([`MAX_OUTPUT_SIZE`]) are
//!   bounded.
//! - **Timeouts**: every container command is bounded.
//!
//! # Example
//!
//! ```rust,ignore
//! use bundlerun::{Job, JobQueue, Storage, WorkerSettings, create_bundle};
//!
//! #[tokio::main]
//! async fn main() -> bundlerun::Result<()> {
//!     let settings = WorkerSettings::from_env()?;
//!     let storage = settings.local_storage()?;
//!     let queue = settings.spool_job_queue()?;
//!
//!     let bundle = create_bundle("./my-job")?;
//!     let id = storage.upload(&bundle).await?;
//!     queue.submit_new_request(&Job::new(storage.uri_for(&id))?).await?;
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod queue;
pub mod settings;
pub mod storage;
pub mod uri;
pub mod worker;

// Re-exports
pub use bundle::{BundleInfo, create_bundle, create_bundle_in};
pub use config::{BundleConfig, CommandSpec, VolumeMode, VolumeSpec};
pub use constants::*;
pub use engine::{
    Artifact, ContainerBackend, DockerCli, DockerEngine, Engine, ExecutionOutput, Mount,
    RuntimeKind, new_engine,
};
pub use error::{Error, Result};
pub use queue::{Job, JobQueue, MessageBackend, MessageJobQueue, ReceivedMessage, SpoolQueue};
pub use settings::WorkerSettings;
pub use storage::{LocalObjectStore, ObjectStore, ObjectStoreStorage, Storage, StorageId};
pub use uri::ObjectUri;
pub use worker::{CycleOutcome, ShutdownHandle, Worker, WorkerStats};
