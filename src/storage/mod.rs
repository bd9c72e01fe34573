//! Bundle storage abstraction.
//!
//! [`Storage`] moves bundle archives between a worker's disk and a shared
//! backend. Identifiers are archive file names (`<digest>.bundle`), so the
//! key is also the integrity check and re-uploading identical bytes is a
//! semantic no-op.
//!
//! ```text
//! ┌────────────┐  upload   ┌────────────────────┐  put/get  ┌──────────────┐
//! │ BundleInfo │ ────────► │ ObjectStoreStorage │ ────────► │ ObjectStore  │
//! │ (archive)  │ ◄──────── │  (Storage impl)    │ ◄──────── │ (backend)    │
//! └────────────┘ download  └────────────────────┘           └──────────────┘
//! ```
//!
//! # Implementations
//!
//! - [`ObjectStoreStorage`]: [`Storage`] over any [`ObjectStore`]
//! - [`LocalObjectStore`]: filesystem bucket with sharded, atomic writes

mod local;
mod object;

pub use local::LocalObjectStore;
pub use object::ObjectStoreStorage;

use crate::bundle::BundleInfo;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Storage identifier: the archive file name.
pub type StorageId = String;

// =============================================================================
// Storage Trait
// =============================================================================

/// Uploads and downloads bundle archives.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Bucket served by this storage; job URIs must name it as their
    /// authority.
    fn bucket(&self) -> &str;

    /// Transfers the archive to the backend and returns its identifier.
    async fn upload(&self, bundle: &BundleInfo) -> Result<StorageId>;

    /// Fetches `identifier` to `destination` and loads it.
    ///
    /// If `destination` is an existing directory the archive is written as
    /// `<destination>/<identifier>`; otherwise `destination` is the exact
    /// file path. Fails if the identifier is unknown or the archive has no
    /// run configuration.
    async fn download(&self, identifier: &str, destination: &Path) -> Result<BundleInfo>;
}

// =============================================================================
// Object Store Backend
// =============================================================================

/// Key/value object store holding whole files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name, used as the authority of object URIs.
    fn bucket(&self) -> &str;

    /// Stores the file at `source` under `key`.
    async fn put_object(&self, key: &str, source: &Path) -> Result<()>;

    /// Writes the object `key` to `destination`, returning its size.
    async fn get_object(&self, key: &str, destination: &Path) -> Result<u64>;

    /// Checks whether `key` exists.
    async fn has_object(&self, key: &str) -> Result<bool>;
}
