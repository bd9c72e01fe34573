//! # Filesystem Object Store
//!
//! A single-bucket object store on local disk, used as the reference
//! [`ObjectStore`] backend and by tests. Several workers on one host can
//! share a bucket directory.
//!
//! ## Storage Model
//!
//! Objects are stored in a two-level directory structure:
//!
//! ```text
//! ~/.bundlerun/objects/
//! └── bundles/                 (bucket)
//!     ├── 3f/
//!     │   └── 3f2a...e1.bundle
//!     └── a0/
//!         └── a09c...77.bundle
//! ```
//!
//! The first two characters of the key form a shard directory to keep
//! directory sizes bounded.
//!
//! ## Security Model
//!
//! Keys are flat names: anything containing a separator, `..`, or a
//! leading `.` is rejected before a path is built, so a key can never
//! address a file outside the bucket.
//!
//! Writes go to a uniquely named temp file beside the target and are then
//! renamed into place, so readers never observe a partial object.

use super::ObjectStore;
use crate::constants::MAX_ARCHIVE_SIZE;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Object store backed by a directory.
///
/// ## Thread Safety
///
/// Every operation is independent; concurrent writers of the same key race
/// on the final rename and the last writer wins. Keys are content digests,
/// so both writers carry identical bytes.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    /// Bucket directory.
    base_dir: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    /// Opens (creating if needed) `root/<bucket>`.
    pub fn new(root: impl AsRef<Path>, bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        validate_key(&bucket)?;
        let base_dir = root.as_ref().join(&bucket);
        std::fs::create_dir_all(&base_dir).map_err(|e| {
            Error::backend("local object store", "init", format!("{}: {}", base_dir.display(), e))
        })?;

        info!("Object store bucket '{}' at: {}", bucket, base_dir.display());

        Ok(Self { base_dir, bucket })
    }

    /// Returns the bucket directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the on-disk path of `key`.
    ///
    /// # Security
    ///
    /// The key is validated before joining; see the module docs.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        let shard: String = key.chars().take(2).collect();
        Ok(self.base_dir.join(shard).join(key))
    }

    /// Removes an object. Missing objects are ignored.
    pub async fn remove_object(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::backend("local object store", "delete", e.to_string())),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, source: &Path) -> Result<()> {
        let path = self.object_path(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("local object store", "put", e.to_string()))?;
        }

        // Unique temp name per writer; the rename is the commit point.
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        let size = fs::copy(source, &temp_path).await.map_err(|e| {
            Error::backend(
                "local object store",
                "put",
                format!("{}: {}", source.display(), e),
            )
        })?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::backend("local object store", "put", e.to_string()));
        }

        debug!("Stored object {}/{} ({} bytes)", self.bucket, key, size);
        Ok(())
    }

    async fn get_object(&self, key: &str, destination: &Path) -> Result<u64> {
        let path = self.object_path(key)?;

        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ObjectNotFound {
                    key: format!("{}/{}", self.bucket, key),
                });
            }
            Err(e) => return Err(Error::backend("local object store", "get", e.to_string())),
        };

        // SECURITY: Refuse to copy oversized objects onto the scratch volume
        if meta.len() > MAX_ARCHIVE_SIZE {
            return Err(Error::ArchiveTooLarge {
                size: meta.len(),
                limit: MAX_ARCHIVE_SIZE,
            });
        }

        let size = fs::copy(&path, destination).await.map_err(|e| {
            Error::backend(
                "local object store",
                "get",
                format!("{}: {}", destination.display(), e),
            )
        })?;

        debug!(
            "Fetched object {}/{} to {} ({} bytes)",
            self.bucket,
            key,
            destination.display(),
            size
        );
        Ok(size)
    }

    async fn has_object(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }
}

/// Accepts flat names made of ASCII alphanumerics, `.`, `-` and `_`.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

    if !valid {
        warn!("Rejected object key {:?}", key);
        return Err(Error::PathTraversal {
            path: key.to_string(),
        });
    }
    Ok(())
}
