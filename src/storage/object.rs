//! [`Storage`] over an [`ObjectStore`] backend.

use super::{ObjectStore, Storage, StorageId};
use crate::bundle::BundleInfo;
use crate::constants::SUPPORTED_SCHEMES;
use crate::error::Result;
use crate::uri::ObjectUri;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stores bundle archives as objects keyed by their file name.
#[derive(Debug, Clone)]
pub struct ObjectStoreStorage<O> {
    store: O,
}

impl<O: ObjectStore> ObjectStoreStorage<O> {
    /// Wraps an object store.
    pub fn new(store: O) -> Self {
        Self { store }
    }

    /// Returns the underlying object store.
    pub fn store(&self) -> &O {
        &self.store
    }

    /// Job URI for a stored identifier: `s3://<bucket>/<identifier>`.
    pub fn uri_for(&self, identifier: &str) -> ObjectUri {
        ObjectUri::new(
            SUPPORTED_SCHEMES[0],
            self.store.bucket(),
            format!("/{}", identifier),
        )
    }

    fn resolve_destination(identifier: &str, destination: &Path) -> PathBuf {
        if destination.is_dir() {
            destination.join(identifier)
        } else {
            destination.to_path_buf()
        }
    }
}

#[async_trait]
impl<O: ObjectStore> Storage for ObjectStoreStorage<O> {
    fn bucket(&self) -> &str {
        self.store.bucket()
    }

    async fn upload(&self, bundle: &BundleInfo) -> Result<StorageId> {
        let key = bundle.storage_id();

        if self.store.has_object(&key).await? {
            debug!("Bundle {} already stored in '{}'", key, self.store.bucket());
            return Ok(key);
        }

        self.store.put_object(&key, bundle.archive_path()).await?;
        info!(
            "Uploaded bundle '{}' as {}",
            bundle.config().name(),
            self.uri_for(&key)
        );
        Ok(key)
    }

    async fn download(&self, identifier: &str, destination: &Path) -> Result<BundleInfo> {
        let path = Self::resolve_destination(identifier, destination);
        self.store.get_object(identifier, &path).await?;

        match BundleInfo::from_archive(&path) {
            Ok(bundle) => {
                info!(
                    "Downloaded bundle '{}' to {}",
                    bundle.config().name(),
                    path.display()
                );
                Ok(bundle)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove unreadable archive {}: {}", path.display(), rm);
                }
                Err(e)
            }
        }
    }
}
