//! # Pipeline Constants
//!
//! Fixed names, resource bounds and timeouts shared by the bundle builder,
//! the storage and queue backends, the engine and the worker. These values
//! are part of the on-disk and on-wire formats: changing a name constant
//! makes previously produced archives unreadable.
//!
//! ## Cross-References
//!
//! - [`crate::bundle`]: config filename, archive extension, VCS exclusion
//! - [`crate::storage`]: archive size bound
//! - [`crate::queue`]: receive and poll timeouts
//! - [`crate::engine`]: image tag prefix, build/run timeouts, output bound

use crate::error::{Error, Result};
use std::path::{Component, Path};
use std::time::Duration;

// =============================================================================
// Bundle Format
// =============================================================================

/// Name of the run configuration file at the top level of every bundle.
pub const BUNDLE_CONFIG_FILENAME: &str = "bundlerun.toml";

/// Extension of bundle archives. Full name is `<hex sha256>.bundle`.
pub const BUNDLE_EXTENSION: &str = "bundle";

/// Version-control metadata directories never included in an archive.
pub const VCS_DIRECTORIES: &[&str] = &[".git", ".hg", ".svn"];

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Read buffer used when hashing archives (64 KiB).
pub const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum size of a run configuration file (1 MiB).
///
/// **Security**: Bounds memory used when parsing untrusted configs pulled
/// out of downloaded archives.
pub const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Maximum archive size accepted for download and extraction (4 GiB).
///
/// **Attack Vector**: A job pointing at a huge object would otherwise fill
/// the worker's scratch volume.
pub const MAX_ARCHIVE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Maximum captured stdout/stderr per stream (16 MiB).
pub const MAX_OUTPUT_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Storage / URIs
// =============================================================================

/// URI schemes accepted for `Job::bundle_uri` and `Job::output_uri`.
pub const SUPPORTED_SCHEMES: &[&str] = &["s3"];

/// Default bucket name for the local object store.
pub const DEFAULT_BUCKET: &str = "bundles";

/// Subdirectory of the state root holding object-store buckets.
pub const OBJECT_STORE_DIR: &str = "objects";

/// Subdirectory of the state root holding queue spools.
pub const QUEUE_DIR: &str = "queues";

/// Channel name for open jobs.
pub const OPEN_CHANNEL: &str = "open";

/// Channel name for completed jobs.
pub const COMPLETED_CHANNEL: &str = "completed";

// =============================================================================
// Engine
// =============================================================================

/// Tag prefix applied to every image built from a bundle.
pub const IMAGE_TAG_PREFIX: &str = "bundlerun.runner";

/// Prefix of container names given to `docker run`.
pub const CONTAINER_NAME_PREFIX: &str = "bundlerun";

/// Image label carrying the bundle's content digest.
pub const DIGEST_LABEL: &str = "bundlerun.sha256";

/// Default container engine binary.
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

// =============================================================================
// Timeouts
// =============================================================================

/// Default wait for an open job before a worker cycle ends idle.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Poll interval of the spool queue while waiting for a message.
pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeout for an image build (30 minutes).
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Timeout for a single artifact run (6 hours).
///
/// **Rationale**: batch jobs can be long; the bound only guarantees the
/// worker is eventually released from a wedged container.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Timeout for short backend control commands (volume create, inspect).
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Validation Helpers
// =============================================================================

/// Validates a relative path taken from a bundle (archive entry or volume
/// key).
///
/// # Security
///
/// Rejects empty paths, absolute paths and any `..` component so that the
/// path can be safely joined under an extraction directory.
#[must_use = "validation result must be checked before joining the path"]
pub fn validate_relative_path(path: &str) -> std::result::Result<(), &'static str> {
    if path.is_empty() {
        return Err("path cannot be empty");
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err("path must be relative");
    }
    for component in Path::new(path).components() {
        match component {
            Component::ParentDir => return Err("path contains '..'"),
            Component::RootDir | Component::Prefix(_) => return Err("path must be relative"),
            _ => {}
        }
    }
    Ok(())
}

/// Validates a volume key before it is joined under an extraction
/// directory, reporting failures as [`Error::PathTraversal`].
pub fn validate_volume_key(key: &str) -> Result<()> {
    validate_relative_path(key).map_err(|_| Error::PathTraversal {
        path: key.to_string(),
    })
}

/// Returns true if any component of `path` names a version-control
/// metadata directory.
pub fn is_vcs_path(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|name| VCS_DIRECTORIES.contains(&name)),
        _ => false,
    })
}
