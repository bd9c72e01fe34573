//! Error types for the bundle execution pipeline.

use std::path::PathBuf;

/// Result type alias for bundle pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the bundle pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A required key is absent from the run configuration.
    #[error("missing key '{key}' in {context}")]
    MissingKey { key: String, context: String },

    /// An unexpected key is present in the run configuration.
    #[error("unexpected key '{key}' in {context}")]
    InvalidKey { key: String, context: String },

    /// A configuration value has the wrong type.
    #[error("'{key}' must be {expected}")]
    InvalidType { key: String, expected: String },

    /// A configuration value has the right type but an unsupported value.
    #[error("unsupported value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// The configuration text is not valid TOML.
    #[error("failed to parse bundle config: {0}")]
    ConfigParse(String),

    // =========================================================================
    // Packaging Errors
    // =========================================================================
    /// A bundle directory or archive has no run configuration.
    #[error("no bundle config found in {path}")]
    BundleConfigNotPresent { path: PathBuf },

    /// Archive bytes do not hash to the digest in the archive's name.
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// Archive file name is not `<hex digest>.<extension>`.
    #[error("invalid archive name {path}: {reason}")]
    InvalidArchiveName { path: PathBuf, reason: String },

    /// Path traversal attempt detected in an archive entry or volume key.
    #[error("path traversal detected: {path}")]
    PathTraversal { path: String },

    /// Archive exceeds the extraction bound.
    #[error("archive exceeds size limit: {size} > {limit} bytes")]
    ArchiveTooLarge { size: u64, limit: u64 },

    // =========================================================================
    // Volume Errors
    // =========================================================================
    /// A nested volume path does not exist inside the bundle.
    #[error("file '{path}' does not exist in the bundle")]
    MissingVolumeFile { path: String },

    // =========================================================================
    // Job Errors
    // =========================================================================
    /// `Job::complete` was called on a job that already has an output URI.
    #[error("job {job_id} has already been completed")]
    AlreadyCompleted { job_id: String },

    /// URI scheme is not a supported storage scheme.
    #[error("unsupported scheme '{scheme}' in '{uri}': only s3 URIs are supported")]
    UnsupportedScheme { uri: String, scheme: String },

    /// Job URI names a bucket other than the one the storage serves.
    #[error("'{uri}' is not in bucket '{bucket}'")]
    BucketMismatch { uri: String, bucket: String },

    /// URI string could not be parsed.
    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Object not present in the storage backend.
    #[error("object not found: {key}")]
    ObjectNotFound { key: String },

    /// A collaborator backend failed. `message` is the backend's own text.
    #[error("{backend} {operation} failed: {message}")]
    Backend {
        backend: String,
        operation: String,
        message: String,
    },

    /// Engine build step failed.
    #[error("failed to build bundle '{name}': {reason}")]
    BuildFailed { name: String, reason: String },

    /// Artifact ran but exited unsuccessfully.
    #[error("artifact '{artifact}' exited with status {exit_code}: {stderr}")]
    RunFailed {
        artifact: String,
        exit_code: i32,
        stderr: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // Worker Errors
    // =========================================================================
    /// The worker was asked for more work after shutdown was signaled.
    #[error("unable to process new jobs: worker shut down")]
    WorkerShutdown,

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true for errors raised while parsing or validating a run
    /// configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MissingKey { .. }
                | Self::InvalidKey { .. }
                | Self::InvalidType { .. }
                | Self::InvalidValue { .. }
                | Self::ConfigParse(_)
        )
    }

    /// Shorthand for a [`Error::Backend`] failure.
    pub(crate) fn backend(
        backend: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
