//! Job records exchanged over the queue.
//!
//! A job is created **open** and transitions to **completed** exactly once:
//!
//! ```text
//! Job::new(bundle_uri) ──► open ──complete(output_uri)──► completed
//!                                                            │
//!                               complete(..) again ──► AlreadyCompleted
//! ```
//!
//! Both URIs must use a supported storage scheme. Deserialization runs the
//! same validation as construction, so a message with an `http://` bundle
//! URI never becomes a `Job`.

use crate::error::{Error, Result};
use crate::uri::ObjectUri;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable job value. Transitions return a new `Job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JobRecord", into = "JobRecord")]
pub struct Job {
    id: String,
    bundle_uri: ObjectUri,
    output_uri: Option<ObjectUri>,
}

/// Wire form of a [`Job`].
#[derive(Serialize, Deserialize)]
struct JobRecord {
    id: String,
    bundle_uri: ObjectUri,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_uri: Option<ObjectUri>,
}

impl Job {
    /// Creates an open job with a fresh time-ordered id.
    pub fn new(bundle_uri: ObjectUri) -> Result<Self> {
        Self::from_parts(uuid::Uuid::now_v7().to_string(), bundle_uri, None)
    }

    /// Reassembles a job from its fields, validating them.
    pub fn from_parts(
        id: impl Into<String>,
        bundle_uri: ObjectUri,
        output_uri: Option<ObjectUri>,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidValue {
                key: "id".to_string(),
                value: id,
                reason: "job id cannot be empty".to_string(),
            });
        }
        bundle_uri.ensure_supported()?;
        if let Some(output_uri) = &output_uri {
            output_uri.ensure_supported()?;
        }
        Ok(Self {
            id,
            bundle_uri,
            output_uri,
        })
    }

    /// Returns the completed form of this job.
    ///
    /// Fails with [`Error::AlreadyCompleted`] if an output URI is already set.
    pub fn complete(&self, output_uri: ObjectUri) -> Result<Self> {
        if self.output_uri.is_some() {
            return Err(Error::AlreadyCompleted {
                job_id: self.id.clone(),
            });
        }
        output_uri.ensure_supported()?;
        Ok(Self {
            output_uri: Some(output_uri),
            ..self.clone()
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bundle_uri(&self) -> &ObjectUri {
        &self.bundle_uri
    }

    pub fn output_uri(&self) -> Option<&ObjectUri> {
        self.output_uri.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.output_uri.is_some()
    }

    /// Serializes to a queue message body.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses and validates a queue message body.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

impl TryFrom<JobRecord> for Job {
    type Error = Error;

    fn try_from(record: JobRecord) -> Result<Self> {
        Self::from_parts(record.id, record.bundle_uri, record.output_uri)
    }
}

impl From<Job> for JobRecord {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            bundle_uri: job.bundle_uri,
            output_uri: job.output_uri,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} ({})", self.id, self.bundle_uri)
    }
}
