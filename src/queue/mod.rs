//! Two-channel job queue.
//!
//! Workers pull [`Job`]s from the **open** channel and publish finished jobs
//! to the **completed** channel. [`JobQueue`] is what the worker depends
//! on; [`MessageBackend`] is the raw send/receive/delete primitive a queue
//! service exposes.
//!
//! # Delivery
//!
//! [`MessageJobQueue`] deletes a message as soon as it is received, before
//! the job is handed to the caller. Delivery is therefore at-most-once: a
//! worker that dies mid-job loses that job. Messages stranded in a spool's
//! in-flight area can be restored with [`SpoolQueue::requeue_inflight`].
//!
//! # Implementations
//!
//! - [`MessageJobQueue`]: [`JobQueue`] over two [`MessageBackend`]s
//! - [`SpoolQueue`]: directory-backed [`MessageBackend`]

mod job;
mod message;
mod spool;

pub use job::Job;
pub use message::MessageJobQueue;
pub use spool::SpoolQueue;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

// =============================================================================
// Job Queue Trait
// =============================================================================

/// Queue of open and completed jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Waits up to `timeout` for an open job.
    ///
    /// A returned job has already been removed from the channel. `None`
    /// means the wait expired.
    async fn get_open_request(&self, timeout: Duration) -> Result<Option<Job>>;

    /// Enqueues `job` on the open channel.
    async fn submit_new_request(&self, job: &Job) -> Result<()>;

    /// Enqueues `job` on the completed channel.
    ///
    /// Callers pass a job produced by [`Job::complete`]; this is not
    /// enforced here.
    async fn mark_completed(&self, job: &Job) -> Result<()>;
}

// =============================================================================
// Message Backend
// =============================================================================

/// A message claimed from a backend, pending deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Message body as sent.
    pub body: String,
    /// Opaque handle passed back to [`MessageBackend::delete`].
    pub receipt: String,
    /// Time the message was sent, when the backend records it.
    pub sent_at: Option<DateTime<Utc>>,
}

/// Raw message queue primitive.
///
/// A received message is invisible to other receivers until deleted (or
/// until the backend's own recovery makes it visible again).
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Sends a message body.
    async fn send(&self, body: &str) -> Result<()>;

    /// Receives up to `max_messages`, waiting up to `wait` for the first.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>>;

    /// Permanently removes a received message.
    async fn delete(&self, receipt: &str) -> Result<()>;
}
