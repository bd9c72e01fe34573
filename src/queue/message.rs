//! [`JobQueue`] over a pair of [`MessageBackend`] channels.

use super::{Job, JobQueue, MessageBackend};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Job queue with delete-on-receive delivery.
#[derive(Debug, Clone)]
pub struct MessageJobQueue<B> {
    open: B,
    completed: B,
}

impl<B: MessageBackend> MessageJobQueue<B> {
    /// Builds a queue from its open and completed channels.
    pub fn new(open: B, completed: B) -> Self {
        Self { open, completed }
    }

    pub fn open_channel(&self) -> &B {
        &self.open
    }

    pub fn completed_channel(&self) -> &B {
        &self.completed
    }
}

#[async_trait]
impl<B: MessageBackend> JobQueue for MessageJobQueue<B> {
    async fn get_open_request(&self, timeout: Duration) -> Result<Option<Job>> {
        let Some(message) = self.open.receive(1, timeout).await?.into_iter().next() else {
            return Ok(None);
        };

        // Removed before parsing: a malformed message is dropped, not retried.
        self.open.delete(&message.receipt).await?;

        let job = Job::from_json(&message.body).inspect_err(|e| {
            warn!("Dropped malformed job message {}: {}", message.receipt, e);
        })?;

        if let Some(sent_at) = message.sent_at {
            debug!("Received {} (sent {})", job, sent_at.to_rfc3339());
        }
        Ok(Some(job))
    }

    async fn submit_new_request(&self, job: &Job) -> Result<()> {
        self.open.send(&job.to_json()?).await?;
        info!("Submitted {}", job);
        Ok(())
    }

    async fn mark_completed(&self, job: &Job) -> Result<()> {
        self.completed.send(&job.to_json()?).await?;
        info!("Marked {} completed", job);
        Ok(())
    }
}
