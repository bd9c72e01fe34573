//! # Directory Spool Queue
//!
//! A [`MessageBackend`] made of plain files, one directory per channel:
//!
//! ```text
//! ~/.bundlerun/queues/open/
//! ├── pending/
//! │   ├── 0192b1c4-...-a1.json     (visible, oldest first)
//! │   └── 0192b1c5-...-07.json
//! └── inflight/
//!     └── 0192b1c3-...-5e.json     (claimed, awaiting delete)
//! ```
//!
//! Message names are UUIDv7, so lexical order is send order.
//!
//! ## Claiming
//!
//! A receiver claims a message by renaming it from `pending/` to
//! `inflight/`. Rename is atomic on one filesystem: when several workers
//! race for the same file exactly one rename succeeds and the others see
//! `NotFound` and move on.
//!
//! ## Recovery
//!
//! A message stays in `inflight/` until deleted. If its receiver died,
//! [`SpoolQueue::requeue_inflight`] moves it back to `pending/`.

use super::{MessageBackend, ReceivedMessage};
use crate::constants::QUEUE_POLL_INTERVAL;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const PENDING_DIR: &str = "pending";
const INFLIGHT_DIR: &str = "inflight";
const MESSAGE_EXTENSION: &str = "json";

/// Directory-backed message channel.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    name: String,
    pending: PathBuf,
    inflight: PathBuf,
    poll_interval: Duration,
}

impl SpoolQueue {
    /// Opens (creating if needed) the channel `root/<name>`.
    pub fn new(root: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let dir = root.as_ref().join(&name);
        let pending = dir.join(PENDING_DIR);
        let inflight = dir.join(INFLIGHT_DIR);

        for d in [&pending, &inflight] {
            std::fs::create_dir_all(d).map_err(|e| {
                Error::backend("spool queue", "init", format!("{}: {}", d.display(), e))
            })?;
        }

        debug!("Spool queue '{}' at {}", name, dir.display());

        Ok(Self {
            name,
            pending,
            inflight,
            poll_interval: QUEUE_POLL_INTERVAL,
        })
    }

    /// Overrides the polling interval used while waiting for messages.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages visible to receivers.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.list(&self.pending).await?.len())
    }

    /// Number of received messages not yet deleted.
    pub async fn inflight_count(&self) -> Result<usize> {
        Ok(self.list(&self.inflight).await?.len())
    }

    /// Moves every in-flight message back to pending. Returns the count.
    pub async fn requeue_inflight(&self) -> Result<usize> {
        let mut restored = 0;
        for name in self.list(&self.inflight).await? {
            match fs::rename(self.inflight.join(&name), self.pending.join(&name)).await {
                Ok(()) => restored += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::backend("spool queue", "requeue", e.to_string())),
            }
        }
        if restored > 0 {
            info!("Requeued {} in-flight messages on '{}'", restored, self.name);
        }
        Ok(restored)
    }

    /// Sorted message file names in `dir`. Temp files are skipped.
    async fn list(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| Error::backend("spool queue", "list", e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::backend("spool queue", "list", e.to_string()))?
        {
            if let Some(name) = entry.file_name().to_str()
                && is_message_name(name)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Claims up to `max` pending messages without waiting.
    async fn claim(&self, max: usize) -> Result<Vec<ReceivedMessage>> {
        let mut claimed = Vec::new();
        for name in self.list(&self.pending).await? {
            if claimed.len() >= max {
                break;
            }
            let target = self.inflight.join(&name);
            match fs::rename(self.pending.join(&name), &target).await {
                Ok(()) => {}
                // Another receiver won the race.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::backend("spool queue", "receive", e.to_string())),
            }

            let body = fs::read_to_string(&target)
                .await
                .map_err(|e| Error::backend("spool queue", "receive", e.to_string()))?;
            let sent_at = fs::metadata(&target)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            claimed.push(ReceivedMessage {
                body,
                receipt: name,
                sent_at,
            });
        }
        Ok(claimed)
    }
}

#[async_trait]
impl MessageBackend for SpoolQueue {
    async fn send(&self, body: &str) -> Result<()> {
        let id = uuid::Uuid::now_v7();
        let name = format!("{}.{}", id, MESSAGE_EXTENSION);
        let temp = self.pending.join(format!(".{}.tmp", id));

        fs::write(&temp, body)
            .await
            .map_err(|e| Error::backend("spool queue", "send", e.to_string()))?;
        if let Err(e) = fs::rename(&temp, self.pending.join(&name)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::backend("spool queue", "send", e.to_string()));
        }

        debug!("Sent message {} on '{}'", name, self.name);
        Ok(())
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + wait;
        loop {
            let claimed = self.claim(max_messages).await?;
            if !claimed.is_empty() {
                debug!("Received {} messages on '{}'", claimed.len(), self.name);
                return Ok(claimed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        if !is_message_name(receipt) {
            return Err(Error::backend(
                "spool queue",
                "delete",
                format!("invalid receipt '{}'", receipt),
            ));
        }
        match fs::remove_file(self.inflight.join(receipt)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Message {} on '{}' was already deleted", receipt, self.name);
                Ok(())
            }
            Err(e) => Err(Error::backend("spool queue", "delete", e.to_string())),
        }
    }
}

/// Flat `<name>.json` file names only.
fn is_message_name(name: &str) -> bool {
    !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && Path::new(name).extension().and_then(|e| e.to_str()) == Some(MESSAGE_EXTENSION)
}
