//! Queue stores that misbehave on purpose

use std::time::SystemTime;

use async_trait::async_trait;
use mailq_common::{Message, Priority};
use mailq_spool::{
    FailedMessage, LogEntry, MemoryQueueStore, QueueStore, QueuedMessage, QueuedMessageId,
    SpoolError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every eligible entry is listed twice
    DuplicateListing,
    /// Listing eligible entries fails
    FailListing,
    /// Marking an entry sent fails
    FailMarkSent,
}

#[derive(Debug, Clone)]
pub struct FaultyStore {
    pub inner: MemoryQueueStore,
    fault: Fault,
}

impl FaultyStore {
    pub fn new(fault: Fault) -> Self {
        Self {
            inner: MemoryQueueStore::new(),
            fault,
        }
    }
}

#[async_trait]
impl QueueStore for FaultyStore {
    async fn enqueue(&self, message: Message, priority: Priority) -> mailq_spool::Result<QueuedMessageId> {
        self.inner.enqueue(message, priority).await
    }

    async fn get(&self, id: &QueuedMessageId) -> mailq_spool::Result<QueuedMessage> {
        self.inner.get(id).await
    }

    async fn list_eligible(
        &self,
        now: SystemTime,
        limit: Option<usize>,
    ) -> mailq_spool::Result<Vec<QueuedMessage>> {
        match self.fault {
            Fault::FailListing => Err(SpoolError::Internal("disk on fire".to_string())),
            Fault::DuplicateListing => {
                let entries = self.inner.list_eligible(now, limit).await?;
                Ok(entries.iter().chain(entries.iter()).cloned().collect())
            }
            Fault::FailMarkSent => self.inner.list_eligible(now, limit).await,
        }
    }

    async fn list_all(&self) -> mailq_spool::Result<Vec<QueuedMessage>> {
        self.inner.list_all().await
    }

    async fn mark_sent(&self, id: &QueuedMessageId) -> mailq_spool::Result<()> {
        if self.fault == Fault::FailMarkSent {
            return Err(SpoolError::Internal("read-only spool".to_string()));
        }
        self.inner.mark_sent(id).await
    }

    async fn mark_deferred(
        &self,
        id: &QueuedMessageId,
        next_eligible_at: SystemTime,
        error: &str,
    ) -> mailq_spool::Result<()> {
        self.inner.mark_deferred(id, next_eligible_at, error).await
    }

    async fn mark_failed(&self, id: &QueuedMessageId, error: &str) -> mailq_spool::Result<()> {
        self.inner.mark_failed(id, error).await
    }

    async fn list_failed(&self) -> mailq_spool::Result<Vec<FailedMessage>> {
        self.inner.list_failed().await
    }

    async fn requeue_failed(&self, id: &QueuedMessageId) -> mailq_spool::Result<()> {
        self.inner.requeue_failed(id).await
    }

    async fn retry_deferred(&self, max_retries: Option<u32>) -> mailq_spool::Result<usize> {
        self.inner.retry_deferred(max_retries).await
    }

    async fn record_log(&self, entry: LogEntry) -> mailq_spool::Result<()> {
        self.inner.record_log(entry).await
    }

    async fn list_logs(&self) -> mailq_spool::Result<Vec<LogEntry>> {
        self.inner.list_logs().await
    }
}
