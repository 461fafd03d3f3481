use std::{fmt::Debug, time::SystemTime};

use async_trait::async_trait;
use mailq_common::{Message, Priority};

use crate::{FailedMessage, LogEntry, QueuedMessage, QueuedMessageId};

/// Persistence for the delivery queue
///
/// Implementations serialise access per entry; the delivery engine does no
/// row-level locking of its own. Listing operations return entries in drain
/// order (see [`crate::queue_order`]).
#[async_trait]
pub trait QueueStore: Send + Sync + Debug {
    /// Add a message to the queue, eligible immediately
    async fn enqueue(&self, message: Message, priority: Priority) -> crate::Result<QueuedMessageId>;

    async fn get(&self, id: &QueuedMessageId) -> crate::Result<QueuedMessage>;

    /// Entries eligible at `now`, in drain order, at most `limit` of them
    async fn list_eligible(
        &self,
        now: SystemTime,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueuedMessage>>;

    /// Every queued entry in drain order, eligible or not
    async fn list_all(&self) -> crate::Result<Vec<QueuedMessage>>;

    /// The message was delivered; drop it from the queue
    async fn mark_sent(&self, id: &QueuedMessageId) -> crate::Result<()>;

    /// Bump the retry count and hold the entry back until `next_eligible_at`
    async fn mark_deferred(
        &self,
        id: &QueuedMessageId,
        next_eligible_at: SystemTime,
        error: &str,
    ) -> crate::Result<()>;

    /// Move the entry to the failed set
    async fn mark_failed(&self, id: &QueuedMessageId, error: &str) -> crate::Result<()>;

    async fn list_failed(&self) -> crate::Result<Vec<FailedMessage>>;

    /// Put a failed entry back on the queue with a fresh retry count
    async fn requeue_failed(&self, id: &QueuedMessageId) -> crate::Result<()>;

    /// Make deferred entries eligible now
    ///
    /// Only entries with fewer than `max_retries` retries are touched when a
    /// limit is given. Returns how many entries were released.
    async fn retry_deferred(&self, max_retries: Option<u32>) -> crate::Result<usize>;

    async fn record_log(&self, entry: LogEntry) -> crate::Result<()>;

    /// Delivery log, oldest first
    async fn list_logs(&self) -> crate::Result<Vec<LogEntry>>;
}
