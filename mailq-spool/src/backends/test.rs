use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use async_trait::async_trait;
use mailq_common::{Message, Priority};
use tokio::sync::Notify;

use super::memory::MemoryQueueStore;
use crate::{
    FailedMessage, LogEntry, QueuedMessage, SpoolError, r#trait::QueueStore,
    types::QueuedMessageId,
};

/// Testing wrapper around [`MemoryQueueStore`]
///
/// Counts every state change the engine makes and wakes waiters whenever a
/// message is enqueued.
#[derive(Debug, Clone, Default)]
pub struct TestQueueStore {
    pub(crate) inner: MemoryQueueStore,
    notify: Arc<Notify>,
    mutations: Arc<AtomicUsize>,
}

impl TestQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the wrapped store, e.g. to insert entries with fixed timestamps
    pub const fn inner(&self) -> &MemoryQueueStore {
        &self.inner
    }

    /// Number of `mark_*`, `requeue_failed` and `retry_deferred` calls so far
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::Acquire)
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::AcqRel);
    }

    /// Wait for the next message to be enqueued
    pub async fn wait_for_enqueue(&self) {
        self.notify.notified().await;
    }

    /// Wait until at least `expected` messages are queued
    ///
    /// # Errors
    /// Returns an error if the timeout is reached first
    pub async fn wait_for_count(
        &self,
        expected: usize,
        timeout: std::time::Duration,
    ) -> crate::Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.inner.len() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|e| SpoolError::Internal(format!("Timeout waiting for messages: {e}")))
    }

    pub fn clear(&self) {
        self.inner.clear();
        self.mutations.store(0, Ordering::Release);
    }

    pub fn message_count(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl QueueStore for TestQueueStore {
    async fn enqueue(&self, message: Message, priority: Priority) -> crate::Result<QueuedMessageId> {
        let id = self.inner.enqueue(message, priority).await?;
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn get(&self, id: &QueuedMessageId) -> crate::Result<QueuedMessage> {
        self.inner.get(id).await
    }

    async fn list_eligible(
        &self,
        now: SystemTime,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueuedMessage>> {
        self.inner.list_eligible(now, limit).await
    }

    async fn list_all(&self) -> crate::Result<Vec<QueuedMessage>> {
        self.inner.list_all().await
    }

    async fn mark_sent(&self, id: &QueuedMessageId) -> crate::Result<()> {
        self.mutated();
        self.inner.mark_sent(id).await
    }

    async fn mark_deferred(
        &self,
        id: &QueuedMessageId,
        next_eligible_at: SystemTime,
        error: &str,
    ) -> crate::Result<()> {
        self.mutated();
        self.inner.mark_deferred(id, next_eligible_at, error).await
    }

    async fn mark_failed(&self, id: &QueuedMessageId, error: &str) -> crate::Result<()> {
        self.mutated();
        self.inner.mark_failed(id, error).await
    }

    async fn list_failed(&self) -> crate::Result<Vec<FailedMessage>> {
        self.inner.list_failed().await
    }

    async fn requeue_failed(&self, id: &QueuedMessageId) -> crate::Result<()> {
        self.mutated();
        self.inner.requeue_failed(id).await
    }

    async fn retry_deferred(&self, max_retries: Option<u32>) -> crate::Result<usize> {
        self.mutated();
        self.inner.retry_deferred(max_retries).await
    }

    async fn record_log(&self, entry: LogEntry) -> crate::Result<()> {
        self.inner.record_log(entry).await
    }

    async fn list_logs(&self) -> crate::Result<Vec<LogEntry>> {
        self.inner.list_logs().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn counts_mutations_and_notifies() {
        let store = TestQueueStore::new();
        let waiter = store.clone();
        let handle =
            tokio::spawn(async move { waiter.wait_for_count(1, Duration::from_secs(5)).await });

        let message = Message::new("a@test.test", ["b@test.test"], "Hi", b"body".as_slice());
        let id = store.enqueue(message, Priority::default()).await.expect("enqueue");

        handle.await.expect("task panicked").expect("timed out");
        assert_eq!(store.mutations(), 0);

        store.mark_sent(&id).await.expect("mark sent");
        assert_eq!(store.mutations(), 1);
        assert_eq!(store.message_count(), 0);

        store.clear();
        assert_eq!(store.mutations(), 0);
    }
}
