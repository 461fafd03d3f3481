use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use async_trait::async_trait;
use mailq_common::{Message, Priority};

use crate::{
    FailedMessage, LogEntry, QueuedMessage, SpoolError, queue_order, r#trait::QueueStore,
    types::QueuedMessageId,
};

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) queue: HashMap<QueuedMessageId, QueuedMessage>,
    pub(crate) failed: HashMap<QueuedMessageId, FailedMessage>,
    pub(crate) logs: Vec<LogEntry>,
}

/// In-memory queue store
///
/// Entries live in `HashMap`s behind an `RwLock`. Intended for tests and for
/// running the engine without a spool directory; nothing survives a restart.
///
/// # Capacity Management
/// An optional capacity bounds the number of queued (not failed) entries.
/// Enqueueing past it fails with [`SpoolError::Internal`].
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    pub(crate) state: Arc<RwLock<State>>,
    capacity: Option<usize>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses to hold more than `capacity` entries
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of queued entries
    ///
    /// Recovers gracefully if the lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .queue
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Insert a fully formed entry, keeping its id and timestamps
    ///
    /// # Errors
    /// If an entry with the same id is already queued, or the store is full
    pub fn insert(&self, entry: QueuedMessage) -> crate::Result<QueuedMessageId> {
        let mut state = self.state.write()?;

        if state.queue.contains_key(&entry.id) {
            return Err(SpoolError::AlreadyExists(entry.id));
        }

        if let Some(cap) = self.capacity
            && state.queue.len() >= cap
        {
            return Err(SpoolError::Internal(format!(
                "Memory queue capacity exceeded: {}/{cap} messages",
                state.queue.len()
            )));
        }

        let id = entry.id;
        state.queue.insert(id, entry);
        Ok(id)
    }

    /// Remove everything, including failed records and the delivery log
    pub fn clear(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.queue.clear();
        state.failed.clear();
        state.logs.clear();
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, message: Message, priority: Priority) -> crate::Result<QueuedMessageId> {
        self.insert(QueuedMessage::new(message, priority))
    }

    async fn get(&self, id: &QueuedMessageId) -> crate::Result<QueuedMessage> {
        self.state
            .read()?
            .queue
            .get(id)
            .cloned()
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn list_eligible(
        &self,
        now: SystemTime,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueuedMessage>> {
        let mut entries: Vec<_> = self
            .state
            .read()?
            .queue
            .values()
            .filter(|entry| entry.is_eligible(now))
            .cloned()
            .collect();

        entries.sort_by(queue_order);
        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    async fn list_all(&self) -> crate::Result<Vec<QueuedMessage>> {
        let mut entries: Vec<_> = self.state.read()?.queue.values().cloned().collect();
        entries.sort_by(queue_order);
        Ok(entries)
    }

    async fn mark_sent(&self, id: &QueuedMessageId) -> crate::Result<()> {
        self.state
            .write()?
            .queue
            .remove(id)
            .ok_or(SpoolError::NotFound(*id))?;
        Ok(())
    }

    async fn mark_deferred(
        &self,
        id: &QueuedMessageId,
        next_eligible_at: SystemTime,
        error: &str,
    ) -> crate::Result<()> {
        let mut state = self.state.write()?;
        let entry = state.queue.get_mut(id).ok_or(SpoolError::NotFound(*id))?;

        entry.retries = entry.retries.saturating_add(1);
        entry.deferred_until = Some(next_eligible_at);
        entry.last_error = Some(error.to_string());

        Ok(())
    }

    async fn mark_failed(&self, id: &QueuedMessageId, error: &str) -> crate::Result<()> {
        let mut state = self.state.write()?;
        let mut entry = state.queue.remove(id).ok_or(SpoolError::NotFound(*id))?;

        entry.last_error = Some(error.to_string());
        state.failed.insert(
            *id,
            FailedMessage {
                entry,
                failed_at: SystemTime::now(),
            },
        );

        Ok(())
    }

    async fn list_failed(&self) -> crate::Result<Vec<FailedMessage>> {
        let mut failed: Vec<_> = self.state.read()?.failed.values().cloned().collect();
        failed.sort_by(|a, b| queue_order(&a.entry, &b.entry));
        Ok(failed)
    }

    async fn requeue_failed(&self, id: &QueuedMessageId) -> crate::Result<()> {
        let mut state = self.state.write()?;
        let failed = state.failed.remove(id).ok_or(SpoolError::NotFound(*id))?;

        let mut entry = failed.entry;
        entry.retries = 0;
        entry.deferred_until = None;
        state.queue.insert(*id, entry);

        Ok(())
    }

    async fn retry_deferred(&self, max_retries: Option<u32>) -> crate::Result<usize> {
        let mut state = self.state.write()?;
        let mut released = 0;

        for entry in state.queue.values_mut() {
            if entry.is_deferred() && max_retries.is_none_or(|max| entry.retries < max) {
                entry.deferred_until = None;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn record_log(&self, entry: LogEntry) -> crate::Result<()> {
        self.state.write()?.logs.push(entry);
        Ok(())
    }

    async fn list_logs(&self) -> crate::Result<Vec<LogEntry>> {
        Ok(self.state.read()?.logs.clone())
    }
}
