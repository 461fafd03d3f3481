//! Queue drain engine.
//!
//! A drain pass takes the lock, opens the transport once, walks the eligible
//! entries in priority/age order applying each outcome to the store, then
//! closes the transport and releases the lock no matter how the walk ended.

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use mailq_common::{Clock, ResultCode, Signal, SystemClock, internal};
use mailq_spool::{LogEntry, QueueStore, QueuedMessage, SpoolError};
use tokio::sync::{Mutex, broadcast};

use crate::{
    classifier::ErrorClassifier,
    config::DeliveryConfig,
    error::{DeliveryError, LockError},
    lock::LockManager,
    policy::RetryPolicy,
    sender::{MessageSender, QueueAction, SendOutcome},
    transport::Transport,
};

/// Counts for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub sent: usize,
    pub deferred: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DrainSummary {
    pub const fn total(&self) -> usize {
        self.sent + self.deferred + self.failed + self.skipped
    }

    /// Count by the result code that was logged, not by what happened to
    /// the entry: a network error is `failed` even though the entry is kept
    /// for a later attempt.
    fn record(&mut self, outcome: &SendOutcome) {
        match outcome.code {
            ResultCode::Sent => self.sent += 1,
            ResultCode::Deferred => self.deferred += 1,
            ResultCode::Failed => self.failed += 1,
            ResultCode::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for DrainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, {} deferred, {} failed, {} skipped.",
            self.sent, self.deferred, self.failed, self.skipped
        )
    }
}

/// How a call to [`QueueEngine::drain_all`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another pass holds the lock and no wait was configured
    AlreadyLocked,
    /// Another pass held the lock for the whole wait
    LockTimedOut,
    Completed(DrainSummary),
}

impl DrainOutcome {
    pub const fn summary(&self) -> Option<&DrainSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::AlreadyLocked | Self::LockTimedOut => None,
        }
    }
}

/// Drains the queue through a transport
pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    transport: Mutex<Box<dyn Transport>>,
    lock: LockManager,
    sender: MessageSender,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    lock_wait_timeout: Duration,
    batch_size: Option<usize>,
    log_results: bool,
}

impl fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEngine")
            .field("store", &self.store)
            .field("lock", &self.lock)
            .field("sender", &self.sender)
            .field("retry", &self.retry)
            .field("lock_wait_timeout", &self.lock_wait_timeout)
            .field("batch_size", &self.batch_size)
            .field("log_results", &self.log_results)
            .finish_non_exhaustive()
    }
}

impl QueueEngine {
    pub fn builder() -> QueueEngineBuilder {
        QueueEngineBuilder::default()
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub const fn lock(&self) -> &LockManager {
        &self.lock
    }

    /// Run one drain pass
    ///
    /// Lock contention is not an error: the pass logs why it stopped and
    /// returns without touching the queue. Store failures abort the pass and
    /// are returned once the lock has been released.
    pub async fn drain_all(&self) -> Result<DrainOutcome, DeliveryError> {
        match self.lock.acquire(self.lock_wait_timeout).await {
            Ok(()) => {}
            Err(LockError::AlreadyLocked) => {
                internal!(level = INFO, "Lock already in place. Exiting.");
                return Ok(DrainOutcome::AlreadyLocked);
            }
            Err(LockError::Timeout { .. }) => {
                internal!(level = INFO, "Waiting for the lock timed out. Exiting.");
                return Ok(DrainOutcome::LockTimedOut);
            }
            Err(err) => return Err(err.into()),
        }

        let started = std::time::Instant::now();

        let result = self.drain_locked().await;
        let released = self.lock.release().await;

        let summary = result?;
        released?;

        if summary.total() > 0 {
            internal!(level = WARN, "{summary}");
        } else {
            internal!(level = INFO, "{summary}");
        }
        internal!(
            level = DEBUG,
            "Pass finished in {:.2} seconds",
            started.elapsed().as_secs_f64()
        );

        Ok(DrainOutcome::Completed(summary))
    }

    async fn drain_locked(&self) -> Result<DrainSummary, SpoolError> {
        let mut transport = self.transport.lock().await;
        open(&mut **transport).await;

        let result = self.process_batch(&mut **transport).await;

        close(&mut **transport).await;
        result
    }

    async fn process_batch(&self, transport: &mut dyn Transport) -> Result<DrainSummary, SpoolError> {
        let entries = self
            .store
            .list_eligible(self.clock.now(), self.batch_size)
            .await?;

        internal!(level = DEBUG, "{} messages eligible for delivery", entries.len());

        let mut seen = HashSet::with_capacity(entries.len());
        let mut summary = DrainSummary::default();

        for entry in entries {
            if !seen.insert(entry.id) {
                continue;
            }

            let outcome = self.deliver(&entry, transport).await?;
            summary.record(&outcome);
        }

        Ok(summary)
    }

    /// Send one entry and apply the outcome to the store
    async fn deliver(
        &self,
        entry: &QueuedMessage,
        transport: &mut dyn Transport,
    ) -> Result<SendOutcome, SpoolError> {
        let mut outcome = self.sender.send(entry, transport).await;

        if outcome.action == QueueAction::Defer && self.retry.exhausted(entry.retries) {
            internal!(
                level = WARN,
                "Message {} deferred {} times, giving up",
                entry.id,
                entry.retries
            );
            outcome.code = ResultCode::Failed;
            outcome.action = QueueAction::MarkFailed;
        }

        let now = self.clock.now();

        match outcome.action {
            QueueAction::Remove => self.store.mark_sent(&entry.id).await?,
            QueueAction::Defer => {
                let next = self.retry.next_attempt_at(entry.retries, now);
                self.store
                    .mark_deferred(&entry.id, next, &outcome.detail)
                    .await?;
            }
            QueueAction::MarkFailed => self.store.mark_failed(&entry.id, &outcome.detail).await?,
            QueueAction::Keep => {}
        }

        if self.log_results {
            self.store
                .record_log(LogEntry::new(
                    Some(entry.id),
                    &entry.message,
                    outcome.code,
                    outcome.detail.clone(),
                    now,
                ))
                .await?;
        }

        Ok(outcome)
    }

    /// Deliver a single entry now, outside of a drain pass
    ///
    /// Does not take the lock.
    pub async fn deliver_queued(&self, entry: &QueuedMessage) -> Result<ResultCode, DeliveryError> {
        let mut transport = self.transport.lock().await;
        open(&mut **transport).await;

        let result = self.deliver(entry, &mut **transport).await;

        close(&mut **transport).await;
        Ok(result?.code)
    }

    /// Make deferred entries eligible again
    ///
    /// With `max_retries`, only entries deferred fewer times are released.
    pub async fn retry_deferred(&self, max_retries: Option<u32>) -> Result<usize, DeliveryError> {
        let count = self.store.retry_deferred(max_retries).await?;
        internal!(level = INFO, "{count} deferred messages queued for retry");
        Ok(count)
    }

    /// Drain the queue every `interval` until told to shut down
    ///
    /// A pass in progress when the signal arrives runs to completion.
    pub async fn serve(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!("Queue engine starting, draining every {interval:?}");

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(err) = self.drain_all().await {
                        tracing::error!("Error draining queue: {err}");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!(level = INFO, "Queue engine received shutdown signal");
                        }
                        Err(err) => {
                            tracing::error!("Queue engine shutdown channel error: {err}");
                        }
                    }
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn open(transport: &mut dyn Transport) {
    if !transport.is_connected()
        && let Err(err) = transport.open().await
    {
        internal!(level = WARN, "Unable to open transport: {err}");
    }
}

async fn close(transport: &mut dyn Transport) {
    if transport.is_connected()
        && let Err(err) = transport.close().await
    {
        internal!(level = WARN, "Unable to close transport: {err}");
    }
}

/// Builder for [`QueueEngine`]
///
/// The store and transport are required; everything else falls back to
/// [`DeliveryConfig::default`], the system clock and no classifier.
#[derive(Default)]
pub struct QueueEngineBuilder {
    store: Option<Arc<dyn QueueStore>>,
    transport: Option<Box<dyn Transport>>,
    config: DeliveryConfig,
    clock: Option<Arc<dyn Clock>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
}

impl QueueEngineBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    #[must_use]
    pub fn config(mut self, config: DeliveryConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Build the engine
    ///
    /// # Errors
    /// If no store or no transport was given
    pub fn build(self) -> Result<QueueEngine, DeliveryError> {
        let store = self
            .store
            .ok_or_else(|| DeliveryError::Configuration("No queue store configured".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| DeliveryError::Configuration("No transport configured".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut sender = MessageSender::new().with_blacklist(&self.config.blacklist);
        if let Some(classifier) = self.classifier {
            sender = sender.with_classifier(classifier);
        }

        Ok(QueueEngine {
            store,
            transport: Mutex::new(transport),
            lock: self.config.lock_manager(clock.clone()),
            sender,
            retry: self.config.retry.clone(),
            lock_wait_timeout: self.config.lock_wait_timeout(),
            batch_size: self.config.batch_size,
            log_results: self.config.log_results,
            clock,
        })
    }
}
