use std::{cmp::Ordering, time::SystemTime};

use mailq_common::{Message, Priority, ResultCode};
use serde::{Deserialize, Serialize};

use crate::QueuedMessageId;

/// A queue entry wrapping exactly one [`Message`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: QueuedMessageId,
    pub message: Message,
    pub priority: Priority,
    /// When the entry entered the queue, the age tie-break within a priority
    pub queued_at: SystemTime,
    /// Not eligible before this time; `None` means eligible now
    pub deferred_until: Option<SystemTime>,
    /// Number of deferrals so far
    pub retries: u32,
    pub last_error: Option<String>,
}

impl QueuedMessage {
    pub fn new(message: Message, priority: Priority) -> Self {
        Self {
            id: QueuedMessageId::generate(),
            message,
            priority,
            queued_at: SystemTime::now(),
            deferred_until: None,
            retries: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn with_queued_at(mut self, queued_at: SystemTime) -> Self {
        self.queued_at = queued_at;
        self
    }

    /// Whether a drain pass running at `now` should pick this entry up
    pub fn is_eligible(&self, now: SystemTime) -> bool {
        self.deferred_until.is_none_or(|until| until <= now)
    }

    pub const fn is_deferred(&self) -> bool {
        self.deferred_until.is_some()
    }
}

/// Drain order: priority descending, then oldest first, then id.
pub fn queue_order(a: &QueuedMessage, b: &QueuedMessage) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.queued_at.cmp(&b.queued_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// A queue entry that failed permanently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMessage {
    pub entry: QueuedMessage,
    pub failed_at: SystemTime,
}

impl FailedMessage {
    pub const fn id(&self) -> QueuedMessageId {
        self.entry.id
    }

    pub fn error(&self) -> Option<&str> {
        self.entry.last_error.as_deref()
    }
}

/// One delivery attempt, kept for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The queue entry this attempt was for, if it came from the queue
    pub message_id: Option<QueuedMessageId>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub result: ResultCode,
    pub detail: String,
    pub logged_at: SystemTime,
}

impl LogEntry {
    pub fn new(
        message_id: Option<QueuedMessageId>,
        message: &Message,
        result: ResultCode,
        detail: impl Into<String>,
        logged_at: SystemTime,
    ) -> Self {
        Self {
            message_id,
            from: message.from.clone(),
            to: message.to.clone(),
            subject: message.subject.clone(),
            result,
            detail: detail.into(),
            logged_at,
        }
    }
}
