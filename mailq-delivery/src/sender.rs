//! Sending a single message and turning the result into queue state.

use std::{collections::HashSet, fmt, sync::Arc};

use mailq_common::{Message, ResultCode, outgoing};
use mailq_spool::QueuedMessage;

use crate::{
    classifier::{Classification, ErrorClassifier},
    error::TransportError,
    transport::Transport,
};

/// What the caller must do with the queue entry after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAction {
    /// Delete it from the queue
    Remove,
    /// Bump its retry count and hold it back for a while
    Defer,
    /// Move it to the failed set
    MarkFailed,
    /// Leave it untouched
    Keep,
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub code: ResultCode,
    pub action: QueueAction,
    /// Error text for anything other than a clean send
    pub detail: String,
}

impl SendOutcome {
    fn sent() -> Self {
        Self {
            code: ResultCode::Sent,
            action: QueueAction::Remove,
            detail: String::new(),
        }
    }

    fn new(code: ResultCode, action: QueueAction, detail: impl Into<String>) -> Self {
        Self {
            code,
            action,
            detail: detail.into(),
        }
    }
}

/// Sends messages and applies the blacklist and error classifier
///
/// Never fails: every error is classified and folded into a
/// [`SendOutcome`].
#[derive(Clone, Default)]
pub struct MessageSender {
    classifier: Option<Arc<dyn ErrorClassifier>>,
    blacklist: HashSet<String>,
}

impl fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender")
            .field("classifier", &self.classifier.is_some())
            .field("blacklist", &self.blacklist)
            .finish()
    }
}

impl MessageSender {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Addresses that must never receive mail (compared case-insensitively)
    #[must_use]
    pub fn with_blacklist<S: AsRef<str>>(mut self, addresses: impl IntoIterator<Item = S>) -> Self {
        self.blacklist = addresses
            .into_iter()
            .map(|address| address.as_ref().trim().to_lowercase())
            .collect();
        self
    }

    pub fn is_blacklisted(&self, message: &Message) -> bool {
        !self.blacklist.is_empty()
            && message
                .to
                .iter()
                .any(|address| self.blacklist.contains(&address.trim().to_lowercase()))
    }

    /// Send a queued entry and decide what happens to it
    pub async fn send(&self, entry: &QueuedMessage, transport: &mut dyn Transport) -> SendOutcome {
        let outcome = self.attempt(&entry.message, transport).await;

        outgoing!(
            level = INFO,
            "{} message {} from {} to {}{}",
            outcome.code,
            entry.id,
            entry.message.from,
            entry.message.recipients(),
            detail_suffix(&outcome.detail)
        );

        outcome
    }

    /// Send a message that is not on the queue
    pub async fn send_message(&self, message: &Message, transport: &mut dyn Transport) -> ResultCode {
        let outcome = self.attempt(message, transport).await;

        outgoing!(
            level = INFO,
            "{} message from {} to {}{}",
            outcome.code,
            message.from,
            message.recipients(),
            detail_suffix(&outcome.detail)
        );

        outcome.code
    }

    async fn attempt(&self, message: &Message, transport: &mut dyn Transport) -> SendOutcome {
        if self.is_blacklisted(message) {
            return SendOutcome::new(ResultCode::Skipped, QueueAction::Remove, "blacklisted");
        }

        if !transport.is_connected()
            && let Err(error) = transport.open().await
        {
            return SendOutcome::new(
                ResultCode::Failed,
                QueueAction::Defer,
                format!("Unable to connect: {error}"),
            );
        }

        match transport.send(message).await {
            Ok(()) => SendOutcome::sent(),
            Err(error) => self.classify(&error),
        }
    }

    fn classify(&self, error: &TransportError) -> SendOutcome {
        if error.is_transient() {
            return SendOutcome::new(ResultCode::Failed, QueueAction::Defer, error.to_string());
        }

        let Some(classifier) = &self.classifier else {
            return SendOutcome::new(ResultCode::Failed, QueueAction::MarkFailed, error.to_string());
        };

        let classification = classifier.classify(error);
        let action = match classification {
            Classification::Fail => QueueAction::MarkFailed,
            Classification::Defer => QueueAction::Defer,
            Classification::Skip => QueueAction::Keep,
        };

        SendOutcome::new(classification.result_code(), action, error.to_string())
    }
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}
