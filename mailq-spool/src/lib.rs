pub mod backends;
pub mod error;
pub mod queued;
pub mod r#trait;
pub mod types;

pub use backends::{FileQueueStore, MemoryQueueStore, TestQueueStore};
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use queued::{FailedMessage, LogEntry, QueuedMessage, queue_order};
pub use r#trait::QueueStore;
pub use types::QueuedMessageId;
