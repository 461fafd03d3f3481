//! Delivery engine for the mail queue
//!
//! This crate provides:
//! - A file-based drain lock with bounded waits and stale-lock recovery
//! - Transports that hand messages to a relay, a pickup directory, or a test double
//! - Per-message send logic with a pluggable error classifier
//! - Configurable retry backoff
//! - The drain pass tying it all together

mod classifier;
mod config;
mod engine;
mod error;
pub mod lock;
pub mod policy;
mod sender;
pub mod transport;

pub use classifier::{Classification, ErrorClassifier};
pub use config::DeliveryConfig;
pub use engine::{DrainOutcome, DrainSummary, QueueEngine, QueueEngineBuilder};
pub use error::{DeliveryError, LockError, TransportError};
pub use lock::{LockManager, LockOwner};
pub use policy::{Backoff, RetryPolicy};
pub use sender::{MessageSender, QueueAction, SendOutcome};
pub use transport::{DirectoryTransport, MockBehavior, MockTransport, SmtpTransport, Transport};
