//! Queue store implementations
//!
//! - `memory`: in-memory storage for tests and transient queues
//! - `test`: memory storage with mutation counters and enqueue notifications
//! - `file`: spool directory storage shared between separate invocations

pub mod file;
pub mod memory;
pub mod test;

pub use file::{FileQueueStore, FileQueueStoreBuilder};
pub use memory::MemoryQueueStore;
pub use test::TestQueueStore;
