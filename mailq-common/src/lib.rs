pub mod clock;
pub mod logging;
pub mod message;
pub mod status;

pub use clock::{Clock, SystemClock, TestClock};
pub use message::{Message, Priority};
pub use status::ResultCode;
pub use tracing;

/// Broadcast to long-running loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
