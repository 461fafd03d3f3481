//! Time source used by the lock manager and the retry scheduler.
//!
//! Production code uses [`SystemClock`]. Tests inject a [`TestClock`] to
//! drive time by hand, freeze it, or move it backwards.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

fn to_nanos(time: SystemTime) -> u64 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX)
}

/// Manually driven clock.
///
/// Clones share the same underlying time. `sleep` advances the clock by the
/// requested duration unless the clock is frozen, in which case time never
/// moves on its own.
#[derive(Debug, Clone)]
pub struct TestClock {
    now_ns: Arc<AtomicU64>,
    frozen: Arc<AtomicBool>,
}

impl TestClock {
    /// A clock starting at the given time.
    pub fn new(start: SystemTime) -> Self {
        Self {
            now_ns: Arc::new(AtomicU64::new(to_nanos(start))),
            frozen: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clock that ignores `sleep`.
    pub fn frozen(start: SystemTime) -> Self {
        let clock = Self::new(start);
        clock.frozen.store(true, Ordering::Release);
        clock
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.now_ns.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Jump to an arbitrary time, including one in the past.
    pub fn set(&self, time: SystemTime) {
        self.now_ns.store(to_nanos(time), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(SystemTime::now())
    }
}

impl Clock for TestClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.now_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        if !self.frozen.load(Ordering::Acquire) {
            self.advance(duration);
        }
        Box::pin(tokio::task::yield_now())
    }
}
