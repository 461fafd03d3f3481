use std::{path::PathBuf, sync::Arc, time::Duration};

use mailq_common::Clock;
use serde::{Deserialize, Serialize};

use crate::{lock::LockManager, policy::RetryPolicy};

const fn default_lock_poll_interval() -> u64 {
    50
}

const fn default_stale_lock() -> u64 {
    3600
}

const fn default_log_results() -> bool {
    true
}

const fn default_serve_interval() -> u64 {
    60
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/var/spool/mailq/send_mail.lock")
}

/// Settings for the drain engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Where the drain lock lives
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    /// How long a pass waits for a held lock (in seconds)
    ///
    /// Zero means give up immediately.
    ///
    /// Default: 0
    #[serde(default)]
    pub lock_wait_timeout_secs: f64,

    /// Delay between lock polls while waiting (in milliseconds)
    ///
    /// Default: 50
    #[serde(default = "default_lock_poll_interval")]
    pub lock_poll_interval_ms: u64,

    /// Age after which a lock is considered abandoned (in seconds)
    ///
    /// Default: 3600 (1 hour)
    #[serde(default = "default_stale_lock")]
    pub stale_lock_secs: u64,

    /// Most entries a single pass will attempt; `None` = all eligible
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Write a delivery log entry for every attempt
    #[serde(default = "default_log_results")]
    pub log_results: bool,

    /// Recipients that are never sent to
    #[serde(default)]
    pub blacklist: Vec<String>,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Delay between passes when serving (in seconds)
    ///
    /// Default: 60
    #[serde(default = "default_serve_interval")]
    pub serve_interval_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            lock_path: default_lock_path(),
            lock_wait_timeout_secs: 0.0,
            lock_poll_interval_ms: default_lock_poll_interval(),
            stale_lock_secs: default_stale_lock(),
            batch_size: None,
            log_results: default_log_results(),
            blacklist: Vec::new(),
            retry: RetryPolicy::default(),
            serve_interval_secs: default_serve_interval(),
        }
    }
}

impl DeliveryConfig {
    /// Lock wait as a `Duration`; negative or non-finite values mean no wait
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.lock_wait_timeout_secs).unwrap_or(Duration::ZERO)
    }

    pub const fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub const fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    pub const fn serve_interval(&self) -> Duration {
        Duration::from_secs(self.serve_interval_secs)
    }

    /// A lock manager for these settings
    pub fn lock_manager(&self, clock: Arc<dyn Clock>) -> LockManager {
        LockManager::new(&self.lock_path)
            .with_clock(clock)
            .with_poll_interval(self.lock_poll_interval())
            .with_stale_after(self.stale_lock_after())
    }
}
