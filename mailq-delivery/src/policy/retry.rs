//! Retry policy for deferred messages.
//!
//! Decides how long a deferred message waits before its next attempt, and
//! when a message has been deferred often enough that it should fail.

use std::time::{Duration, SystemTime};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff curve between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Backoff {
    /// The same delay every time
    Fixed {
        #[serde(default = "defaults::fixed_delay_secs")]
        delay_secs: u64,
    },

    /// `min(base * 2^retries, max) * (1 ± jitter_factor)`
    Exponential {
        #[serde(default = "defaults::base_secs")]
        base_secs: u64,
        #[serde(default = "defaults::max_secs")]
        max_secs: u64,
        #[serde(default = "defaults::jitter_factor")]
        jitter_factor: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base_secs: defaults::base_secs(),
            max_secs: defaults::max_secs(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl Backoff {
    /// Delay before the next attempt, given the retries made so far.
    ///
    /// Never zero: a computed zero is raised to one second.
    pub fn delay(&self, retries: u32) -> Duration {
        let secs = match *self {
            Self::Fixed { delay_secs } => delay_secs,
            Self::Exponential {
                base_secs,
                max_secs,
                jitter_factor,
            } => {
                let delay = if retries >= 63 {
                    max_secs
                } else {
                    base_secs.saturating_mul(1u64 << retries).min(max_secs)
                };
                jittered(delay, jitter_factor)
            }
        };

        Duration::from_secs(secs.max(1))
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn jittered(delay: u64, jitter_factor: f64) -> u64 {
    let jitter_range = (delay as f64) * jitter_factor.clamp(0.0, 1.0);
    if jitter_range <= 0.0 {
        return delay;
    }

    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
    ((delay as f64) + jitter).max(0.0).round() as u64
}

/// Backoff plus an optional cap on deferrals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Deferrals allowed before a message fails outright; `None` = no cap
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(backoff: Backoff) -> Self {
        Self {
            max_retries: None,
            backoff,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether a message deferred `retries` times must now fail instead
    pub fn exhausted(&self, retries: u32) -> bool {
        self.max_retries.is_some_and(|max| retries >= max)
    }

    /// When a message deferred `retries` times so far becomes eligible again.
    ///
    /// Always strictly after `now`.
    pub fn next_attempt_at(&self, retries: u32, now: SystemTime) -> SystemTime {
        now + self.backoff.delay(retries)
    }
}

mod defaults {
    pub const fn fixed_delay_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn base_secs() -> u64 {
        60
    }

    pub const fn max_secs() -> u64 {
        86400 // 24 hours
    }

    pub const fn jitter_factor() -> f64 {
        0.1 // ±10%
    }
}
