//! Exponential backoff with a ceiling for item retries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterMode {
    /// No jitter; delays are deterministic.
    #[default]
    None,
    /// Random from 0 to the computed delay.
    Full,
}

/// Backoff parameters: `min(base * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Backoff {
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter mode.
    pub jitter: JitterMode,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter: JitterMode::None,
        }
    }
}

impl Backoff {
    /// Creates a backoff with the given base and cap, no jitter.
    #[must_use]
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter: JitterMode::None,
        }
    }

    /// Sets the jitter mode.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay before a retry.
    ///
    /// `attempt` counts retries, not attempts overall: the first retry
    /// (the second attempt of the item) passes 1 and waits the base
    /// delay, the second passes 2 and waits double, up to the cap. A
    /// caller holding the upcoming attempt number passes
    /// `next_attempt - 1`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let raw = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterMode::None => raw,
            JitterMode::Full => {
                if raw == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=raw)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}
