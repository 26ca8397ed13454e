//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dispatch::backoff::{Backoff, JitterMode};

/// Tunables for dispatch, retry, and lease recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Items processed concurrently per wave.
    pub wave_size: usize,
    /// Fixed pause between waves in milliseconds.
    pub wave_pause_ms: u64,
    /// Base retry delay in milliseconds.
    pub base_delay_ms: u64,
    /// Retry delay ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter applied to retry delays.
    pub jitter: JitterMode,
    /// Maximum automatic attempts per work item.
    pub max_attempts: u32,
    /// Lease staleness window in seconds. A run whose latest event is
    /// older than this is treated as abandoned and reclaimed.
    pub staleness_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            wave_size: 3,
            wave_pause_ms: 250,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter: JitterMode::None,
            max_attempts: 3,
            staleness_secs: 180,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the wave size.
    #[must_use]
    pub fn with_wave_size(mut self, size: usize) -> Self {
        self.wave_size = size;
        self
    }

    /// Sets the inter-wave pause.
    #[must_use]
    pub fn with_wave_pause_ms(mut self, ms: u64) -> Self {
        self.wave_pause_ms = ms;
        self
    }

    /// Sets the base retry delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Sets the retry delay ceiling.
    #[must_use]
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Sets the jitter mode.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the per-item attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the lease staleness window.
    #[must_use]
    pub fn with_staleness_secs(mut self, secs: u64) -> Self {
        self.staleness_secs = secs;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.wave_size == 0 {
            return Err("wave_size must be >= 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be >= 1".to_string());
        }
        if self.staleness_secs == 0 {
            return Err("staleness_secs must be >= 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        Ok(())
    }

    /// The backoff derived from this config.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay_ms, self.max_delay_ms).with_jitter(self.jitter)
    }

    /// The inter-wave pause as a duration.
    #[must_use]
    pub fn wave_pause(&self) -> Duration {
        Duration::from_millis(self.wave_pause_ms)
    }
}
