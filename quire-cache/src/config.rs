//! Cache and coalescing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use quire_core::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_ENTRIES, DEFAULT_RETRY_INTERVAL_MS,
    DEFAULT_SWEEP_MULTIPLIER, DEFAULT_TTL_SECONDS,
};
use quire_core::error::{QuireError, Result};

/// Smallest sweep period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Cache configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Default TTL in seconds
    pub default_ttl_seconds: u64,
    /// Sweep period as a multiple of the default TTL
    pub sweep_multiplier: f64,
    /// Delay between a follower's checks on an in-flight render
    pub retry_interval_ms: u64,
    /// Checks a follower makes before giving up
    pub max_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            sweep_multiplier: DEFAULT_SWEEP_MULTIPLIER,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl CacheConfig {
    /// TTL applied by `set` when none is given.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Period of the background sweep.
    pub fn sweep_interval(&self) -> Duration {
        let secs = self.default_ttl_seconds as f64 * self.sweep_multiplier;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MIN_SWEEP_INTERVAL)
            .max(MIN_SWEEP_INTERVAL)
    }

    /// Delay between follower checks.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Longest a follower waits before reporting a timeout.
    pub fn wait_budget(&self) -> Duration {
        self.retry_interval() * self.max_attempts
    }

    /// Rejects settings that would break expiry or the follower wait.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(QuireError::ConfigError("max_entries must be at least 1".into()));
        }
        if self.default_ttl_seconds == 0 {
            return Err(QuireError::ConfigError("default_ttl_seconds must be positive".into()));
        }
        if !self.sweep_multiplier.is_finite() || self.sweep_multiplier <= 0.0 {
            return Err(QuireError::ConfigError(format!(
                "sweep_multiplier must be a positive number, got {}",
                self.sweep_multiplier
            )));
        }
        if self.retry_interval_ms == 0 || self.max_attempts == 0 {
            return Err(QuireError::ConfigError(
                "retry_interval_ms and max_attempts must be positive".into(),
            ));
        }
        if self.wait_budget() >= self.default_ttl() {
            tracing::warn!(
                wait_budget_ms = self.wait_budget().as_millis() as u64,
                ttl_s = self.default_ttl_seconds,
                "Follower wait budget reaches the entry TTL; pending renders may expire under waiters"
            );
        }
        Ok(())
    }
}
