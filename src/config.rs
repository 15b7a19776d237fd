use std::time::Duration;

use crate::error::{EngineError, Result};

/// Engine-wide configuration.
///
/// Everything here has a sensible default so the engine can be embedded with
/// `EngineConfig::default()`; hosts that prefer environment-driven setup can
/// use [`EngineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum resolution of the scheduler loop. Due triggers are evaluated
    /// once per tick.
    pub tick_interval: Duration,
    /// Global cap on simultaneously executing runs. `None` means effectively
    /// unbounded (per-definition limits still apply).
    pub max_concurrent_runs: Option<usize>,
    /// Per-definition concurrency limit used when a definition does not set
    /// its own.
    pub default_job_concurrency: usize,
    /// Grace period between a run's scheduled time and its actual start.
    /// Runs that wait longer are abandoned as `Expired`.
    pub default_expiry: Duration,
    /// Capacity of the progress broadcast channel.
    pub event_channel_capacity: usize,
    /// Maximum execution attempts for the default retry policy (first
    /// attempt included).
    pub retry_limit: u32,
    /// Backoff delay table for the default retry policy, in seconds.
    /// Attempts beyond the table extend the last entry by the multiplier.
    pub default_backoff_seconds: Vec<u64>,
    /// Upper bound on any single backoff delay, in seconds.
    pub max_backoff_seconds: u64,
    /// Multiplier applied past the end of the backoff table.
    pub backoff_multiplier: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_runs: None,
            default_job_concurrency: 1,
            default_expiry: Duration::from_secs(60),
            event_channel_capacity: 1000,
            retry_limit: 3,
            default_backoff_seconds: vec![1, 2, 4, 8, 16, 32],
            max_backoff_seconds: 300,
            backoff_multiplier: 2.0,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(tick_ms) = std::env::var("CRONWHEEL_TICK_INTERVAL_MS") {
            let ms: u64 = tick_ms.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid tick_interval_ms: {e}"))
            })?;
            config.tick_interval = Duration::from_millis(ms);
        }

        if let Ok(max_concurrent) = std::env::var("CRONWHEEL_MAX_CONCURRENT_RUNS") {
            config.max_concurrent_runs = Some(max_concurrent.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid max_concurrent_runs: {e}"))
            })?);
        }

        if let Ok(expiry_secs) = std::env::var("CRONWHEEL_DEFAULT_EXPIRY_SECS") {
            let secs: u64 = expiry_secs.parse().map_err(|e| {
                EngineError::Configuration(format!("Invalid default_expiry_secs: {e}"))
            })?;
            config.default_expiry = Duration::from_secs(secs);
        }

        if let Ok(retry_limit) = std::env::var("CRONWHEEL_RETRY_LIMIT") {
            config.retry_limit = retry_limit
                .parse()
                .map_err(|e| EngineError::Configuration(format!("Invalid retry_limit: {e}")))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.max_concurrent_runs, None);
        assert_eq!(config.default_job_concurrency, 1);
        assert_eq!(config.default_backoff_seconds, vec![1, 2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        std::env::set_var("CRONWHEEL_RETRY_LIMIT", "not-a-number");
        let result = EngineConfig::from_env();
        std::env::remove_var("CRONWHEEL_RETRY_LIMIT");
        assert!(result.is_err());
    }
}
