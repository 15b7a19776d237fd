//! Retry policy: decides, per faulted run, whether another attempt is
//! warranted and how long to back off first.

use std::time::Duration;

use crate::config::EngineConfig;

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    Retry { delay: Duration },
    /// Leave the run in `Faulted` as its terminal state.
    GiveUp,
}

/// Pluggable retry policy.
///
/// `attempt` is the number of the attempt that just faulted (1 for the
/// first execution). The fault message is available for policies that
/// distinguish transient from permanent failures.
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, attempt: u32, fault: &str) -> RetryDecision;
}

/// Default policy: bounded attempts with a table-driven, multiplier-extended
/// backoff delay.
#[derive(Debug, Clone)]
pub struct BackoffRetryPolicy {
    /// Maximum attempts, first execution included.
    pub max_attempts: u32,
    /// Delay table in seconds, indexed by attempt number.
    pub backoff_seconds: Vec<u64>,
    /// Multiplier applied past the end of the table.
    pub multiplier: f64,
    /// Cap on any single delay, in seconds.
    pub max_backoff_seconds: u64,
}

impl BackoffRetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.retry_limit,
            backoff_seconds: config.default_backoff_seconds.clone(),
            multiplier: config.backoff_multiplier,
            max_backoff_seconds: config.max_backoff_seconds,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let seconds = match self.backoff_seconds.get(index) {
            Some(&seconds) => seconds as f64,
            None => {
                let last = self.backoff_seconds.last().copied().unwrap_or(1) as f64;
                let overflow = (index + 1 - self.backoff_seconds.len()) as i32;
                last * self.multiplier.powi(overflow)
            }
        };
        Duration::from_secs((seconds as u64).min(self.max_backoff_seconds))
    }
}

impl Default for BackoffRetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy for BackoffRetryPolicy {
    fn decide(&self, attempt: u32, _fault: &str) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                delay: self.delay_for(attempt),
            }
        }
    }
}

/// Policy that never retries. Useful for jobs whose failures are known to be
/// permanent, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn decide(&self, _attempt: u32, _fault: &str) -> RetryDecision {
        RetryDecision::GiveUp
    }
}
