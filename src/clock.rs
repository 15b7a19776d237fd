//! Injectable time source.
//!
//! Every component reads time through [`Clock`] so that tests can drive the
//! scheduler deterministically with a [`VirtualClock`] instead of waiting on
//! wall-clock time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for (at least) the given duration, as measured by this clock.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by `chrono` and `tokio::time`.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Sleepers wake whenever [`VirtualClock::advance`] moves time past their
/// deadline; a single large advance releases every sleeper whose deadline it
/// crosses.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    now_millis: Arc<AtomicI64>,
    tick: Arc<Notify>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
            tick: Arc::new(Notify::new()),
        }
    }

    /// Move time forward and wake all sleepers.
    pub fn advance(&self, duration: Duration) {
        self.now_millis
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
        self.tick.notify_waiters();
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.now_millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now_millis.load(Ordering::SeqCst) + duration.as_millis() as i64;
        let mut notified = std::pin::pin!(self.tick.notified());
        loop {
            // Register interest before re-checking so an advance between the
            // check and the await cannot be missed
            notified.as_mut().enable();
            if self.now_millis.load(Ordering::SeqCst) >= deadline {
                return;
            }
            notified.as_mut().await;
            notified.set(self.tick.notified());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_virtual_clock_advance() {
        let clock = VirtualClock::new(Utc::now());
        let before = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - before).num_seconds(), 90);
    }

    #[tokio::test]
    async fn test_virtual_sleep_wakes_on_advance() {
        let clock = VirtualClock::new(Utc::now());
        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move { clock.sleep(Duration::from_secs(10)).await })
        };
        // Give the sleeper a chance to register
        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(10));
        tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .expect("sleeper should wake after advance")
            .unwrap();
    }
}
