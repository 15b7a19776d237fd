//! # Scheduler Loop
//!
//! Single time-driven producer: each tick materializes one root run per due
//! cron trigger and sweeps expired queued runs. It only produces runs and
//! hands them off; execution happens asynchronously in the worker pool.

use std::sync::Arc;

use tracing::info;

use crate::job::RunPriority;

use super::core::{root_run, EngineCore};

pub struct SchedulerLoop {
    core: Arc<EngineCore>,
}

impl SchedulerLoop {
    pub fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }

    pub async fn run(self) {
        let tick = self.core.config.tick_interval;
        info!(tick_ms = tick.as_millis() as u64, "Scheduler loop started");
        loop {
            tokio::select! {
                _ = self.core.clock.sleep(tick) => {}
                _ = self.core.cancellation.cancelled() => break,
            }
            if self.core.is_shutdown() {
                break;
            }
            self.tick();
        }
        info!("Scheduler loop stopped");
    }

    /// One evaluation pass: enqueue due cron work, expire overdue waiters,
    /// and nudge the dispatcher (also re-examines deferred runs that may
    /// have become due).
    fn tick(&self) {
        let now = self.core.clock.now();

        for due in self.core.registry.due_definitions(now) {
            let run = root_run(
                &self.core,
                due.definition,
                due.occurrence,
                RunPriority::Normal,
                None,
                false,
            );
            self.core.submit_run(run);
        }

        self.core.expire_overdue(now);
        self.core.dispatch_wake.notify_one();
    }
}
