//! # Runtime Registry
//!
//! Ad-hoc entry points: run a job now, run it later, force-run it past a
//! disabled flag, and mutate the definition registry while the engine is
//! live. Everything funnels into the same dispatch path as cron work.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::job::{JobDefinition, RunPriority};

use super::core::{root_run, EngineCore};

/// When an ad-hoc scheduled run should fire.
#[derive(Debug, Clone, Copy)]
pub enum ScheduleAt {
    /// Relative to now.
    After(Duration),
    /// Absolute instant. If it is already further in the past than the
    /// expiry window by the time the run is dequeued, the run expires
    /// instead of executing.
    At(DateTime<Utc>),
}

/// Handle for ad-hoc requests against a live engine.
///
/// All run-producing operations are infallible by contract: unregistered job
/// types fall back to an ephemeral no-op definition, and requests after
/// shutdown produce a run that is immediately cancelled.
#[derive(Clone)]
pub struct RuntimeRegistry {
    core: Arc<EngineCore>,
}

impl RuntimeRegistry {
    pub(crate) fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }

    /// Run `job_name` immediately at Instant priority. Honors the disabled
    /// flag: a disabled definition's run is cancelled at dispatch instead of
    /// executed.
    pub fn run_instant_job(&self, job_name: &str, parameter: Option<Value>) -> Uuid {
        self.submit_instant(job_name, parameter, false)
    }

    /// Run `job_name` immediately, bypassing the disabled check.
    pub fn force_run_instant_job(&self, job_name: &str, parameter: Option<Value>) -> Uuid {
        self.submit_instant(job_name, parameter, true)
    }

    fn submit_instant(&self, job_name: &str, parameter: Option<Value>, forced: bool) -> Uuid {
        let definition = self.core.definition_or_ephemeral(job_name);
        let run = root_run(
            &self.core,
            definition,
            self.core.clock.now(),
            RunPriority::Instant,
            parameter,
            forced,
        );
        self.core.submit_run(run)
    }

    /// Run `job_name` once at a future time, at Deferred priority (ahead of
    /// recurring cron work, behind instant work).
    pub fn run_scheduled_job(
        &self,
        job_name: &str,
        when: ScheduleAt,
        parameter: Option<Value>,
    ) -> Uuid {
        let scheduled_at = match when {
            // A delay too large for chrono saturates at the far future
            // instead of collapsing to "now"
            ScheduleAt::After(delay) => chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| self.core.clock.now().checked_add_signed(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ScheduleAt::At(at) => at,
        };
        let definition = self.core.definition_or_ephemeral(job_name);
        let run = root_run(
            &self.core,
            definition,
            scheduled_at,
            RunPriority::Deferred,
            parameter,
            false,
        );
        self.core.submit_run(run)
    }

    /// Register a definition at runtime. Atomic with respect to scheduler
    /// ticks: a tick sees the definition either fully present or absent.
    pub fn register(&self, definition: JobDefinition) -> Result<()> {
        self.core.registry.register(definition)?;
        Ok(())
    }

    /// Remove a definition. Already-queued runs of it execute to completion.
    pub fn unregister(&self, job_name: &str) -> Result<()> {
        self.core.registry.unregister(job_name)
    }

    pub fn enable(&self, job_name: &str) -> Result<()> {
        self.core.registry.enable(job_name)
    }

    pub fn disable(&self, job_name: &str) -> Result<()> {
        self.core.registry.disable(job_name)
    }
}
