//! # Worker Pool
//!
//! Pulls runnable runs off the dispatch queue under the global and
//! per-definition concurrency budgets, executes their handlers, drives their
//! state transitions, and applies the retry policy on fault.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handler::JobContext;
use crate::job::RunPriority;
use crate::retry::RetryDecision;
use crate::state_machine::RunEvent;

use super::core::EngineCore;

pub struct WorkerPool {
    core: Arc<EngineCore>,
}

impl WorkerPool {
    pub fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }

    /// Dispatch loop: drains eligible work whenever woken by an enqueue, a
    /// slot release, or a scheduler tick. Exits on engine cancellation.
    pub async fn run(self) {
        info!("Dispatch loop started");
        loop {
            if self.core.is_shutdown() {
                break;
            }
            self.dispatch_ready();
            tokio::select! {
                _ = self.core.dispatch_wake.notified() => {}
                _ = self.core.cancellation.cancelled() => break,
            }
        }
        info!("Dispatch loop stopped");
    }

    /// Start every queued run both budgets currently allow.
    fn dispatch_ready(&self) {
        loop {
            if self.core.is_shutdown() {
                return;
            }

            // Global budget first: when it is saturated nothing dispatches,
            // so there is no point scanning the queue
            let permit = match &self.core.global_slots {
                Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            let core = &self.core;
            let now = core.clock.now();
            let candidate = core.queue.pop_eligible(|run_id| {
                let Some(run) = core.store.run(run_id) else {
                    // Unknown id: pop it so it cannot clog the lane
                    return true;
                };
                if run.scheduled_at > now {
                    return false;
                }
                // Per-definition budget: saturated means skip, not stall
                let limit = core.concurrency_limit_for(&run.definition);
                core.active_count(run.job_name()) < limit
            });

            let Some(run_id) = candidate else {
                return;
            };
            let Some(run) = core.store.run(run_id) else {
                continue;
            };

            // Re-check expiry and the enabled flag at dequeue time; both can
            // have changed while the run was queued
            if run.is_expired_at(now) {
                debug!(run_id = %run_id, job = run.job_name(), "Run expired at dequeue");
                core.apply(run_id, RunEvent::Expire);
                continue;
            }
            if !run.forced && !core.registry.is_enabled(run.job_name()) {
                debug!(run_id = %run_id, job = run.job_name(), "Definition disabled at dequeue");
                // Instant requests surface as Cancelled, recurring work as Skipped
                let event = if run.priority == RunPriority::Instant {
                    RunEvent::Cancel
                } else {
                    RunEvent::Skip
                };
                core.apply(run_id, event);
                continue;
            }

            core.acquire_job_slot(run.job_name());
            let core = Arc::clone(&self.core);
            tokio::spawn(async move {
                execute_run(core, run_id, permit).await;
            });
        }
    }
}

/// Drive one execution attempt end to end, then release both budgets and
/// wake the dispatcher.
async fn execute_run(core: Arc<EngineCore>, run_id: Uuid, permit: Option<OwnedSemaphorePermit>) {
    let job_name = core
        .store
        .run(run_id)
        .map(|run| run.job_name().to_string())
        .unwrap_or_default();

    drive_attempt(&core, run_id).await;

    core.release_job_slot(&job_name);
    drop(permit);
    core.dispatch_wake.notify_one();
}

async fn drive_attempt(core: &Arc<EngineCore>, run_id: Uuid) {
    let attempt = core.store.increment_attempt(run_id);

    // A cancel may have landed between dequeue and here; the transition
    // coming back dropped means the record is terminal and we stop quietly
    if core.apply(run_id, RunEvent::Initialize).is_none() {
        return;
    }
    let Some(run) = core.store.run(run_id) else {
        return;
    };

    let scope = core.scope_provider.enter(run_id, run.job_name()).await;

    if core.apply(run_id, RunEvent::Start).is_none() {
        // Cancelled while initializing; the scope was entered, release it
        scope.dispose().await;
        return;
    }

    let output_slot = core
        .store
        .output_slot(run_id)
        .unwrap_or_else(|| Arc::new(Mutex::new(None)));
    let ctx = JobContext::new(
        run_id,
        run.correlation_id,
        attempt,
        run.parameter.clone(),
        run.parent_output.clone(),
        output_slot,
        core.cancellation.clone(),
        Arc::clone(core) as Arc<dyn crate::handler::DependentSink>,
    );

    let handler = run.definition.handler();
    // Spawned so a panicking handler is contained and surfaces as a fault
    let joined = tokio::spawn(async move { handler.execute(ctx).await }).await;

    let outcome = match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(fault)) => Err(format!("{fault:#}")),
        Err(join_error) if join_error.is_panic() => Err(format!("handler panicked: {join_error}")),
        Err(join_error) => Err(format!("handler task aborted: {join_error}")),
    };

    match outcome {
        Ok(()) => {
            core.apply(run_id, RunEvent::BeginCompletion);
            scope.dispose().await;
            core.apply(run_id, RunEvent::Complete);
            debug!(run_id = %run_id, job = run.job_name(), attempt, "Run completed");
        }
        Err(fault) => {
            warn!(
                run_id = %run_id,
                job = run.job_name(),
                attempt,
                fault = %fault,
                "Run faulted"
            );
            core.apply(run_id, RunEvent::Fail(fault.clone()));
            scope.dispose().await;
            handle_fault(core, run_id, attempt, fault);
        }
    }
}

/// Route a fault through the retry policy: re-enqueue after backoff, or
/// leave the run terminally faulted.
fn handle_fault(core: &Arc<EngineCore>, run_id: Uuid, attempt: u32, fault: String) {
    match core.retry_policy.decide(attempt, &fault) {
        RetryDecision::Retry { delay } => {
            if core.apply(run_id, RunEvent::Retry).is_none() {
                return;
            }
            info!(
                run_id = %run_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying run after backoff"
            );
            let core = Arc::clone(core);
            tokio::spawn(async move {
                tokio::select! {
                    _ = core.clock.sleep(delay) => {
                        if core.is_shutdown() {
                            core.apply(run_id, RunEvent::Cancel);
                            return;
                        }
                        // The new attempt's grace period starts now
                        core.store.reschedule(run_id, core.clock.now());
                        let priority = core
                            .store
                            .run(run_id)
                            .map(|run| run.priority)
                            .unwrap_or(RunPriority::Normal);
                        core.queue.push(run_id, priority);
                        core.dispatch_wake.notify_one();
                    }
                    _ = core.cancellation.cancelled() => {
                        core.apply(run_id, RunEvent::Cancel);
                    }
                }
            });
        }
        RetryDecision::GiveUp => {
            warn!(
                run_id = %run_id,
                attempt,
                fault = %fault,
                "Retries exhausted, run is terminally faulted"
            );
            core.machine.mark_fault_terminal(run_id);
        }
    }
}
