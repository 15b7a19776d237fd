//! Shared fixtures for the integration suite: controllable handlers, a
//! counting scope provider, a zero-delay retry policy, and event-stream
//! helpers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use cronwheel::handler::{JobContext, JobHandler, JobScope, ScopeProvider};
use cronwheel::retry::{RetryDecision, RetryPolicy};
use cronwheel::{EngineEvent, RunState};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for the next event matching the predicate, with a timeout so a
/// missing event fails the test instead of hanging it.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<EngineEvent>,
    mut predicate: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("event channel closed");
        if predicate(&event) {
            return event;
        }
    }
}

/// Wait until `run_id` reaches `state`.
pub async fn await_run_state(
    rx: &mut broadcast::Receiver<EngineEvent>,
    run_id: Uuid,
    state: RunState,
) {
    next_matching(rx, |event| {
        matches!(
            event,
            EngineEvent::RunTransition(t) if t.run_id == run_id && t.to == state
        )
    })
    .await;
}

/// Collect the `to`-state sequence for one run until it reaches `until`.
pub async fn collect_states_until(
    rx: &mut broadcast::Receiver<EngineEvent>,
    run_id: Uuid,
    until: RunState,
) -> Vec<RunState> {
    let mut states = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for run transitions")
            .expect("event channel closed");
        if let EngineEvent::RunTransition(transition) = event {
            if transition.run_id == run_id {
                states.push(transition.to);
                if transition.to == until {
                    return states;
                }
            }
        }
    }
}

/// Handler that parks in `Running` until the gate is opened.
pub struct GateHandler {
    release: watch::Receiver<bool>,
}

pub fn gate() -> (watch::Sender<bool>, GateHandler) {
    let (tx, rx) = watch::channel(false);
    (tx, GateHandler { release: rx })
}

#[async_trait]
impl JobHandler for GateHandler {
    async fn execute(&self, _ctx: JobContext) -> anyhow::Result<()> {
        let mut release = self.release.clone();
        release
            .wait_for(|released| *released)
            .await
            .map_err(|_| anyhow::anyhow!("gate dropped"))?;
        Ok(())
    }
}

/// Handler that faults on its first `fail_attempts` attempts and then
/// succeeds.
pub struct FlakyHandler {
    pub fail_attempts: u32,
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<()> {
        if ctx.attempt() <= self.fail_attempts {
            anyhow::bail!("transient failure on attempt {}", ctx.attempt());
        }
        Ok(())
    }
}

/// Handler that records every parameter it was invoked with.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub invocations: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<()> {
        self.invocations.lock().push(ctx.parameter().clone());
        Ok(())
    }
}

/// Handler recording the parent output it received.
#[derive(Clone, Default)]
pub struct ParentOutputRecorder {
    pub seen: Arc<Mutex<Vec<Option<Value>>>>,
}

#[async_trait]
impl JobHandler for ParentOutputRecorder {
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<()> {
        self.seen.lock().push(ctx.parent_output().cloned());
        Ok(())
    }
}

/// Scope provider counting enters and disposes, to verify the exactly-once
/// release guarantee.
#[derive(Clone, Default)]
pub struct CountingScopeProvider {
    pub entered: Arc<AtomicUsize>,
    pub disposed: Arc<AtomicUsize>,
}

struct CountingScope {
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl JobScope for CountingScope {
    async fn dispose(self: Box<Self>) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScopeProvider for CountingScopeProvider {
    async fn enter(&self, _run_id: Uuid, _job_name: &str) -> Box<dyn JobScope> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        Box::new(CountingScope {
            disposed: Arc::clone(&self.disposed),
        })
    }
}

/// Retry policy with no backoff delay, for deterministic retry tests.
pub struct ZeroBackoffPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy for ZeroBackoffPolicy {
    fn decide(&self, attempt: u32, _fault: &str) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                delay: Duration::ZERO,
            }
        }
    }
}

/// Give freshly spawned engine loops a chance to park on the virtual clock
/// before the test advances it.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
