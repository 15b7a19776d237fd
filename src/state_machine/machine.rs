use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, ProgressReporter, RunTransitionEvent};
use crate::job::JobRun;

use super::events::RunEvent;
use super::states::RunState;

/// One recorded transition in a run's history.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: Option<RunState>,
    pub to: RunState,
    pub at: DateTime<Utc>,
    pub fault: Option<String>,
}

/// Mutable tracking record for one run.
pub struct RunRecord {
    pub run: JobRun,
    pub state: RunState,
    /// Most recent fault, set on transitions into `Faulted`.
    pub fault: Option<String>,
    /// Set when the retry policy has given up; makes `Faulted` terminal.
    pub fault_terminal: bool,
    pub history: Vec<StateTransition>,
    /// Output slot shared with the handler's execution context.
    pub output: Arc<Mutex<Option<Value>>>,
}

impl RunRecord {
    fn new(run: JobRun) -> Self {
        Self {
            run,
            state: RunState::default(),
            fault: None,
            fault_terminal: false,
            history: Vec::new(),
            output: Arc::new(Mutex::new(None)),
        }
    }

    /// Terminal means no further transitions: either an unconditionally
    /// terminal state, or `Faulted` after retries are exhausted.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal() || (self.state == RunState::Faulted && self.fault_terminal)
    }
}

/// In-memory store of every run the engine has materialized.
#[derive(Default)]
pub struct RunStore {
    records: DashMap<Uuid, RunRecord>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly created run. Returns its shared output slot.
    pub fn insert(&self, run: JobRun) -> Arc<Mutex<Option<Value>>> {
        let record = RunRecord::new(run);
        let output = Arc::clone(&record.output);
        self.records.insert(record.run.run_id, record);
        output
    }

    pub fn contains(&self, run_id: Uuid) -> bool {
        self.records.contains_key(&run_id)
    }

    pub fn state_of(&self, run_id: Uuid) -> Option<RunState> {
        self.records.get(&run_id).map(|r| r.state)
    }

    pub fn is_terminal(&self, run_id: Uuid) -> bool {
        self.records
            .get(&run_id)
            .map(|r| r.is_terminal())
            .unwrap_or(false)
    }

    /// Read a field of the record under the shard lock.
    pub fn with_record<T>(&self, run_id: Uuid, f: impl FnOnce(&RunRecord) -> T) -> Option<T> {
        self.records.get(&run_id).map(|r| f(&r))
    }

    /// Clone the run description (not the mutable tracking state).
    pub fn run(&self, run_id: Uuid) -> Option<JobRun> {
        self.records.get(&run_id).map(|r| r.run.clone())
    }

    /// Current value of the run's output slot.
    pub fn output_of(&self, run_id: Uuid) -> Option<Value> {
        self.records
            .get(&run_id)
            .and_then(|r| r.output.lock().clone())
    }

    pub fn output_slot(&self, run_id: Uuid) -> Option<Arc<Mutex<Option<Value>>>> {
        self.records.get(&run_id).map(|r| Arc::clone(&r.output))
    }

    /// Bump the attempt counter ahead of a new execution attempt.
    pub fn increment_attempt(&self, run_id: Uuid) -> u32 {
        match self.records.get_mut(&run_id) {
            Some(mut record) => {
                record.run.attempt += 1;
                record.run.attempt
            }
            None => 0,
        }
    }

    /// Move a run's scheduled time (used when a retry is re-enqueued, so the
    /// expiry window measures the new attempt, not the original schedule).
    pub fn reschedule(&self, run_id: Uuid, at: DateTime<Utc>) {
        if let Some(mut record) = self.records.get_mut(&run_id) {
            record.run.scheduled_at = at;
        }
    }

    /// Run ids that have not started executing and are not terminal
    /// (candidates for wholesale cancellation at shutdown).
    pub fn pending_run_ids(&self) -> Vec<Uuid> {
        self.records
            .iter()
            .filter(|r| r.state.is_pending() && !r.is_terminal())
            .map(|r| r.run.run_id)
            .collect()
    }

    /// Pending runs plus those still in `Initializing`: everything engine
    /// shutdown cancels wholesale. Runs already in `Running` are left to
    /// their handler's cancellation response.
    pub fn shutdown_cancellable_ids(&self) -> Vec<Uuid> {
        self.records
            .iter()
            .filter(|r| {
                !r.is_terminal() && (r.state.is_pending() || r.state == RunState::Initializing)
            })
            .map(|r| r.run.run_id)
            .collect()
    }
}

/// Observer invoked after every recorded transition.
///
/// The orchestration tracker hangs off this seam so the machine does not
/// depend on it directly.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, run_id: Uuid, correlation_id: Uuid, to: RunState, terminal: bool);
}

/// Drives run lifecycle transitions: validates them against the transition
/// table, records history, publishes progress events, and notifies the
/// transition observer.
pub struct RunStateMachine {
    store: Arc<RunStore>,
    reporter: ProgressReporter,
    clock: Arc<dyn Clock>,
    observers: parking_lot::RwLock<Vec<Arc<dyn TransitionObserver>>>,
}

impl RunStateMachine {
    pub fn new(store: Arc<RunStore>, reporter: ProgressReporter, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            reporter,
            clock,
            observers: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.observers.write().push(observer);
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Apply `event` to the run.
    ///
    /// Returns `Ok(Some(state))` when the transition was recorded,
    /// `Ok(None)` when it was idempotently dropped (terminal record, or a
    /// same-state transition outside `Retrying`), and an error for
    /// transitions the table does not allow (programming errors; loud).
    pub fn transition(&self, run_id: Uuid, event: RunEvent) -> Result<Option<RunState>> {
        let now = self.clock.now();
        let notification = {
            let mut record = self
                .store
                .records
                .get_mut(&run_id)
                .ok_or(EngineError::RunNotFound(run_id))?;

            if record.is_terminal() {
                debug!(
                    run_id = %run_id,
                    state = %record.state,
                    event = event.name(),
                    "Dropping transition against terminal run"
                );
                return Ok(None);
            }

            let current = record.state;
            let target = Self::determine_target_state(current, &event).ok_or_else(|| {
                EngineError::InvalidTransition {
                    run_id,
                    from: current.to_string(),
                    event: event.name().to_string(),
                }
            })?;

            // Self-transitions are suppressed except into Retrying, which
            // must be observable on every attempt
            if target == current && target != RunState::Retrying {
                return Ok(None);
            }

            let fault = match &event {
                RunEvent::Fail(fault) => Some(fault.clone()),
                _ => None,
            };
            if fault.is_some() {
                record.fault = fault.clone();
            }

            record.state = target;
            record.history.push(StateTransition {
                from: Some(current),
                to: target,
                at: now,
                fault: fault.clone(),
            });

            debug!(
                run_id = %run_id,
                job = record.run.job_name(),
                from = %current,
                to = %target,
                "Run state transition"
            );

            self.reporter
                .publish(EngineEvent::RunTransition(RunTransitionEvent {
                    run_id,
                    correlation_id: record.run.correlation_id,
                    job_name: record.run.job_name().to_string(),
                    from: Some(current),
                    to: target,
                    timestamp: now,
                    fault,
                    attempt: record.run.attempt,
                }));

            (record.run.correlation_id, target, record.is_terminal())
        };

        // Observers may read other records; notify outside the shard lock
        let (correlation_id, target, terminal) = notification;
        for observer in self.observers.read().iter() {
            observer.on_transition(run_id, correlation_id, target, terminal);
        }
        Ok(Some(target))
    }

    /// Mark a faulted run as beyond retry. The record becomes terminal and
    /// observers get a final notification.
    pub fn mark_fault_terminal(&self, run_id: Uuid) {
        let notification = match self.store.records.get_mut(&run_id) {
            Some(mut record) if record.state == RunState::Faulted => {
                record.fault_terminal = true;
                Some((record.run.correlation_id, record.state))
            }
            Some(record) => {
                warn!(
                    run_id = %run_id,
                    state = %record.state,
                    "mark_fault_terminal called on a run that is not Faulted"
                );
                None
            }
            None => None,
        };
        if let Some((correlation_id, state)) = notification {
            for observer in self.observers.read().iter() {
                observer.on_transition(run_id, correlation_id, state, true);
            }
        }
    }

    /// Transition table. `None` means the combination is not allowed.
    fn determine_target_state(current: RunState, event: &RunEvent) -> Option<RunState> {
        use RunEvent::*;
        use RunState::*;

        let target = match (current, event) {
            (NotStarted, Enqueue) => Scheduled,

            (Scheduled | Retrying, Initialize) => Initializing,
            (Initializing, Start) => Running,
            (Running, BeginCompletion) => Completing,
            (Completing, Complete) => Completed,

            (Initializing | Running, Fail(_)) => Faulted,
            (Faulted, Retry) => Retrying,

            (NotStarted | Scheduled | Initializing | Running | Retrying | Faulted, Cancel) => {
                Cancelled
            }
            (NotStarted | Scheduled | Retrying, Expire) => Expired,
            (Scheduled | Retrying, Skip) => Skipped,

            _ => return None,
        };
        Some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::handler::NoopHandler;
    use crate::job::{JobDefinition, RunPriority};
    use std::time::Duration;

    fn machine_with_run() -> (Arc<RunStore>, RunStateMachine, Uuid) {
        let store = Arc::new(RunStore::new());
        let machine = RunStateMachine::new(
            Arc::clone(&store),
            ProgressReporter::new(64),
            Arc::new(SystemClock),
        );
        let run = JobRun::root(
            Arc::new(JobDefinition::new("sm-test", Arc::new(NoopHandler))),
            Utc::now(),
            RunPriority::Normal,
            None,
            Duration::from_secs(60),
        );
        let run_id = run.run_id;
        store.insert(run);
        (store, machine, run_id)
    }

    #[test]
    fn test_happy_path() {
        let (store, machine, run_id) = machine_with_run();
        for event in [
            RunEvent::Enqueue,
            RunEvent::Initialize,
            RunEvent::Start,
            RunEvent::BeginCompletion,
            RunEvent::Complete,
        ] {
            assert!(machine.transition(run_id, event).unwrap().is_some());
        }
        assert_eq!(store.state_of(run_id), Some(RunState::Completed));
        assert!(store.is_terminal(run_id));
    }

    #[test]
    fn test_invalid_transition_is_loud() {
        let (_store, machine, run_id) = machine_with_run();
        // Cannot start a run that was never initialized
        let result = machine.transition(run_id, RunEvent::Start);
        assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
    }

    #[test]
    fn test_terminal_drops_are_silent() {
        let (store, machine, run_id) = machine_with_run();
        machine.transition(run_id, RunEvent::Cancel).unwrap();
        assert_eq!(store.state_of(run_id), Some(RunState::Cancelled));

        // Any further event is a no-op, not an error
        assert!(machine
            .transition(run_id, RunEvent::Enqueue)
            .unwrap()
            .is_none());
        assert!(machine
            .transition(run_id, RunEvent::Fail("late".into()))
            .unwrap()
            .is_none());
        assert_eq!(store.state_of(run_id), Some(RunState::Cancelled));
    }

    #[test]
    fn test_fault_and_retry_cycle() {
        let (store, machine, run_id) = machine_with_run();
        machine.transition(run_id, RunEvent::Enqueue).unwrap();
        machine.transition(run_id, RunEvent::Initialize).unwrap();
        machine.transition(run_id, RunEvent::Start).unwrap();
        machine
            .transition(run_id, RunEvent::Fail("boom".into()))
            .unwrap();
        assert_eq!(store.state_of(run_id), Some(RunState::Faulted));
        assert!(!store.is_terminal(run_id));

        machine.transition(run_id, RunEvent::Retry).unwrap();
        machine.transition(run_id, RunEvent::Initialize).unwrap();
        machine.transition(run_id, RunEvent::Start).unwrap();
        machine.transition(run_id, RunEvent::BeginCompletion).unwrap();
        machine.transition(run_id, RunEvent::Complete).unwrap();
        assert_eq!(store.state_of(run_id), Some(RunState::Completed));

        let fault = store.with_record(run_id, |r| r.fault.clone()).unwrap();
        assert_eq!(fault.as_deref(), Some("boom"));
    }

    #[test]
    fn test_exhausted_fault_is_terminal() {
        let (store, machine, run_id) = machine_with_run();
        machine.transition(run_id, RunEvent::Enqueue).unwrap();
        machine.transition(run_id, RunEvent::Initialize).unwrap();
        machine.transition(run_id, RunEvent::Start).unwrap();
        machine
            .transition(run_id, RunEvent::Fail("fatal".into()))
            .unwrap();
        machine.mark_fault_terminal(run_id);
        assert!(store.is_terminal(run_id));
        assert!(machine
            .transition(run_id, RunEvent::Retry)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_transition_events_are_published() {
        let (_store, machine, run_id) = machine_with_run();
        let mut rx = machine.reporter.subscribe();
        machine.transition(run_id, RunEvent::Enqueue).unwrap();
        match rx.try_recv().unwrap() {
            EngineEvent::RunTransition(event) => {
                assert_eq!(event.run_id, run_id);
                assert_eq!(event.from, Some(RunState::NotStarted));
                assert_eq!(event.to, RunState::Scheduled);
                assert!(event.fault.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_history_records_fault() {
        let (store, machine, run_id) = machine_with_run();
        machine.transition(run_id, RunEvent::Enqueue).unwrap();
        machine.transition(run_id, RunEvent::Initialize).unwrap();
        machine.transition(run_id, RunEvent::Start).unwrap();
        machine
            .transition(run_id, RunEvent::Fail("out of disk".into()))
            .unwrap();
        let history = store.with_record(run_id, |r| r.history.clone()).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].to, RunState::Faulted);
        assert_eq!(history[3].fault.as_deref(), Some("out of disk"));
    }
}
