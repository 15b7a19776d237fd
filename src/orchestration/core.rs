//! # Engine Core
//!
//! Shared aggregate wiring the registry, run store/state machine, dispatch
//! queue, orchestration tracker, progress reporter, retry policy, and scope
//! provider together. The scheduler loop, worker pool, and runtime registry
//! all operate on one `Arc<EngineCore>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::ProgressReporter;
use crate::handler::{
    CancellationSignal, DependentRequest, DependentSink, JobHandler, NoopHandler, ScopeProvider,
};
use crate::job::{JobDefinition, JobRun, RunPriority};
use crate::registry::JobRegistry;
use crate::retry::RetryPolicy;
use crate::state_machine::{RunEvent, RunStateMachine, RunState, RunStore, TransitionObserver};

use super::tracker::OrchestrationTracker;

pub struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) registry: JobRegistry,
    pub(crate) store: Arc<RunStore>,
    pub(crate) machine: RunStateMachine,
    pub(crate) tracker: Arc<OrchestrationTracker>,
    pub(crate) queue: super::dispatch_queue::DispatchQueue,
    pub(crate) reporter: ProgressReporter,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
    pub(crate) scope_provider: Arc<dyn ScopeProvider>,
    /// Global concurrency budget; `None` means effectively unbounded.
    pub(crate) global_slots: Option<Arc<Semaphore>>,
    /// Currently executing runs per definition name.
    pub(crate) active_per_job: DashMap<String, usize>,
    /// Wakes the dispatch loop. `notify_one` buffers a permit, so a wake
    /// sent while the loop is busy is never lost.
    pub(crate) dispatch_wake: Notify,
    /// Host-wide cancellation: stops the loops and propagates into handlers.
    pub(crate) cancellation: CancellationSignal,
    shutdown: AtomicBool,
}

impl EngineCore {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        retry_policy: Arc<dyn RetryPolicy>,
        scope_provider: Arc<dyn ScopeProvider>,
    ) -> Arc<Self> {
        let store = Arc::new(RunStore::new());
        let reporter = ProgressReporter::new(config.event_channel_capacity);
        let tracker = Arc::new(OrchestrationTracker::new(
            Arc::clone(&store),
            reporter.clone(),
            Arc::clone(&clock),
        ));
        let machine = RunStateMachine::new(Arc::clone(&store), reporter.clone(), Arc::clone(&clock));
        machine.add_observer(Arc::clone(&tracker) as Arc<dyn TransitionObserver>);

        let global_slots = config
            .max_concurrent_runs
            .map(|count| Arc::new(Semaphore::new(count)));

        Arc::new(Self {
            registry: JobRegistry::new(Arc::clone(&clock)),
            store,
            machine,
            tracker,
            queue: super::dispatch_queue::DispatchQueue::new(),
            reporter,
            retry_policy,
            scope_provider,
            global_slots,
            active_per_job: DashMap::new(),
            dispatch_wake: Notify::new(),
            cancellation: CancellationSignal::new(),
            shutdown: AtomicBool::new(false),
            clock,
            config,
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Effective expiry window for a definition.
    pub fn expiry_for(&self, definition: &JobDefinition) -> Duration {
        definition.expiry().unwrap_or(self.config.default_expiry)
    }

    /// Effective per-definition concurrency limit.
    pub fn concurrency_limit_for(&self, definition: &JobDefinition) -> usize {
        definition
            .concurrency_limit()
            .unwrap_or(self.config.default_job_concurrency)
            .max(1)
    }

    /// Resolve a definition by name, falling back to an ephemeral no-op
    /// definition so instant requests for unregistered types never fail.
    pub fn definition_or_ephemeral(&self, name: &str) -> Arc<JobDefinition> {
        self.registry.get(name).unwrap_or_else(|| {
            debug!(job = name, "Unregistered job type, using ephemeral definition");
            Arc::new(JobDefinition::ephemeral(
                name,
                Arc::new(NoopHandler) as Arc<dyn JobHandler>,
            ))
        })
    }

    /// Track a new run and hand it to the dispatch queue.
    ///
    /// Roots open an orchestration; dependents join their parent's. After
    /// shutdown the run is recorded and immediately cancelled instead of
    /// queued, keeping runtime requests no-op-safe.
    pub fn submit_run(&self, run: JobRun) -> Uuid {
        let run_id = run.run_id;
        let priority = run.priority;
        let is_root = run.is_root();

        self.store.insert(run.clone());
        if is_root {
            self.tracker.register_root(&run);
        } else {
            self.tracker.register_dependent(&run);
        }

        if self.is_shutdown() {
            warn!(run_id = %run_id, job = run.job_name(), "Run submitted after shutdown, cancelling");
            self.apply(run_id, RunEvent::Cancel);
            return run_id;
        }

        debug!(
            run_id = %run_id,
            job = run.job_name(),
            priority = ?priority,
            scheduled_at = %run.scheduled_at,
            "Run enqueued"
        );
        self.apply(run_id, RunEvent::Enqueue);
        self.queue.push(run_id, priority);
        self.dispatch_wake.notify_one();
        run_id
    }

    /// Apply a state machine event, logging (not propagating) invalid
    /// transitions: by the time they surface here they are engine bugs, and
    /// the run in question is in an unknown state — loud beats fatal.
    pub(crate) fn apply(&self, run_id: Uuid, event: RunEvent) -> Option<RunState> {
        match self.machine.transition(run_id, event) {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(run_id = %run_id, error = %error, "State transition rejected");
                None
            }
        }
    }

    /// Currently executing runs of one definition.
    pub(crate) fn active_count(&self, job_name: &str) -> usize {
        self.active_per_job
            .get(job_name)
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    pub(crate) fn acquire_job_slot(&self, job_name: &str) {
        *self.active_per_job.entry(job_name.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn release_job_slot(&self, job_name: &str) {
        if let Some(mut entry) = self.active_per_job.get_mut(job_name) {
            *entry = entry.saturating_sub(1);
        }
    }

    /// Expire every queued run whose grace period has elapsed.
    pub fn expire_overdue(&self, now: DateTime<Utc>) {
        let store = &self.store;
        let expired = self.queue.drain_where(|run_id| {
            store
                .run(run_id)
                .map(|run| run.is_expired_at(now))
                .unwrap_or(true)
        });
        for run_id in expired {
            debug!(run_id = %run_id, "Run expired before execution");
            self.apply(run_id, RunEvent::Expire);
        }
    }

    /// Stop producing and dispatching work, cancel everything that has not
    /// started, and signal executing handlers.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Engine shutting down");
        self.cancellation.cancel();
        self.queue.drain_where(|_| true);
        // Everything that has not reached Running gets cancelled wholesale;
        // running handlers see the cancellation signal instead
        for run_id in self.store.shutdown_cancellable_ids() {
            self.apply(run_id, RunEvent::Cancel);
        }
        self.dispatch_wake.notify_one();
    }
}

impl DependentSink for EngineCore {
    fn spawn_dependent(&self, parent_run_id: Uuid, request: DependentRequest) -> Result<Uuid> {
        let parent = self
            .store
            .run(parent_run_id)
            .ok_or(crate::error::EngineError::RunNotFound(parent_run_id))?;
        let definition = self.definition_or_ephemeral(&request.job_name);
        let parent_output = if request.inherit_output {
            self.store.output_of(parent_run_id)
        } else {
            None
        };
        let expiry = self.expiry_for(&definition);
        let run = JobRun::dependent(
            definition,
            &parent,
            self.clock.now(),
            request.parameter,
            parent_output,
            expiry,
        );
        debug!(
            parent_run_id = %parent_run_id,
            run_id = %run.run_id,
            job = run.job_name(),
            "Dependent run requested"
        );
        Ok(self.submit_run(run))
    }
}

/// Helper used by the runtime registry and scheduler loop to build root runs.
pub(crate) fn root_run(
    core: &EngineCore,
    definition: Arc<JobDefinition>,
    scheduled_at: DateTime<Utc>,
    priority: RunPriority,
    parameter: Option<serde_json::Value>,
    forced: bool,
) -> JobRun {
    let expiry = core.expiry_for(&definition);
    let run = JobRun::root(definition, scheduled_at, priority, parameter, expiry);
    if forced {
        run.forced()
    } else {
        run
    }
}
