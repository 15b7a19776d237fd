//! # Orchestration Tracker
//!
//! Groups a root run with every run it transitively spawns under one
//! correlation id, and detects when the whole tree is finished.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::events::{EngineEvent, ProgressReporter};
use crate::job::JobRun;
use crate::state_machine::{RunState, RunStore, TransitionObserver};

struct OrchestrationEntry {
    root_run_id: Uuid,
    /// Every run id sharing the correlation, root included. Dependents of
    /// dependents land here too, so a flat scan is transitively complete.
    members: Vec<Uuid>,
    completed_emitted: bool,
}

/// Tracks orchestration trees keyed by correlation id.
///
/// Emits exactly one `OrchestrationStarted` per root creation and exactly one
/// `OrchestrationCompleted` the first time the root and every known member
/// are terminal. Because dependents register before their parent can reach a
/// terminal state, a run spawning work just before it finishes re-arms the
/// completeness check instead of losing the final event.
pub struct OrchestrationTracker {
    store: Arc<RunStore>,
    reporter: ProgressReporter,
    clock: Arc<dyn Clock>,
    entries: DashMap<Uuid, OrchestrationEntry>,
}

impl OrchestrationTracker {
    pub fn new(store: Arc<RunStore>, reporter: ProgressReporter, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            reporter,
            clock,
            entries: DashMap::new(),
        }
    }

    /// Open a new orchestration for a root run.
    pub fn register_root(&self, run: &JobRun) {
        debug_assert!(run.is_root());
        self.entries.insert(
            run.correlation_id,
            OrchestrationEntry {
                root_run_id: run.run_id,
                members: vec![run.run_id],
                completed_emitted: false,
            },
        );
        debug!(
            correlation_id = %run.correlation_id,
            root_run_id = %run.run_id,
            job = run.job_name(),
            "Orchestration started"
        );
        self.reporter.publish(EngineEvent::OrchestrationStarted {
            correlation_id: run.correlation_id,
            root_run_id: run.run_id,
            job_name: run.job_name().to_string(),
            timestamp: self.clock.now(),
        });
    }

    /// Append a dependent to its parent's orchestration.
    pub fn register_dependent(&self, run: &JobRun) {
        match self.entries.get_mut(&run.correlation_id) {
            Some(mut entry) => {
                entry.members.push(run.run_id);
                if entry.completed_emitted {
                    // Completed already went out; still track the member so
                    // state queries stay accurate
                    warn!(
                        correlation_id = %run.correlation_id,
                        run_id = %run.run_id,
                        "Dependent registered after orchestration completion"
                    );
                }
            }
            None => {
                warn!(
                    correlation_id = %run.correlation_id,
                    run_id = %run.run_id,
                    "Dependent registered for unknown orchestration"
                );
                self.entries.insert(
                    run.correlation_id,
                    OrchestrationEntry {
                        root_run_id: run.parent_run_id.unwrap_or(run.run_id),
                        members: vec![run.run_id],
                        completed_emitted: false,
                    },
                );
            }
        }
    }

    /// Recompute completeness for one orchestration and emit the completion
    /// event if this check is the first to observe it complete.
    pub fn reevaluate(&self, correlation_id: Uuid) {
        let Some(mut entry) = self.entries.get_mut(&correlation_id) else {
            return;
        };
        if entry.completed_emitted {
            return;
        }
        let all_terminal = entry
            .members
            .iter()
            .all(|run_id| self.store.is_terminal(*run_id));
        if !all_terminal {
            return;
        }
        entry.completed_emitted = true;
        info!(
            correlation_id = %correlation_id,
            root_run_id = %entry.root_run_id,
            members = entry.members.len(),
            "Orchestration completed"
        );
        self.reporter.publish(EngineEvent::OrchestrationCompleted {
            correlation_id,
            timestamp: self.clock.now(),
        });
    }

    /// Whether the orchestration has emitted its completion event.
    pub fn is_complete(&self, correlation_id: Uuid) -> bool {
        self.entries
            .get(&correlation_id)
            .map(|entry| entry.completed_emitted)
            .unwrap_or(false)
    }

    /// Member run ids for one orchestration (root included).
    pub fn members(&self, correlation_id: Uuid) -> Vec<Uuid> {
        self.entries
            .get(&correlation_id)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }
}

impl TransitionObserver for OrchestrationTracker {
    fn on_transition(&self, _run_id: Uuid, correlation_id: Uuid, _to: RunState, terminal: bool) {
        if terminal {
            self.reevaluate(correlation_id);
        }
    }
}
