//! # Handler Contract
//!
//! The seam between the engine and host-provided job code: the [`JobHandler`]
//! trait, the [`JobContext`] a handler executes against, the
//! [`CancellationSignal`] propagated into running handlers, and the
//! [`ScopeProvider`] hook the host uses to build per-run resource scopes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// A schedulable unit of work.
///
/// Returning `Err` marks the run `Faulted` and routes it through the retry
/// policy; the fault never crosses into other runs or the host. Panics inside
/// `execute` are contained by the worker pool and treated as faults.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<()>;
}

/// Handler that does nothing, successfully.
///
/// Backs the ephemeral definitions created for instant-run requests against
/// unregistered job types.
#[derive(Debug, Default)]
pub struct NoopHandler;

#[async_trait]
impl JobHandler for NoopHandler {
    async fn execute(&self, _ctx: JobContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Request for a dependent run, issued by a handler while it executes.
#[derive(Debug, Clone)]
pub struct DependentRequest {
    /// Job type/name the dependent should execute.
    pub job_name: String,
    /// Explicit parameter; `None` falls back to the definition default.
    pub parameter: Option<Value>,
    /// Hand the current run's output to the dependent as its parent output.
    pub inherit_output: bool,
}

/// Sink for dependent-run requests.
///
/// Implemented by the engine core; handlers only see it through
/// [`JobContext::spawn_dependent`].
pub trait DependentSink: Send + Sync {
    /// Create and enqueue a run with parent = `parent_run_id`, inheriting the
    /// parent's correlation id. Returns the new run id.
    fn spawn_dependent(&self, parent_run_id: Uuid, request: DependentRequest) -> Result<Uuid>;
}

/// Cooperative cancellation flag shared between the engine and handlers.
///
/// The engine trips it on shutdown; a handler's response to cancellation is
/// its own responsibility.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when cancellation is requested. Resolves immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut notified = std::pin::pin!(self.notify.notified());
        loop {
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }
}

/// Execution context handed to a [`JobHandler`].
pub struct JobContext {
    run_id: Uuid,
    correlation_id: Uuid,
    attempt: u32,
    parameter: Value,
    parent_output: Option<Value>,
    output: Arc<Mutex<Option<Value>>>,
    cancellation: CancellationSignal,
    sink: Arc<dyn DependentSink>,
}

impl JobContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_id: Uuid,
        correlation_id: Uuid,
        attempt: u32,
        parameter: Value,
        parent_output: Option<Value>,
        output: Arc<Mutex<Option<Value>>>,
        cancellation: CancellationSignal,
        sink: Arc<dyn DependentSink>,
    ) -> Self {
        Self {
            run_id,
            correlation_id,
            attempt,
            parameter,
            parent_output,
            output,
            cancellation,
            sink,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Execution attempt, starting at 1 for the first attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Effective parameter: the explicit override if the run carried one,
    /// otherwise the definition default.
    pub fn parameter(&self) -> &Value {
        &self.parameter
    }

    /// Output produced by the parent run, if this run is a dependent and the
    /// parent chose to hand it down.
    pub fn parent_output(&self) -> Option<&Value> {
        self.parent_output.as_ref()
    }

    /// Set this run's output. Dependents spawned with `inherit_output` see
    /// the value current at spawn time; the engine never interprets it.
    pub fn set_output(&self, value: Value) {
        *self.output.lock() = Some(value);
    }

    /// Cancellation signal for this run. Trips on engine shutdown.
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Request a dependent run of `job_name`. The dependent joins this run's
    /// orchestration and contends for dispatch like any other run.
    pub fn spawn_dependent(
        &self,
        job_name: impl Into<String>,
        parameter: Option<Value>,
    ) -> Result<Uuid> {
        self.sink.spawn_dependent(
            self.run_id,
            DependentRequest {
                job_name: job_name.into(),
                parameter,
                inherit_output: false,
            },
        )
    }

    /// Like [`spawn_dependent`](Self::spawn_dependent), but the dependent
    /// receives this run's current output as its parent output.
    pub fn spawn_dependent_with_output(
        &self,
        job_name: impl Into<String>,
        parameter: Option<Value>,
    ) -> Result<Uuid> {
        self.sink.spawn_dependent(
            self.run_id,
            DependentRequest {
                job_name: job_name.into(),
                parameter,
                inherit_output: true,
            },
        )
    }
}

/// Per-run resource scope built by the host before a handler executes.
#[async_trait]
pub trait JobScope: Send {
    /// Release the scope. Called exactly once per started run, on every exit
    /// path (completion, fault, cancellation).
    async fn dispose(self: Box<Self>);
}

/// Host hook that builds an isolated [`JobScope`] per started run.
#[async_trait]
pub trait ScopeProvider: Send + Sync {
    async fn enter(&self, run_id: Uuid, job_name: &str) -> Box<dyn JobScope>;
}

/// Default provider: scopes with no resources attached.
#[derive(Debug, Default)]
pub struct NoopScopeProvider;

struct NoopScope;

#[async_trait]
impl JobScope for NoopScope {
    async fn dispose(self: Box<Self>) {}
}

#[async_trait]
impl ScopeProvider for NoopScopeProvider {
    async fn enter(&self, _run_id: Uuid, _job_name: &str) -> Box<dyn JobScope> {
        Box::new(NoopScope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_signal_resolves() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::task::yield_now().await;
        signal.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve after cancel")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_tripped() {
        let signal = CancellationSignal::new();
        signal.cancel();
        signal.cancelled().await;
    }
}
