//! Public engine facade: construction, lifecycle, and the host-facing
//! handles (runtime registry, progress subscription).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::handler::{NoopScopeProvider, ScopeProvider};
use crate::job::JobDefinition;
use crate::orchestration::{EngineCore, RuntimeRegistry, SchedulerLoop, WorkerPool};
use crate::retry::{BackoffRetryPolicy, RetryPolicy};

/// Builder for a [`SchedulerEngine`].
///
/// Everything has a default: system clock, backoff retry policy from the
/// config, no-op scope provider.
pub struct SchedulerEngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    scope_provider: Option<Arc<dyn ScopeProvider>>,
}

impl SchedulerEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn scope_provider(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.scope_provider = Some(provider);
        self
    }

    pub fn build(self) -> SchedulerEngine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let retry_policy = self
            .retry_policy
            .unwrap_or_else(|| Arc::new(BackoffRetryPolicy::from_config(&self.config)));
        let scope_provider = self
            .scope_provider
            .unwrap_or_else(|| Arc::new(NoopScopeProvider));
        let core = EngineCore::new(self.config, clock, retry_policy, scope_provider);
        SchedulerEngine {
            runtime: RuntimeRegistry::new(Arc::clone(&core)),
            core,
            started: AtomicBool::new(false),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

/// In-process job scheduling and orchestration engine.
///
/// Construct with [`SchedulerEngine::builder`], register definitions, then
/// [`start`](Self::start). The engine runs until
/// [`shutdown`](Self::shutdown).
pub struct SchedulerEngine {
    core: Arc<EngineCore>,
    runtime: RuntimeRegistry,
    started: AtomicBool,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerEngine {
    pub fn builder() -> SchedulerEngineBuilder {
        SchedulerEngineBuilder {
            config: EngineConfig::default(),
            clock: None,
            retry_policy: None,
            scope_provider: None,
        }
    }

    /// Engine with all defaults.
    pub fn new(config: EngineConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Register a job definition. Usable before or after `start`.
    pub fn register_job(&self, definition: JobDefinition) -> Result<()> {
        self.core.registry.register(definition)?;
        Ok(())
    }

    /// Spawn the scheduler loop and the dispatch loop. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Engine start requested twice, ignoring");
            return;
        }
        info!("Engine starting");
        let scheduler = SchedulerLoop::new(Arc::clone(&self.core));
        let pool = WorkerPool::new(Arc::clone(&self.core));
        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(scheduler.run()));
        handles.push(tokio::spawn(pool.run()));
    }

    /// Handle for ad-hoc requests (instant runs, runtime registration).
    pub fn runtime(&self) -> RuntimeRegistry {
        self.runtime.clone()
    }

    /// Subscribe to the progress event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.reporter.subscribe()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.core.clock)
    }

    /// Stop producing runs, cancel pending work, signal executing handlers,
    /// and wait for the loops to wind down.
    pub async fn shutdown(&self) {
        self.core.shutdown();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(error = %error, "Engine loop ended abnormally");
            }
        }
        info!("Engine shut down");
    }
}
