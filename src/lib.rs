#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Cronwheel
//!
//! In-process job scheduling and orchestration engine, designed to be
//! embedded inside a long-running host process rather than run as a
//! standalone server.
//!
//! ## Overview
//!
//! Cronwheel schedules recurring (cron-triggered) and ad-hoc (instant or
//! deferred) units of work, executes them under a bounded concurrency
//! budget, tracks each execution through a well-defined lifecycle, retries
//! transient failures with pluggable backoff, and broadcasts every state
//! transition to external observers.
//!
//! The contract is at-least-once, in-process, single-writer: schedule state
//! is not persisted across restarts and nothing coordinates across
//! processes.
//!
//! ## Module Organization
//!
//! - [`job`] - Job definitions (static, cron-triggered) and job runs
//! - [`state_machine`] - Run lifecycle states, events, and the transition machine
//! - [`registry`] - Definition registry and due-trigger evaluation
//! - [`orchestration`] - Scheduler loop, dispatch queue, worker pool, tracker
//! - [`events`] - Progress event types and the broadcast reporter
//! - [`retry`] - Retry policies
//! - [`handler`] - Handler, context, scope, and cancellation contracts
//! - [`clock`] - Injectable time source (system and virtual)
//! - [`config`] - Engine configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cronwheel::{EngineConfig, JobDefinition, SchedulerEngine};
//! use cronwheel::handler::{JobContext, JobHandler};
//! use async_trait::async_trait;
//!
//! struct ReportJob;
//!
//! #[async_trait]
//! impl JobHandler for ReportJob {
//!     async fn execute(&self, ctx: JobContext) -> anyhow::Result<()> {
//!         println!("running with parameter {}", ctx.parameter());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = SchedulerEngine::new(EngineConfig::default());
//! engine.register_job(
//!     JobDefinition::new("nightly-report", Arc::new(ReportJob))
//!         .with_cron("0 0 2 * * *")?,
//! )?;
//! engine.start();
//!
//! // Ad-hoc work goes through the runtime registry
//! engine.runtime().run_instant_job("nightly-report", None);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod handler;
pub mod job;
pub mod logging;
pub mod orchestration;
pub mod registry;
pub mod retry;
pub mod state_machine;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::EngineConfig;
pub use engine::{SchedulerEngine, SchedulerEngineBuilder};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, ProgressReporter, RunTransitionEvent};
pub use handler::{JobContext, JobHandler, ScopeProvider};
pub use job::{JobDefinition, JobRun, RunPriority};
pub use orchestration::{RuntimeRegistry, ScheduleAt};
pub use retry::{BackoffRetryPolicy, NoRetryPolicy, RetryDecision, RetryPolicy};
pub use state_machine::RunState;
