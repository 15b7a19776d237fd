// Orchestration layer: the shared engine core, the time-driven scheduler
// loop, the priority dispatch queue and worker pool, the orchestration-tree
// tracker, and the ad-hoc runtime registry.

pub mod core;
pub mod dispatch_queue;
pub mod runtime;
pub mod scheduler_loop;
pub mod tracker;
pub mod worker_pool;

pub use core::EngineCore;
pub use dispatch_queue::DispatchQueue;
pub use runtime::{RuntimeRegistry, ScheduleAt};
pub use scheduler_loop::SchedulerLoop;
pub use tracker::OrchestrationTracker;
pub use worker_pool::WorkerPool;
