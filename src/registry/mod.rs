// Definition registry: lookup, runtime enable/disable, and due-trigger
// evaluation for the scheduler loop.

pub mod job_registry;

pub use job_registry::{DueTrigger, JobRegistry};
