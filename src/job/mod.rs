// Job model: static definitions and concrete run instances.

pub mod definition;
pub mod run;

pub use definition::{JobDefinition, JobTrigger};
pub use run::{JobRun, RunPriority};
