pub mod publisher;
pub mod types;

pub use publisher::ProgressReporter;
pub use types::{EngineEvent, RunTransitionEvent};
