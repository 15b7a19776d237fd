use serde::{Deserialize, Serialize};

/// Events that drive run state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEvent {
    /// Run handed to the dispatch queue
    Enqueue,
    /// Concurrency slot acquired, execution context being built
    Initialize,
    /// Handler invoked
    Start,
    /// Handler returned successfully, cleanup starting
    BeginCompletion,
    /// Cleanup finished
    Complete,
    /// Handler or setup faulted; carries the fault message
    Fail(String),
    /// Retry policy granted another attempt
    Retry,
    /// Run cancelled (engine shutdown, disabled definition, explicit request)
    Cancel,
    /// Run waited past its grace period
    Expire,
    /// Definition disabled at dispatch time
    Skip,
}

impl RunEvent {
    /// Short name used in transition errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::BeginCompletion => "begin_completion",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
            Self::Skip => "skip",
        }
    }
}
