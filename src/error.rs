use thiserror::Error;

/// Errors surfaced by the engine itself.
///
/// Handler faults are deliberately absent here: a failing job is data (it
/// lands in the `Faulted` state and on the progress stream), never an
/// `EngineError`. These variants cover configuration mistakes and internal
/// invariant violations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate job name: {0}")]
    DuplicateJobName(String),

    #[error("invalid cron expression '{expression}' for job '{job}': {source}")]
    InvalidCronExpression {
        job: String,
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid state transition for run {run_id}: {from} -> {event}")]
    InvalidTransition {
        run_id: uuid::Uuid,
        from: String,
        event: String,
    },

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, EngineError>;
