use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::RunState;

/// One observed run state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTransitionEvent {
    pub run_id: Uuid,
    pub correlation_id: Uuid,
    pub job_name: String,
    pub from: Option<RunState>,
    pub to: RunState,
    pub timestamp: DateTime<Utc>,
    /// Causing fault, set only for transitions into `Faulted`.
    pub fault: Option<String>,
    pub attempt: u32,
}

/// Events published to progress subscribers.
///
/// One broadcast channel carries every event, so delivery order within a
/// correlation id matches transition order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    RunTransition(RunTransitionEvent),
    OrchestrationStarted {
        correlation_id: Uuid,
        root_run_id: Uuid,
        job_name: String,
        timestamp: DateTime<Utc>,
    },
    OrchestrationCompleted {
        correlation_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Self::RunTransition(event) => event.correlation_id,
            Self::OrchestrationStarted { correlation_id, .. } => *correlation_id,
            Self::OrchestrationCompleted { correlation_id, .. } => *correlation_id,
        }
    }
}
