use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::definition::JobDefinition;

/// Dispatch priority class. Lower discriminant dispatches first; FIFO within
/// a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPriority {
    /// Instant and forced runs
    Instant = 0,
    /// Ad-hoc runs scheduled ahead of time
    Deferred = 1,
    /// Recurring cron work
    Normal = 2,
}

/// One concrete (pending or executing) instance of a job definition.
#[derive(Clone)]
pub struct JobRun {
    pub run_id: Uuid,
    /// Set when this run was spawned by another run.
    pub parent_run_id: Option<Uuid>,
    /// Inherited from the parent for dependents, freshly generated for roots.
    /// Ties a whole execution tree together.
    pub correlation_id: Uuid,
    pub definition: Arc<JobDefinition>,
    pub scheduled_at: DateTime<Utc>,
    /// Explicit override or the definition default.
    pub parameter: Value,
    /// Snapshot of the parent's output at spawn time, if handed down.
    pub parent_output: Option<Value>,
    pub priority: RunPriority,
    /// Grace period after `scheduled_at` before the run is abandoned.
    pub expiry: Duration,
    /// Execution attempts so far; 0 until the first slot is acquired.
    pub attempt: u32,
    /// Forced runs bypass the disabled-definition check.
    pub forced: bool,
}

impl std::fmt::Debug for JobRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRun")
            .field("run_id", &self.run_id)
            .field("job", &self.definition.name())
            .field("parent_run_id", &self.parent_run_id)
            .field("correlation_id", &self.correlation_id)
            .field("scheduled_at", &self.scheduled_at)
            .field("priority", &self.priority)
            .field("attempt", &self.attempt)
            .field("forced", &self.forced)
            .finish()
    }
}

impl JobRun {
    /// Root run: no parent, fresh correlation id.
    pub fn root(
        definition: Arc<JobDefinition>,
        scheduled_at: DateTime<Utc>,
        priority: RunPriority,
        parameter: Option<Value>,
        expiry: Duration,
    ) -> Self {
        let parameter = parameter.unwrap_or_else(|| definition.default_parameter().clone());
        Self {
            run_id: Uuid::new_v4(),
            parent_run_id: None,
            correlation_id: Uuid::new_v4(),
            definition,
            scheduled_at,
            parameter,
            parent_output: None,
            priority,
            expiry,
            attempt: 0,
            forced: false,
        }
    }

    /// Dependent run: parent link and correlation id inherited.
    pub fn dependent(
        definition: Arc<JobDefinition>,
        parent: &JobRun,
        scheduled_at: DateTime<Utc>,
        parameter: Option<Value>,
        parent_output: Option<Value>,
        expiry: Duration,
    ) -> Self {
        let parameter = parameter.unwrap_or_else(|| definition.default_parameter().clone());
        Self {
            run_id: Uuid::new_v4(),
            parent_run_id: Some(parent.run_id),
            correlation_id: parent.correlation_id,
            definition,
            scheduled_at,
            parameter,
            parent_output,
            priority: parent.priority,
            expiry,
            attempt: 0,
            forced: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn job_name(&self) -> &str {
        self.definition.name()
    }

    /// A run is the root of its orchestration iff it has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_run_id.is_none()
    }

    /// Whether the run has waited past its grace period without starting.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.expiry) {
            Ok(window) => now - self.scheduled_at > window,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoopHandler;

    fn test_definition() -> Arc<JobDefinition> {
        Arc::new(JobDefinition::new("test-job", Arc::new(NoopHandler)))
    }

    #[test]
    fn test_priority_ordering() {
        assert!(RunPriority::Instant < RunPriority::Deferred);
        assert!(RunPriority::Deferred < RunPriority::Normal);
    }

    #[test]
    fn test_root_run_gets_fresh_correlation() {
        let definition = test_definition();
        let now = Utc::now();
        let a = JobRun::root(
            Arc::clone(&definition),
            now,
            RunPriority::Normal,
            None,
            Duration::from_secs(60),
        );
        let b = JobRun::root(
            definition,
            now,
            RunPriority::Normal,
            None,
            Duration::from_secs(60),
        );
        assert!(a.is_root());
        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_dependent_inherits_correlation() {
        let definition = test_definition();
        let now = Utc::now();
        let parent = JobRun::root(
            Arc::clone(&definition),
            now,
            RunPriority::Instant,
            None,
            Duration::from_secs(60),
        );
        let child = JobRun::dependent(
            definition,
            &parent,
            now,
            None,
            Some(serde_json::json!({"from": "parent"})),
            Duration::from_secs(60),
        );
        assert!(!child.is_root());
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.parent_run_id, Some(parent.run_id));
        assert_eq!(child.priority, RunPriority::Instant);
    }

    #[test]
    fn test_expiry_window() {
        let run = JobRun::root(
            test_definition(),
            Utc::now(),
            RunPriority::Normal,
            None,
            Duration::from_secs(30),
        );
        assert!(!run.is_expired_at(run.scheduled_at + chrono::Duration::seconds(30)));
        assert!(run.is_expired_at(run.scheduled_at + chrono::Duration::seconds(31)));
    }
}
