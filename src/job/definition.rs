use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cron::Schedule;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::handler::JobHandler;

/// One cron trigger attached to a definition.
///
/// A definition may carry several; each trigger independently produces runs.
#[derive(Debug, Clone)]
pub struct JobTrigger {
    expression: String,
    schedule: Schedule,
}

impl JobTrigger {
    pub fn parse(job: &str, expression: &str) -> Result<Self> {
        let schedule =
            Schedule::from_str(expression).map_err(|source| EngineError::InvalidCronExpression {
                job: job.to_string(),
                expression: expression.to_string(),
                source,
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }
}

/// Static description of a schedulable unit of work.
///
/// Immutable once registered; the enabled flag lives in the registry so that
/// runtime toggles are serialized with dispatch decisions.
pub struct JobDefinition {
    name: String,
    handler: Arc<dyn JobHandler>,
    triggers: Vec<JobTrigger>,
    default_parameter: Value,
    /// Maximum simultaneously executing runs of this definition.
    /// `None` defers to `EngineConfig::default_job_concurrency`.
    concurrency_limit: Option<usize>,
    /// Grace period override; `None` defers to `EngineConfig::default_expiry`.
    expiry: Option<Duration>,
    /// Whether the definition starts out enabled.
    enabled: bool,
    /// Marker for definitions fabricated on the fly for instant runs of
    /// unregistered types.
    ephemeral: bool,
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field(
                "triggers",
                &self
                    .triggers
                    .iter()
                    .map(JobTrigger::expression)
                    .collect::<Vec<_>>(),
            )
            .field("concurrency_limit", &self.concurrency_limit)
            .field("enabled", &self.enabled)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            triggers: Vec::new(),
            default_parameter: Value::Null,
            concurrency_limit: None,
            expiry: None,
            enabled: true,
            ephemeral: false,
        }
    }

    /// Ephemeral definition backing an instant run of an unregistered type.
    pub(crate) fn ephemeral(name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        let mut definition = Self::new(name, handler);
        definition.ephemeral = true;
        definition
    }

    /// Attach a cron trigger. Fails fast on an invalid expression.
    pub fn with_cron(mut self, expression: &str) -> Result<Self> {
        let trigger = JobTrigger::parse(&self.name, expression)?;
        self.triggers.push(trigger);
        Ok(self)
    }

    pub fn with_default_parameter(mut self, parameter: Value) -> Self {
        self.default_parameter = parameter;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> Arc<dyn JobHandler> {
        Arc::clone(&self.handler)
    }

    pub fn triggers(&self) -> &[JobTrigger] {
        &self.triggers
    }

    pub fn default_parameter(&self) -> &Value {
        &self.default_parameter
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        self.concurrency_limit
    }

    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }

    pub fn starts_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoopHandler;

    #[test]
    fn test_invalid_cron_is_a_configuration_error() {
        let result = JobDefinition::new("broken", Arc::new(NoopHandler)).with_cron("not a cron");
        assert!(matches!(
            result,
            Err(EngineError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn test_multiple_triggers() {
        let definition = JobDefinition::new("report", Arc::new(NoopHandler))
            .with_cron("0 * * * * *")
            .unwrap()
            .with_cron("30 * * * * *")
            .unwrap();
        assert_eq!(definition.triggers().len(), 2);
        assert_eq!(definition.triggers()[0].expression(), "0 * * * * *");
    }

    #[test]
    fn test_defaults() {
        let definition = JobDefinition::new("plain", Arc::new(NoopHandler));
        assert!(definition.starts_enabled());
        assert!(definition.concurrency_limit().is_none());
        assert!(definition.triggers().is_empty());
        assert!(!definition.is_ephemeral());
    }
}
