use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::job::JobDefinition;

/// A due trigger observed by the scheduler loop: which definition, which of
/// its triggers, and the occurrence time that came due.
#[derive(Debug, Clone)]
pub struct DueTrigger {
    pub definition: Arc<JobDefinition>,
    pub trigger_index: usize,
    pub occurrence: DateTime<Utc>,
}

struct RegisteredJob {
    definition: Arc<JobDefinition>,
    enabled: bool,
    /// Next-occurrence cursor per trigger, advanced as occurrences are
    /// handed out. `None` once a schedule has no future occurrences.
    cursors: Vec<Option<DateTime<Utc>>>,
}

/// Holds all registered job definitions behind one lock.
///
/// Every mutation (register, unregister, enable, disable) and every
/// dispatch-time read goes through the same `RwLock`, so concurrent
/// scheduler ticks never observe a half-applied change.
pub struct JobRegistry {
    clock: Arc<dyn Clock>,
    jobs: RwLock<HashMap<String, RegisteredJob>>,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a definition. Duplicate names are a fatal configuration
    /// error, never a silent overwrite.
    pub fn register(&self, definition: JobDefinition) -> Result<Arc<JobDefinition>> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(definition.name()) {
            return Err(EngineError::DuplicateJobName(definition.name().to_string()));
        }

        let now = self.clock.now();
        let definition = Arc::new(definition);
        let cursors = definition
            .triggers()
            .iter()
            .map(|trigger| trigger.schedule().after(&now).next())
            .collect();

        info!(
            job = definition.name(),
            triggers = definition.triggers().len(),
            enabled = definition.starts_enabled(),
            "Registered job definition"
        );

        jobs.insert(
            definition.name().to_string(),
            RegisteredJob {
                definition: Arc::clone(&definition),
                enabled: definition.starts_enabled(),
                cursors,
            },
        );
        Ok(definition)
    }

    /// Remove a definition. Runs already materialized from it keep their
    /// `Arc<JobDefinition>` and execute to completion.
    pub fn unregister(&self, name: &str) -> Result<()> {
        match self.jobs.write().remove(name) {
            Some(_) => {
                info!(job = name, "Unregistered job definition");
                Ok(())
            }
            None => Err(EngineError::UnknownJob(name.to_string())),
        }
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownJob(name.to_string()))?;
        job.enabled = enabled;
        info!(job = name, enabled, "Toggled job definition");
        Ok(())
    }

    /// Dispatch-time enabled check. A definition missing from the registry
    /// (unregistered while runs were queued) counts as enabled: the run was
    /// legal when created.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.jobs.read().get(name).map(|j| j.enabled).unwrap_or(true)
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.jobs.read().get(name).map(|j| Arc::clone(&j.definition))
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.read().keys().cloned().collect()
    }

    /// For each trigger whose next occurrence has arrived, hand out one
    /// `DueTrigger` and advance that trigger's cursor past `now`.
    ///
    /// One tuple per trigger per call: a long gap between ticks does not
    /// produce catch-up runs for missed occurrences.
    pub fn due_definitions(&self, now: DateTime<Utc>) -> Vec<DueTrigger> {
        let mut due = Vec::new();
        let mut jobs = self.jobs.write();
        for job in jobs.values_mut() {
            if !job.enabled {
                continue;
            }
            for (index, cursor) in job.cursors.iter_mut().enumerate() {
                let Some(occurrence) = *cursor else { continue };
                if occurrence <= now {
                    due.push(DueTrigger {
                        definition: Arc::clone(&job.definition),
                        trigger_index: index,
                        occurrence,
                    });
                    *cursor = job.definition.triggers()[index]
                        .schedule()
                        .after(&now)
                        .next();
                    debug!(
                        job = job.definition.name(),
                        trigger = index,
                        occurrence = %occurrence,
                        next = ?*cursor,
                        "Trigger due"
                    );
                }
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::handler::NoopHandler;
    use std::time::Duration;

    fn registry() -> (Arc<VirtualClock>, JobRegistry) {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let registry = JobRegistry::new(clock.clone());
        (clock, registry)
    }

    fn minutely_definition(name: &str) -> JobDefinition {
        JobDefinition::new(name, Arc::new(NoopHandler))
            .with_cron("0 * * * * *")
            .unwrap()
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let (_clock, registry) = registry();
        registry.register(minutely_definition("dup")).unwrap();
        let result = registry.register(minutely_definition("dup"));
        assert!(matches!(result, Err(EngineError::DuplicateJobName(_))));
    }

    #[test]
    fn test_due_definitions_advance_cursor() {
        let (clock, registry) = registry();
        registry.register(minutely_definition("minutely")).unwrap();

        // Nothing due yet
        assert!(registry.due_definitions(clock.now()).is_empty());

        clock.advance(Duration::from_secs(61));
        let due = registry.due_definitions(clock.now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].definition.name(), "minutely");

        // Cursor advanced past now: immediately asking again yields nothing
        assert!(registry.due_definitions(clock.now()).is_empty());
    }

    #[test]
    fn test_two_triggers_fire_independently() {
        let (clock, registry) = registry();
        let definition = JobDefinition::new("double", Arc::new(NoopHandler))
            .with_cron("0 * * * * *")
            .unwrap()
            .with_cron("0 * * * * *")
            .unwrap();
        registry.register(definition).unwrap();

        clock.advance(Duration::from_secs(61));
        let due = registry.due_definitions(clock.now());
        assert_eq!(due.len(), 2);
        assert_ne!(due[0].trigger_index, due[1].trigger_index);
    }

    #[test]
    fn test_no_catch_up_for_missed_occurrences() {
        let (clock, registry) = registry();
        registry.register(minutely_definition("minutely")).unwrap();

        // Five minutes pass in one step; exactly one occurrence is handed out
        clock.advance(Duration::from_secs(300));
        assert_eq!(registry.due_definitions(clock.now()).len(), 1);
        assert!(registry.due_definitions(clock.now()).is_empty());
    }

    #[test]
    fn test_disabled_jobs_produce_nothing() {
        let (clock, registry) = registry();
        registry.register(minutely_definition("toggled")).unwrap();
        registry.disable("toggled").unwrap();
        assert!(!registry.is_enabled("toggled"));

        clock.advance(Duration::from_secs(61));
        assert!(registry.due_definitions(clock.now()).is_empty());

        registry.enable("toggled").unwrap();
        assert!(registry.is_enabled("toggled"));
    }

    #[test]
    fn test_unregistered_name_counts_as_enabled() {
        let (_clock, registry) = registry();
        assert!(registry.is_enabled("never-registered"));
        assert!(registry.get("never-registered").is_none());
        assert!(matches!(
            registry.unregister("never-registered"),
            Err(EngineError::UnknownJob(_))
        ));
    }
}
