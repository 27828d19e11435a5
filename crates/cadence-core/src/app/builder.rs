//! SchedulerBuilder - wires a store, a clock and the task registry together.
//!
//! Task types are registered once, at startup. `expect_tasks` turns a
//! forgotten registration into a build error instead of a task that quietly
//! shows up as missing at run time.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = SchedulerBuilder::new(Arc::new(SqliteTaskStore::open("cadence.db")?))
//!     .register::<RotateLogs, _>(RotateHandler)?
//!     .expect_tasks(&[RotateLogs::TYPE])
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::typed::{Handler, RegistryError, Task, TaskRegistry};

use super::scheduler::Scheduler;

/// Builds a [`Scheduler`].
///
/// ```ignore
/// let scheduler = SchedulerBuilder::new(store)
///     .register::<PurgeCache, _>(PurgeCacheHandler)?
///     .expect_tasks(&[PurgeCache::TYPE])
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    store: Arc<dyn TaskStore>,
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl SchedulerBuilder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            registry: TaskRegistry::new(),
            expected_tasks: None,
            clock: None,
            ids: None,
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// Task types that must be registered by the time `build` is called.
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a [`UlidGenerator`] over the scheduler's clock.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|task_type| !self.registry.contains(task_type))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        Ok(Scheduler::new(self.store, self.registry, clock, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionContext, ExecutionPolicy, RunOutcome, TaskDraft};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::FixedClock;
    use crate::testing::{CountingHandler, CountingTask, FailingHandler, FailingTask};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn store() -> Arc<dyn TaskStore> {
        Arc::new(InMemoryTaskStore::new())
    }

    #[test]
    fn test_build_success() {
        let scheduler = SchedulerBuilder::new(store())
            .register::<CountingTask, _>(CountingHandler::default())
            .unwrap()
            .expect_tasks(&[CountingTask::TYPE])
            .build();
        assert!(scheduler.is_ok());
    }

    #[test]
    fn test_build_missing_task_types() {
        let scheduler = SchedulerBuilder::new(store())
            .register::<CountingTask, _>(CountingHandler::default())
            .unwrap()
            .expect_tasks(&[CountingTask::TYPE, FailingTask::TYPE])
            .build();
        assert!(matches!(
            scheduler,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![FailingTask::TYPE.to_string()]
        ));
    }

    #[test]
    fn test_build_no_expect_tasks() {
        let scheduler = SchedulerBuilder::new(store())
            .register::<FailingTask, _>(FailingHandler)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(scheduler.registered_task_types().len(), 1);
    }

    #[test]
    fn test_double_registration_fails() {
        let result = SchedulerBuilder::new(store())
            .register::<CountingTask, _>(CountingHandler::default())
            .unwrap()
            .register::<CountingTask, _>(CountingHandler::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_injected_clock_drives_the_scheduler() {
        let at = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let handler = CountingHandler::default();
        let scheduler = SchedulerBuilder::new(store())
            .with_clock(Arc::new(FixedClock::new(at)))
            .register::<CountingTask, _>(handler.clone())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(scheduler.now(), at);

        let id = scheduler
            .add_task(
                TaskDraft::new(CountingTask::TYPE, ExecutionPolicy::single(at))
                    .with_payload(json!({ "label": "once" })),
            )
            .await
            .unwrap();
        let report = scheduler.run_due_tasks(ExecutionContext::Cron).await.unwrap();
        assert_eq!(report.outcome_of(id), Some(&RunOutcome::Succeeded));
        assert_eq!(handler.contexts()[0].started_at, at);
    }
}
