//! TaskRegistry - maps task-type identifiers to handlers.
//!
//! Built once at startup. A stored task whose type is not in the registry
//! is reported as missing; it is never a runtime crash.

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::{MissingReason, TaskType};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Listing metadata of a registered task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskTypeInfo {
    pub task_type: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub extension: &'static str,
}

struct Registration {
    handler: Arc<dyn DynHandler>,
    info: TaskTypeInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Registration>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let task_type = T::TYPE.to_string();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        let registration = Registration {
            handler: Arc::new(TypedHandler::new(handler)),
            info: TaskTypeInfo {
                task_type: T::TYPE,
                title: T::TITLE,
                description: T::DESCRIPTION,
                extension: T::EXTENSION,
            },
        };
        self.handlers.insert(task_type, registration);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers
            .get(task_type)
            .map(|registration| Arc::clone(&registration.handler))
    }

    pub fn info(&self, task_type: &str) -> Option<&TaskTypeInfo> {
        self.handlers.get(task_type).map(|registration| &registration.info)
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Metadata of every registered type, sorted by extension then title.
    pub fn infos(&self) -> Vec<TaskTypeInfo> {
        let mut infos: Vec<TaskTypeInfo> = self
            .handlers
            .values()
            .map(|registration| registration.info.clone())
            .collect();
        infos.sort_by(|a, b| (a.extension, a.title).cmp(&(b.extension, b.title)));
        infos
    }

    /// Whether a stored task of this type and payload can run.
    pub fn validate(
        &self,
        task_type: &TaskType,
        payload: &serde_json::Value,
    ) -> Result<(), MissingReason> {
        let registration = self
            .handlers
            .get(task_type.as_str())
            .ok_or(MissingReason::Unregistered)?;
        registration
            .handler
            .check_payload(payload)
            .map_err(MissingReason::InvalidPayload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingHandler, CountingTask, FailingHandler, FailingTask};
    use serde_json::json;

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry
            .register::<CountingTask, _>(CountingHandler::default())
            .unwrap();
        registry.register::<FailingTask, _>(FailingHandler).unwrap();
        registry
    }

    #[test]
    fn register_and_get() {
        let registry = registry();
        let handler = registry.get(CountingTask::TYPE).unwrap();
        assert_eq!(handler.task_type(), CountingTask::TYPE);
        assert!(registry.get("test.unknown.v1").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = registry();
        let result = registry.register::<CountingTask, _>(CountingHandler::default());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[test]
    fn infos_list_every_registered_type() {
        let types: Vec<&str> = registry().infos().iter().map(|info| info.task_type).collect();
        assert_eq!(types.len(), 2);
        assert!(types.contains(&CountingTask::TYPE));
        assert!(types.contains(&FailingTask::TYPE));
    }

    #[test]
    fn info_carries_the_task_constants() {
        let registry = registry();
        let info = registry.info(CountingTask::TYPE).unwrap();
        assert_eq!(info.title, "Counting task");
        assert_eq!(info.extension, "testing");
        // TITLE defaults to TYPE.
        assert_eq!(registry.info(FailingTask::TYPE).unwrap().title, FailingTask::TYPE);
    }

    #[test]
    fn validate_distinguishes_unknown_types_from_bad_payloads() {
        let registry = registry();
        let counting = TaskType::new(CountingTask::TYPE);

        assert_eq!(registry.validate(&counting, &json!({ "label": "x" })), Ok(()));
        assert!(matches!(
            registry.validate(&counting, &json!([1, 2])),
            Err(MissingReason::InvalidPayload(_))
        ));
        assert_eq!(
            registry.validate(&TaskType::new("gone.v1"), &json!({})),
            Err(MissingReason::Unregistered)
        );
    }
}
