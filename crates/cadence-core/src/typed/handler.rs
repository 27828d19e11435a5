//! Handler trait - runs the body of a task.
//!
//! Handlers are written against a concrete [`Task`] type (`Handler<T>`).
//! The registry stores them behind the object-safe [`DynHandler`], which
//! takes the raw JSON payload; [`TypedHandler`] bridges the two.

use super::task::Task;
use crate::domain::{ExecutionContext, FailureSnapshot, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::marker::PhantomData;

/// Per-run information handed to a handler alongside its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub task_id: TaskId,
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub description: String,
}

/// A failed run, as reported by the task body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct TaskFailure {
    pub code: i64,
    pub message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }
}

impl From<TaskFailure> for FailureSnapshot {
    fn from(failure: TaskFailure) -> Self {
        FailureSnapshot {
            code: failure.code,
            message: failure.message,
        }
    }
}

/// Runs tasks of type `T`.
///
/// ```ignore
/// struct PurgeCacheHandler;
///
/// #[async_trait]
/// impl Handler<PurgeCache> for PurgeCacheHandler {
///     async fn handle(&self, task: PurgeCache, _ctx: RunContext) -> Result<(), TaskFailure> {
///         purge(task.older_than_days).map_err(|e| TaskFailure::new(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T, ctx: RunContext) -> Result<(), TaskFailure>;
}

/// Object-safe form of [`Handler`].
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: serde_json::Value, ctx: RunContext)
    -> Result<(), TaskFailure>;

    /// Checks that `payload` decodes into the handler's task type.
    fn check_payload(&self, payload: &serde_json::Value) -> Result<(), String>;

    fn task_type(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
        ctx: RunContext,
    ) -> Result<(), TaskFailure> {
        let task: T = serde_json::from_value(payload)
            .map_err(|e| TaskFailure::new(format!("payload decode: {e}")))?;
        self.handler.handle(task, ctx).await
    }

    fn check_payload(&self, payload: &serde_json::Value) -> Result<(), String> {
        <T as serde::Deserialize>::deserialize(payload)
            .map(drop)
            .map_err(|e| e.to_string())
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingHandler, CountingTask, FailingHandler, FailingTask};
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext {
            task_id: TaskId::new(1),
            context: ExecutionContext::Manual,
            started_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn typed_handler_decodes_and_runs() {
        let handler = CountingHandler::default();
        let typed = TypedHandler::<CountingTask, _>::new(handler.clone());

        typed.handle_dyn(json!({ "label": "a" }), ctx()).await.unwrap();
        assert_eq!(handler.runs(), 1);
        assert_eq!(typed.task_type(), CountingTask::TYPE);
    }

    #[tokio::test]
    async fn undecodable_payloads_fail_the_run() {
        let handler = CountingHandler::default();
        let typed = TypedHandler::<CountingTask, _>::new(handler.clone());

        let failure = typed.handle_dyn(json!({ "label": 5 }), ctx()).await.unwrap_err();
        assert!(failure.message.starts_with("payload decode"));
        assert_eq!(handler.runs(), 0);
    }

    #[test]
    fn check_payload_reports_shape_mismatches() {
        let typed = TypedHandler::<CountingTask, _>::new(CountingHandler::default());
        assert!(typed.check_payload(&json!({ "label": "ok" })).is_ok());
        assert!(typed.check_payload(&json!("nope")).is_err());
    }

    #[tokio::test]
    async fn failures_carry_their_code() {
        let typed = TypedHandler::<FailingTask, _>::new(FailingHandler);
        let failure = typed
            .handle_dyn(json!({ "code": 7, "message": "disk full" }), ctx())
            .await
            .unwrap_err();
        let snapshot = FailureSnapshot::from(failure);
        assert_eq!(snapshot.code, 7);
        assert_eq!(snapshot.message, "disk full");
    }
}
