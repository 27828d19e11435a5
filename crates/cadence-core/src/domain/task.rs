//! Task records as the scheduler sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ExecutionToken, GroupId, TaskId};
use super::outcome::{FailureSnapshot, LastExecution};
use super::policy::ExecutionPolicy;

/// Registered task-type identifier, e.g. `acme.report.nightly.v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One held execution lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMark {
    pub token: ExecutionToken,
    pub started_at: DateTime<Utc>,
}

/// A task that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub description: String,
    pub group: Option<GroupId>,
    pub disabled: bool,
    pub policy: ExecutionPolicy,
}

impl TaskDraft {
    pub fn new(task_type: impl Into<String>, policy: ExecutionPolicy) -> Self {
        Self {
            task_type: TaskType::new(task_type),
            payload: serde_json::Value::Null,
            description: String::new(),
            group: None,
            disabled: false,
            policy,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// A stored task whose body decoded cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub description: String,
    pub group: Option<GroupId>,
    pub disabled: bool,
    pub policy: ExecutionPolicy,
    /// Held locks. Empty when idle.
    pub executions: Vec<ExecutionMark>,
    /// Forces selection by the next batch regardless of `next_execution`.
    pub run_on_next_cron: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<LastExecution>,
    pub last_failure: Option<FailureSnapshot>,
}

impl TaskRecord {
    pub fn from_draft(id: TaskId, draft: TaskDraft, next_execution: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            task_type: draft.task_type,
            payload: draft.payload,
            description: draft.description,
            group: draft.group,
            disabled: draft.disabled,
            policy: draft.policy,
            executions: Vec::new(),
            run_on_next_cron: false,
            next_execution,
            last_execution: None,
            last_failure: None,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.executions.is_empty()
    }

    /// Selection rule of the batch path.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.disabled
            && (self.run_on_next_cron || self.next_execution.is_some_and(|next| next <= now))
    }

    /// Earliest start among the held marks.
    pub fn running_since(&self) -> Option<DateTime<Utc>> {
        self.executions.iter().map(|mark| mark.started_at).min()
    }

    /// Turns the task into a single execution at `at` and arms it.
    pub fn register_single_execution(&mut self, at: DateTime<Utc>) {
        self.policy = ExecutionPolicy::single(at);
        self.next_execution = Some(at);
    }
}

/// Why a stored task cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MissingReason {
    /// No handler is registered for the task type.
    Unregistered,
    /// The handler rejected the stored payload.
    InvalidPayload(String),
    /// The stored body could not be decoded at all.
    Corrupt(String),
}

impl fmt::Display for MissingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => f.write_str("task type is not registered"),
            Self::InvalidPayload(reason) => write!(f, "payload does not match its type: {reason}"),
            Self::Corrupt(reason) => write!(f, "stored body is unreadable: {reason}"),
        }
    }
}

/// A stored task that stays listed (and deletable by id) but is never run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTask {
    pub id: TaskId,
    pub task_type: TaskType,
    pub group: Option<GroupId>,
    pub disabled: bool,
    pub last_execution: Option<LastExecution>,
    pub reason: MissingReason,
}

impl MissingTask {
    pub fn from_record(task: &TaskRecord, reason: MissingReason) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type.clone(),
            group: task.group,
            disabled: task.disabled,
            last_execution: task.last_execution,
            reason,
        }
    }
}
