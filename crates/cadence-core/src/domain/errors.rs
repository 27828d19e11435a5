//! Errors - the scheduler's error taxonomy.

use crate::domain::cron::CronError;
use crate::domain::ids::{GroupId, TaskId};
use crate::domain::task::TaskType;

/// Operational classification of a [`SchedulerError`].
///
/// Callers branch on this instead of matching variants: the CLI picks its
/// exit status from it and the batch loop decides whether a failure stays
/// local to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The id or task type does not resolve.
    NotFound,
    /// The stored body of a task cannot be decoded.
    Corrupt,
    /// Lock acquisition failed on a task that disallows parallel runs.
    AlreadyRunning,
    /// Rejected input: bad cron expression or inconsistent task fields.
    Invalid,
    /// The backing store failed.
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("task {id} cannot be decoded: {reason}")]
    Corrupt { id: TaskId, reason: String },

    #[error("task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error("invalid cron expression `{expression}`: {source}")]
    InvalidExpression {
        expression: String,
        #[source]
        source: CronError,
    },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            Self::InvalidExpression { .. } | Self::ValidationFailed(_) => ErrorKind::Invalid,
            Self::Storage(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn task_not_found(id: TaskId) -> Self {
        Self::NotFound {
            entity: "task",
            id: id.to_string(),
        }
    }

    pub fn group_not_found(id: GroupId) -> Self {
        Self::NotFound {
            entity: "group",
            id: id.to_string(),
        }
    }

    pub fn unknown_task_type(task_type: &TaskType) -> Self {
        Self::NotFound {
            entity: "task type",
            id: task_type.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::missing(SchedulerError::task_not_found(TaskId::new(1)), ErrorKind::NotFound)]
    #[case::corrupt(
        SchedulerError::Corrupt { id: TaskId::new(1), reason: "bad".into() },
        ErrorKind::Corrupt
    )]
    #[case::busy(SchedulerError::AlreadyRunning(TaskId::new(1)), ErrorKind::AlreadyRunning)]
    #[case::invalid(SchedulerError::validation("end before start"), ErrorKind::Invalid)]
    #[case::storage(SchedulerError::Storage("disk full".into()), ErrorKind::Infrastructure)]
    fn errors_are_classified(#[case] err: SchedulerError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = SchedulerError::unknown_task_type(&TaskType::new("acme.report.v1"));
        assert_eq!(err.to_string(), "task type acme.report.v1 not found");
    }
}
