//! Outcome model: what a run produced and how it was triggered.
//!
//! These types are recorded by the store and reported back to callers of
//! the batch and single-task paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::TaskId;
use super::task::MissingTask;

/// What triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// An administrator asked for it.
    Manual,
    /// The periodic batch run.
    Cron,
}

impl ExecutionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Cron => "cron",
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown execution context `{0}`")]
pub struct ParseContextError(String);

impl FromStr for ExecutionContext {
    type Err = ParseContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "cron" => Ok(Self::Cron),
            other => Err(ParseContextError(other.to_string())),
        }
    }
}

/// The failure a task body reported, as persisted on the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSnapshot {
    pub code: i64,
    pub message: String,
}

/// When a task last started, and who started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastExecution {
    pub at: DateTime<Utc>,
    pub context: ExecutionContext,
}

/// Why an attempt did not run the task body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds the execution mark.
    AlreadyRunning,
    /// The task was deleted between selection and locking.
    Vanished,
    /// Between selection and locking the task was disabled, or another
    /// scheduler ran it and moved its next execution past the batch time.
    NoLongerDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Succeeded,
    Failed(FailureSnapshot),
    Skipped { reason: SkipReason },
}

impl RunOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Succeeded => OutcomeKind::Succeeded,
            Self::Failed(_) => OutcomeKind::Failed,
            Self::Skipped { .. } => OutcomeKind::Skipped,
        }
    }

    pub fn failure(&self) -> Option<&FailureSnapshot> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// One attempt inside a batch (or a manual execution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunReport {
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub context: ExecutionContext,
    pub outcome: RunOutcome,
}

/// Everything one call to the batch path did.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub context: ExecutionContext,
    pub runs: Vec<TaskRunReport>,
    /// Due tasks that were not executed because their type is unknown or
    /// their stored body is unreadable.
    pub missing: Vec<MissingTask>,
}

impl BatchReport {
    pub fn new(started_at: DateTime<Utc>, context: ExecutionContext) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            context,
            runs: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.runs
            .iter()
            .filter(|run| run.outcome.kind() == kind)
            .count()
    }

    pub fn outcome_of(&self, task_id: TaskId) -> Option<&RunOutcome> {
        self.runs
            .iter()
            .find(|run| run.task_id == task_id)
            .map(|run| &run.outcome)
    }
}

/// Process-wide record of the last batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub start: DateTime<Utc>,
    /// `None` while the batch is still running, or if it never finished.
    pub end: Option<DateTime<Utc>>,
    pub context: ExecutionContext,
}

impl LastRun {
    pub fn started(start: DateTime<Utc>, context: ExecutionContext) -> Self {
        Self {
            start,
            end: None,
            context,
        }
    }

    pub fn finished(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_serialize_with_screaming_kind() {
        let failed = RunOutcome::Failed(FailureSnapshot {
            code: 3,
            message: "boom".into(),
        });
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["kind"], "FAILED");
        assert_eq!(json["code"], 3);

        let skipped = RunOutcome::Skipped {
            reason: SkipReason::AlreadyRunning,
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["kind"], "SKIPPED");
        assert_eq!(json["reason"], "already_running");
    }

    #[test]
    fn contexts_parse_their_display_form() {
        for context in [ExecutionContext::Manual, ExecutionContext::Cron] {
            assert_eq!(context.to_string().parse::<ExecutionContext>(), Ok(context));
        }
        assert!("nightly".parse::<ExecutionContext>().is_err());
    }
}
