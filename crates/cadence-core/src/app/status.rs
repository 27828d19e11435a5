//! Read models for listings and the health check.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    FailureSnapshot, GroupId, LastExecution, LastRun, MissingTask, TaskGroup, TaskId, TaskRecord,
    TaskState, TaskType,
};
use crate::observability::TaskCounts;
use crate::typed::TaskTypeInfo;

/// One runnable task as shown in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub task_type: TaskType,
    pub title: &'static str,
    pub extension: &'static str,
    pub description: String,
    /// `single` or `recurring`.
    pub kind: &'static str,
    /// Cron source or interval seconds.
    pub frequency: Option<String>,
    pub allow_multiple: bool,
    pub state: TaskState,
    pub disabled: bool,
    pub running_since: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    /// Enabled, and the next execution is already in the past.
    pub late: bool,
    pub last_execution: Option<LastExecution>,
    pub last_failure: Option<FailureSnapshot>,
}

impl TaskView {
    pub fn new(task: &TaskRecord, info: &TaskTypeInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type.clone(),
            title: info.title,
            extension: info.extension,
            description: task.description.clone(),
            kind: task.policy.kind(),
            frequency: task.policy.frequency_label(),
            allow_multiple: task.policy.allows_multiple(),
            state: TaskState::of(task, now),
            disabled: task.disabled,
            running_since: task.running_since(),
            next_execution: task.next_execution,
            late: !task.disabled && task.next_execution.is_some_and(|next| next < now),
            last_execution: task.last_execution,
            last_failure: task.last_failure.clone(),
        }
    }
}

/// Tasks of one group. `group_id == None` is the ungrouped section.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSection {
    pub group_id: Option<GroupId>,
    /// `None` when ungrouped or when the group row no longer exists.
    pub group: Option<TaskGroup>,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskListing {
    pub generated_at: DateTime<Utc>,
    /// In due-scan order: ungrouped first, then by group sorting.
    pub sections: Vec<GroupSection>,
    /// Tasks that cannot run. They can still be deleted by id.
    pub missing: Vec<MissingTask>,
}

impl TaskListing {
    pub fn tasks(&self) -> impl Iterator<Item = &TaskView> {
        self.sections.iter().flat_map(|section| section.tasks.iter())
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskView> {
        self.tasks().find(|view| view.id == id)
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for view in self.tasks() {
            counts.record(view.state);
        }
        for _ in &self.missing {
            counts.record_missing();
        }
        counts
    }
}

/// What the health check reports about the last batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LastRunStatus {
    Never,
    /// Started but never recorded an end.
    Incomplete(LastRun),
    Complete(LastRun),
}

impl From<Option<LastRun>> for LastRunStatus {
    fn from(run: Option<LastRun>) -> Self {
        match run {
            None => Self::Never,
            Some(run) if run.end.is_none() => Self::Incomplete(run),
            Some(run) => Self::Complete(run),
        }
    }
}

/// Result of flipping a task's disabled flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ToggleResult {
    Disabled,
    Enabled,
    /// A single task was enabled and re-armed to run at `at`.
    Requeued { at: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionContext;
    use chrono::TimeZone;

    #[test]
    fn last_run_status_follows_the_end_marker() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let run = LastRun::started(start, ExecutionContext::Cron);

        assert_eq!(LastRunStatus::from(None), LastRunStatus::Never);
        assert_eq!(LastRunStatus::from(Some(run)), LastRunStatus::Incomplete(run));
        let done = run.finished(start);
        assert_eq!(LastRunStatus::from(Some(done)), LastRunStatus::Complete(done));
    }
}
