//! TaskStore port - the persisted source of truth.
//!
//! The store owns task records, their execution marks, groups and the
//! last-run record. Its conditional writes are the only coordination
//! primitive in the system: any number of scheduler processes may share one
//! store, and correctness rests on `mark_running` being a single atomic
//! check-and-insert.
//!
//! Rows whose stored body cannot be decoded never fail a scan. They come
//! back as [`MissingTask`] entries, and `soft_delete` works on them by id.
//!
//! # Writes
//! - **Idle-conditional** (`update_idle_task`, `rearm_idle_task`,
//!   `soft_delete`): applied only while the task holds no marks.
//! - **Single-column** (`set_disabled`, `queue_for_next_cron`): never touch
//!   the columns a finishing run records.
//! - **Run bookkeeping** (`mark_running*`, `finish_execution`, `clear_*`).
//!
//! # Implementations
//! - **InMemoryTaskStore**: one mutex over the whole state (tests, demos)
//! - **SqliteTaskStore**: shared database file, safe across processes

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ExecutionContext, ExecutionMark, ExecutionToken, FailureSnapshot, GroupDraft, GroupId,
    LastRun, MissingTask, SchedulerError, TaskDraft, TaskGroup, TaskId, TaskRecord,
};

/// Result of a due scan.
#[derive(Debug, Clone, Default)]
pub struct DueScan {
    /// Decodable due tasks, ordered by group sorting (ungrouped first), then id.
    pub due: Vec<TaskRecord>,
    /// Due rows whose body could not be decoded.
    pub broken: Vec<MissingTask>,
}

/// One row of a full listing.
#[derive(Debug, Clone)]
pub enum TaskEntry {
    Intact(TaskRecord),
    Broken(MissingTask),
}

/// Result of a lock attempt on behalf of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueLock {
    Locked,
    /// Another run holds a mark and the task disallows parallel runs.
    Busy,
    /// The task is disabled or its next execution moved past `now`.
    NotDue,
}

/// Result of a write that only applies to idle tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The task holds at least one execution mark.
    Busy,
    /// No such task, or it was already deleted.
    Missing,
}

/// Everything recorded when a run releases its mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedExecution {
    pub started_at: DateTime<Utc>,
    pub context: ExecutionContext,
    /// `None` clears a previously recorded failure.
    pub failure: Option<FailureSnapshot>,
    pub next_execution: Option<DateTime<Utc>>,
    /// Disables the task (single tasks after their run).
    pub disable: bool,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new task and returns its id.
    async fn create_task(
        &self,
        draft: &TaskDraft,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<TaskId, SchedulerError>;

    /// `NotFound` if absent or soft-deleted, `Corrupt` if undecodable.
    async fn fetch_task(&self, id: TaskId) -> Result<TaskRecord, SchedulerError>;

    async fn fetch_due_tasks(&self, now: DateTime<Utc>) -> Result<DueScan, SchedulerError>;

    /// Every non-deleted task, in due-scan order.
    async fn list_tasks(&self) -> Result<Vec<TaskEntry>, SchedulerError>;

    /// Unconditionally upserts every column except the execution marks.
    async fn save_task(&self, task: &TaskRecord) -> Result<(), SchedulerError>;

    /// Like `save_task`, but only if the task exists and holds no marks.
    async fn update_idle_task(&self, task: &TaskRecord) -> Result<WriteOutcome, SchedulerError>;

    /// Sets the disabled flag and nothing else. `NotFound` if absent or deleted.
    async fn set_disabled(&self, id: TaskId, disabled: bool) -> Result<(), SchedulerError>;

    /// Enables the task and flags it for the next batch. Returns whether it
    /// was disabled. `NotFound` if absent or deleted.
    async fn queue_for_next_cron(&self, id: TaskId) -> Result<bool, SchedulerError>;

    /// Enables an idle task and replaces only its body and next execution
    /// with those of `task`. Used to re-arm single tasks.
    async fn rearm_idle_task(&self, task: &TaskRecord) -> Result<WriteOutcome, SchedulerError>;

    /// Marks the task deleted unless it holds marks. Never decodes the body.
    async fn soft_delete(&self, id: TaskId) -> Result<WriteOutcome, SchedulerError>;

    /// Atomically adds `mark` unless the task disallows parallel runs and
    /// already holds one. `NotFound` if the task is absent or deleted.
    async fn mark_running(&self, id: TaskId, mark: &ExecutionMark) -> Result<bool, SchedulerError>;

    /// Like `mark_running`, but the same atomic step also requires the task
    /// to be enabled and due at `now` (flagged, or `next_execution <= now`).
    async fn mark_running_if_due(
        &self,
        id: TaskId,
        mark: &ExecutionMark,
        now: DateTime<Utc>,
    ) -> Result<DueLock, SchedulerError>;

    /// Records the run's outcome and removes `token` in one step.
    async fn finish_execution(
        &self,
        id: TaskId,
        token: ExecutionToken,
        result: &FinishedExecution,
    ) -> Result<(), SchedulerError>;

    async fn clear_mark(&self, id: TaskId, token: ExecutionToken) -> Result<(), SchedulerError>;

    /// Removes every mark of the task and returns how many there were.
    async fn clear_all_marks(&self, id: TaskId) -> Result<usize, SchedulerError>;

    async fn create_group(&self, draft: &GroupDraft) -> Result<GroupId, SchedulerError>;

    /// `NotFound` if absent or soft-deleted.
    async fn fetch_group(&self, id: GroupId) -> Result<TaskGroup, SchedulerError>;

    /// All groups, deleted ones included, ordered by sorting then id.
    async fn list_groups(&self) -> Result<Vec<TaskGroup>, SchedulerError>;

    async fn save_group(&self, group: &TaskGroup) -> Result<(), SchedulerError>;

    async fn soft_delete_group(&self, id: GroupId) -> Result<(), SchedulerError>;

    async fn record_last_run(&self, run: &LastRun) -> Result<(), SchedulerError>;

    async fn fetch_last_run(&self) -> Result<Option<LastRun>, SchedulerError>;
}
