//! Scheduler - selects due tasks, locks them, runs them and records the outcome.
//!
//! The scheduler keeps no shared mutable state of its own. Everything that
//! must be coordinated between processes goes through the [`TaskStore`], so
//! two schedulers over one store never run the same exclusive task twice.
//!
//! # Locking
//! - A batch locks with `mark_running_if_due`, so a task another scheduler
//!   finished after this batch's scan is skipped as no longer due.
//! - Manual execution locks with `mark_running` and ignores the schedule.
//! - The record is re-read under the mark. The next execution is always
//!   computed from the stored policy.
//!
//! # Edits
//! Full edits and deletes only apply to idle tasks. Toggling and queueing
//! for the next batch write single columns and may race a running task.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::domain::{
    BatchReport, ErrorKind, ExecutionContext, ExecutionMark, ExecutionPolicy, FailureSnapshot,
    GroupDraft, GroupId, LastRun, MissingReason, MissingTask, RunAttempt, RunOutcome, RunPhase,
    SchedulerError, SkipReason, TaskDraft, TaskGroup, TaskId, TaskRecord, TaskRunReport, TaskType,
};
use crate::observability::TaskCounts;
use crate::ports::{
    Clock, DueLock, FinishedExecution, IdGenerator, TaskEntry, TaskStore, WriteOutcome,
};
use crate::typed::{RunContext, TaskFailure, TaskRegistry, TaskTypeInfo};

use super::status::{GroupSection, LastRunStatus, TaskListing, TaskView, ToggleResult};

/// How an attempt takes its execution mark.
#[derive(Debug, Clone, Copy)]
enum Lock {
    /// Batch runs: only while the task is still due at the batch time.
    IfDue(DateTime<Utc>),
    /// Manual runs: regardless of schedule or disabled flag.
    Always,
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Scheduler {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            clock,
            ids,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs every task that is due now.
    pub async fn run_due_tasks(
        &self,
        context: ExecutionContext,
    ) -> Result<BatchReport, SchedulerError> {
        self.run_due_tasks_at(self.clock.now(), context).await
    }

    /// Runs every task due at `now`, in group order.
    ///
    /// A failing, panicking or contended task never aborts the batch. Only a
    /// failure of the due scan itself is returned as an error.
    pub async fn run_due_tasks_at(
        &self,
        now: DateTime<Utc>,
        context: ExecutionContext,
    ) -> Result<BatchReport, SchedulerError> {
        let mut report = BatchReport::new(now, context);
        if let Err(err) = self.store.record_last_run(&LastRun::started(now, context)).await {
            warn!(error = %err, "failed to record the start of the batch");
        }

        let scan = self.store.fetch_due_tasks(now).await?;
        debug!(
            due = scan.due.len(),
            broken = scan.broken.len(),
            %context,
            "selected due tasks"
        );
        report.missing = scan.broken;

        for task in scan.due {
            if let Err(reason) = self.registry.validate(&task.task_type, &task.payload) {
                warn!(task_id = %task.id, task_type = %task.task_type, %reason, "skipping task that cannot run");
                report.missing.push(MissingTask::from_record(&task, reason));
                continue;
            }

            let task_id = task.id;
            let run = match self.lock_and_run(task_id, Lock::IfDue(now), context).await {
                Ok(run) => run,
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "task attempt failed in the store");
                    TaskRunReport {
                        task_id,
                        started_at: self.clock.now(),
                        context,
                        outcome: RunOutcome::Failed(FailureSnapshot {
                            code: 0,
                            message: err.to_string(),
                        }),
                    }
                }
            };
            report.runs.push(run);
        }

        report.finished_at = self.clock.now();
        if let Err(err) = self.record_last_run(now, context).await {
            warn!(error = %err, "failed to record the end of the batch");
        }
        info!(
            runs = report.runs.len(),
            missing = report.missing.len(),
            %context,
            "batch finished"
        );
        Ok(report)
    }

    /// Runs one task now, whether or not it is due or enabled.
    pub async fn execute_task(
        &self,
        id: TaskId,
        context: ExecutionContext,
    ) -> Result<RunOutcome, SchedulerError> {
        let task = self.store.fetch_task(id).await?;
        match self.registry.validate(&task.task_type, &task.payload) {
            Ok(()) => {}
            Err(MissingReason::Unregistered) => {
                return Err(SchedulerError::unknown_task_type(&task.task_type));
            }
            Err(reason) => {
                return Err(SchedulerError::Corrupt {
                    id,
                    reason: reason.to_string(),
                });
            }
        }

        let run = self.lock_and_run(task.id, Lock::Always, context).await?;
        match run.outcome {
            RunOutcome::Skipped {
                reason: SkipReason::AlreadyRunning,
            } => Err(SchedulerError::AlreadyRunning(id)),
            RunOutcome::Skipped {
                reason: SkipReason::Vanished,
            } => Err(SchedulerError::task_not_found(id)),
            outcome => Ok(outcome),
        }
    }

    /// One attempt: lock, run the body, record the outcome and release the mark.
    ///
    /// The task is re-read once the mark is held. The record a batch selected
    /// may be stale by then, and the run must use the stored schedule.
    async fn lock_and_run(
        &self,
        task_id: TaskId,
        lock: Lock,
        context: ExecutionContext,
    ) -> Result<TaskRunReport, SchedulerError> {
        let mut attempt = RunAttempt::new(task_id);
        attempt.advance(RunPhase::Selected);

        let started_at = self.clock.now();
        let mark = ExecutionMark {
            token: self.ids.execution_token(),
            started_at,
        };
        let report = move |outcome| TaskRunReport {
            task_id,
            started_at,
            context,
            outcome,
        };

        let locked = match lock {
            Lock::IfDue(now) => self.store.mark_running_if_due(task_id, &mark, now).await,
            Lock::Always => self
                .store
                .mark_running(task_id, &mark)
                .await
                .map(|locked| if locked { DueLock::Locked } else { DueLock::Busy }),
        };
        let skipped = match locked {
            Ok(DueLock::Locked) => None,
            Ok(DueLock::Busy) => {
                info!(task_id = %task_id, "task is already running, skipping");
                Some(SkipReason::AlreadyRunning)
            }
            Ok(DueLock::NotDue) => {
                info!(task_id = %task_id, "task is no longer due, skipping");
                Some(SkipReason::NoLongerDue)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(task_id = %task_id, "task vanished before it could be locked");
                Some(SkipReason::Vanished)
            }
            Err(err) => return Err(err),
        };
        if let Some(reason) = skipped {
            attempt.advance(RunPhase::Skipped);
            return Ok(report(RunOutcome::Skipped { reason }));
        }
        attempt.advance(RunPhase::Locked);

        let task = match self.store.fetch_task(task_id).await {
            Ok(task) => task,
            Err(err) => {
                if let Err(release) = self.store.clear_mark(task_id, mark.token).await {
                    error!(task_id = %task_id, error = %release, "failed to release the execution mark");
                }
                return Err(err);
            }
        };

        attempt.advance(RunPhase::Running);
        info!(task_id = %task_id, task_type = %task.task_type, token = %mark.token, %context, "running task");
        let failure = match self.invoke(&task, context, started_at).await {
            Ok(()) => {
                attempt.advance(RunPhase::Succeeded);
                None
            }
            Err(failure) => {
                attempt.advance(RunPhase::Failed);
                warn!(task_id = %task_id, code = failure.code, message = %failure.message, "task failed");
                Some(FailureSnapshot::from(failure))
            }
        };

        let finished = FinishedExecution {
            started_at,
            context,
            failure: failure.clone(),
            next_execution: self.next_after_run(&task, started_at),
            disable: task.policy.is_single(),
        };
        if let Err(err) = self.store.finish_execution(task_id, mark.token, &finished).await {
            error!(task_id = %task_id, error = %err, "failed to record the outcome, releasing the mark");
            if let Err(err) = self.store.clear_mark(task_id, mark.token).await {
                error!(task_id = %task_id, error = %err, "failed to release the execution mark");
            }
        }
        attempt.advance(RunPhase::Unlocked);

        Ok(report(match failure {
            None => RunOutcome::Succeeded,
            Some(failure) => RunOutcome::Failed(failure),
        }))
    }

    /// Runs the task body on its own tokio task so a panic becomes a failure.
    async fn invoke(
        &self,
        task: &TaskRecord,
        context: ExecutionContext,
        started_at: DateTime<Utc>,
    ) -> Result<(), TaskFailure> {
        let handler = self
            .registry
            .get(task.task_type.as_str())
            .ok_or_else(|| TaskFailure::new(MissingReason::Unregistered.to_string()))?;
        let ctx = RunContext {
            task_id: task.id,
            context,
            started_at,
            description: task.description.clone(),
        };
        let payload = task.payload.clone();
        match tokio::spawn(async move { handler.handle_dyn(payload, ctx).await }).await {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(TaskFailure::new(format!(
                "task body panicked: {}",
                panic_message(join.into_panic())
            ))),
            Err(join) => Err(TaskFailure::new(format!("task body was cancelled: {join}"))),
        }
    }

    fn next_after_run(&self, task: &TaskRecord, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if task.policy.is_single() {
            return None;
        }
        match task.policy.compute_next_due(Some(started_at)) {
            Ok(next) => next,
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "cannot compute the next execution, task will not fire again");
                None
            }
        }
    }

    pub async fn fetch_task(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        self.store.fetch_task(id).await
    }

    /// Validates and stores a new task. Its first execution is computed here.
    pub async fn add_task(&self, draft: TaskDraft) -> Result<TaskId, SchedulerError> {
        self.check_definition(&draft.task_type, &draft.payload, &draft.policy, draft.group)
            .await?;
        let next = draft.policy.compute_next_due(None)?;
        let id = self.store.create_task(&draft, next).await?;
        info!(task_id = %id, task_type = %draft.task_type, next_execution = ?next, "task added");
        Ok(id)
    }

    /// Stores an edited task. Rejected while the task holds execution marks.
    pub async fn save_task(&self, task: &TaskRecord) -> Result<(), SchedulerError> {
        self.check_definition(&task.task_type, &task.payload, &task.policy, task.group)
            .await?;
        let mut task = task.clone();
        task.next_execution = task
            .policy
            .compute_next_due(task.last_execution.map(|last| last.at))?;
        match self.store.update_idle_task(&task).await? {
            WriteOutcome::Applied => {
                debug!(task_id = %task.id, next_execution = ?task.next_execution, "task saved");
                Ok(())
            }
            WriteOutcome::Busy => Err(running_task_error(task.id, "edited")),
            WriteOutcome::Missing => Err(SchedulerError::task_not_found(task.id)),
        }
    }

    /// Soft-deletes a task. Works on tasks whose body cannot be decoded.
    pub async fn remove_task(&self, id: TaskId) -> Result<(), SchedulerError> {
        match self.store.soft_delete(id).await? {
            WriteOutcome::Applied => {
                info!(task_id = %id, "task removed");
                Ok(())
            }
            WriteOutcome::Busy => Err(running_task_error(id, "deleted")),
            WriteOutcome::Missing => Err(SchedulerError::task_not_found(id)),
        }
    }

    /// Drops every execution mark of the task.
    ///
    /// Work already in flight keeps running. Its own completion later finds
    /// its mark gone and only records the outcome.
    pub async fn stop_task(&self, id: TaskId) -> Result<usize, SchedulerError> {
        let cleared = self.store.clear_all_marks(id).await?;
        info!(task_id = %id, cleared, "execution marks cleared");
        Ok(cleared)
    }

    /// Flips the disabled flag. Enabling a single task re-arms it at now.
    pub async fn toggle_disabled(&self, id: TaskId) -> Result<ToggleResult, SchedulerError> {
        let mut task = self.store.fetch_task(id).await?;
        let result = if !task.disabled {
            self.store.set_disabled(id, true).await?;
            ToggleResult::Disabled
        } else if task.policy.is_single() {
            let now = self.clock.now();
            task.register_single_execution(now);
            match self.store.rearm_idle_task(&task).await? {
                WriteOutcome::Applied => ToggleResult::Requeued { at: now },
                WriteOutcome::Busy => return Err(running_task_error(id, "re-armed")),
                WriteOutcome::Missing => return Err(SchedulerError::task_not_found(id)),
            }
        } else {
            self.store.set_disabled(id, false).await?;
            ToggleResult::Enabled
        };
        info!(task_id = %id, ?result, "task toggled");
        Ok(result)
    }

    /// Forces the task into the next batch. Returns whether it had to be enabled.
    pub async fn schedule_for_next_cron(&self, id: TaskId) -> Result<bool, SchedulerError> {
        let enabled = self.store.queue_for_next_cron(id).await?;
        info!(task_id = %id, enabled, "task queued for the next batch");
        Ok(enabled)
    }

    /// Records a completed batch that started at `started_at`.
    pub async fn record_last_run(
        &self,
        started_at: DateTime<Utc>,
        context: ExecutionContext,
    ) -> Result<(), SchedulerError> {
        let run = LastRun::started(started_at, context).finished(self.clock.now());
        self.store.record_last_run(&run).await
    }

    pub async fn last_run_status(&self) -> Result<LastRunStatus, SchedulerError> {
        Ok(self.store.fetch_last_run().await?.into())
    }

    pub async fn list_tasks(&self) -> Result<TaskListing, SchedulerError> {
        let now = self.clock.now();
        let groups = self.store.list_groups().await?;
        let mut sections: Vec<GroupSection> = Vec::new();
        let mut missing = Vec::new();

        for entry in self.store.list_tasks().await? {
            let task = match entry {
                TaskEntry::Intact(task) => task,
                TaskEntry::Broken(broken) => {
                    missing.push(broken);
                    continue;
                }
            };
            if let Err(reason) = self.registry.validate(&task.task_type, &task.payload) {
                missing.push(MissingTask::from_record(&task, reason));
                continue;
            }
            let Some(info) = self.registry.info(task.task_type.as_str()) else {
                continue;
            };
            let view = TaskView::new(&task, info, now);
            match sections.last_mut() {
                Some(section) if section.group_id == task.group => section.tasks.push(view),
                _ => sections.push(GroupSection {
                    group_id: task.group,
                    group: task
                        .group
                        .and_then(|id| groups.iter().find(|group| group.id == id).cloned()),
                    tasks: vec![view],
                }),
            }
        }

        Ok(TaskListing {
            generated_at: now,
            sections,
            missing,
        })
    }

    pub async fn counts(&self) -> Result<TaskCounts, SchedulerError> {
        Ok(self.list_tasks().await?.counts())
    }

    pub fn registered_task_types(&self) -> Vec<TaskTypeInfo> {
        self.registry.infos()
    }

    pub async fn add_group(&self, draft: GroupDraft) -> Result<GroupId, SchedulerError> {
        if draft.name.trim().is_empty() {
            return Err(SchedulerError::validation("group name must not be empty"));
        }
        let id = self.store.create_group(&draft).await?;
        info!(group_id = %id, name = %draft.name, "group added");
        Ok(id)
    }

    /// Stores an edited group. Deleted groups cannot be edited.
    pub async fn save_group(&self, group: &TaskGroup) -> Result<(), SchedulerError> {
        if group.name.trim().is_empty() {
            return Err(SchedulerError::validation("group name must not be empty"));
        }
        self.store.fetch_group(group.id).await?;
        let mut group = group.clone();
        group.deleted = false;
        self.store.save_group(&group).await?;
        debug!(group_id = %group.id, name = %group.name, "group saved");
        Ok(())
    }

    pub async fn fetch_group(&self, id: GroupId) -> Result<TaskGroup, SchedulerError> {
        self.store.fetch_group(id).await
    }

    /// Groups that have not been deleted.
    pub async fn list_groups(&self) -> Result<Vec<TaskGroup>, SchedulerError> {
        let mut groups = self.store.list_groups().await?;
        groups.retain(|group| !group.deleted);
        Ok(groups)
    }

    /// Soft-deletes a group. Its tasks keep their group id and are listed
    /// under an unnamed section.
    pub async fn remove_group(&self, id: GroupId) -> Result<(), SchedulerError> {
        self.store.fetch_group(id).await?;
        self.store.soft_delete_group(id).await?;
        info!(group_id = %id, "group removed");
        Ok(())
    }

    async fn check_definition(
        &self,
        task_type: &TaskType,
        payload: &serde_json::Value,
        policy: &ExecutionPolicy,
        group: Option<GroupId>,
    ) -> Result<(), SchedulerError> {
        match self.registry.validate(task_type, payload) {
            Ok(()) => {}
            Err(MissingReason::Unregistered) => {
                return Err(SchedulerError::unknown_task_type(task_type));
            }
            Err(reason) => return Err(SchedulerError::validation(reason.to_string())),
        }
        policy.validate()?;
        if let Some(group) = group {
            self.store.fetch_group(group).await?;
        }
        Ok(())
    }
}

fn running_task_error(id: TaskId, action: &str) -> SchedulerError {
    SchedulerError::validation(format!(
        "task {id} is running and cannot be {action}; stop it first"
    ))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
