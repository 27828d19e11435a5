//! Stored row layout shared by the store implementations.
//!
//! Scheduling columns live beside an encoded body, so selection, locking
//! and deletion work on rows whose body no longer decodes.

use chrono::{DateTime, Utc};

use crate::domain::{
    ExecutionMark, FailureSnapshot, GroupId, LastExecution, MissingReason, MissingTask,
    SchedulerError, TaskDraft, TaskId, TaskRecord, TaskType,
};
use crate::ports::TaskEntry;
use crate::typed::{CodecError, PayloadCodec, TaskBody};

#[derive(Debug, Clone)]
pub(crate) struct StoredRow {
    pub id: TaskId,
    pub task_type: TaskType,
    pub group: Option<GroupId>,
    pub disabled: bool,
    pub deleted: bool,
    /// Copied out of the policy so locking never decodes the body.
    pub allow_multiple: bool,
    pub run_on_next_cron: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<LastExecution>,
    pub last_failure: Option<FailureSnapshot>,
    pub body: String,
    pub executions: Vec<ExecutionMark>,
}

impl StoredRow {
    pub fn encode(task: &TaskRecord) -> Result<Self, SchedulerError> {
        let body = PayloadCodec::encode(&TaskBody {
            policy: task.policy.clone(),
            payload: task.payload.clone(),
            description: task.description.clone(),
        })
        .map_err(|err| SchedulerError::Storage(err.to_string()))?;

        Ok(Self {
            id: task.id,
            task_type: task.task_type.clone(),
            group: task.group,
            disabled: task.disabled,
            deleted: false,
            allow_multiple: task.policy.allows_multiple(),
            run_on_next_cron: task.run_on_next_cron,
            next_execution: task.next_execution,
            last_execution: task.last_execution,
            last_failure: task.last_failure.clone(),
            body,
            executions: task.executions.clone(),
        })
    }

    pub fn from_draft(
        id: TaskId,
        draft: &TaskDraft,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<Self, SchedulerError> {
        Self::encode(&TaskRecord::from_draft(id, draft.clone(), next_execution))
    }

    pub fn decode(&self) -> Result<TaskRecord, CodecError> {
        let body = PayloadCodec::decode(&self.body)?;
        Ok(TaskRecord {
            id: self.id,
            task_type: self.task_type.clone(),
            payload: body.payload,
            description: body.description,
            group: self.group,
            disabled: self.disabled,
            policy: body.policy,
            executions: self.executions.clone(),
            run_on_next_cron: self.run_on_next_cron,
            next_execution: self.next_execution,
            last_execution: self.last_execution,
            last_failure: self.last_failure.clone(),
        })
    }

    /// Enabled, and either flagged for the next batch or past its next execution.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.disabled
            && (self.run_on_next_cron || self.next_execution.is_some_and(|next| next <= now))
    }

    pub fn missing(&self, err: &CodecError) -> MissingTask {
        MissingTask {
            id: self.id,
            task_type: self.task_type.clone(),
            group: self.group,
            disabled: self.disabled,
            last_execution: self.last_execution,
            reason: MissingReason::Corrupt(err.to_string()),
        }
    }

    pub fn entry(&self) -> TaskEntry {
        match self.decode() {
            Ok(task) => TaskEntry::Intact(task),
            Err(err) => TaskEntry::Broken(self.missing(&err)),
        }
    }

    pub fn fetch(&self) -> Result<TaskRecord, SchedulerError> {
        self.decode().map_err(|err| SchedulerError::Corrupt {
            id: self.id,
            reason: err.to_string(),
        })
    }

    /// Copies every column except the marks and the deleted flag.
    pub fn overwrite_with(&mut self, other: StoredRow) {
        let executions = std::mem::take(&mut self.executions);
        let deleted = self.deleted;
        *self = other;
        self.executions = executions;
        self.deleted = deleted;
    }
}
