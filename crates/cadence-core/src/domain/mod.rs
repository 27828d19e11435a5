//! Domain model: ids, policies, tasks, outcomes and errors.

pub mod cron;
pub mod errors;
pub mod group;
pub mod ids;
pub mod outcome;
pub mod policy;
pub mod state;
pub mod task;

pub use cron::{CronError, CronExpression, SEARCH_HORIZON_YEARS};
pub use errors::{ErrorKind, SchedulerError};
pub use group::{GroupDraft, TaskGroup};
pub use ids::{ExecutionToken, GroupId, Id, IdMarker, ParseIdError, TaskId};
pub use outcome::{
    BatchReport, ExecutionContext, FailureSnapshot, LastExecution, LastRun, OutcomeKind,
    RunOutcome, SkipReason, TaskRunReport,
};
pub use policy::{ExecutionPolicy, Frequency};
pub use state::{RunAttempt, RunPhase, TaskState};
pub use task::{ExecutionMark, MissingReason, MissingTask, TaskDraft, TaskRecord, TaskType};
