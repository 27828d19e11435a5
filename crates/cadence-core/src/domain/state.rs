//! State - per-attempt run phases and the derived display state of a task.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::TaskId;
use super::task::TaskRecord;

/// Phase of one execution attempt.
///
/// ```text
/// Idle -> Selected -> Locked -> Running -> Succeeded -> Unlocked
///                |                    \-> Failed    -/
///                \-> Skipped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Selected,
    Locked,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Unlocked,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Selected)
                | (Selected, Locked)
                | (Selected, Skipped)
                | (Locked, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Unlocked)
                | (Failed, Unlocked)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Skipped | RunPhase::Unlocked)
    }

    /// Whether an execution mark is held in this phase.
    pub fn holds_lock(self) -> bool {
        matches!(
            self,
            RunPhase::Locked | RunPhase::Running | RunPhase::Succeeded | RunPhase::Failed
        )
    }
}

/// Tracks the phase of one attempt and traces every transition.
#[derive(Debug)]
pub struct RunAttempt {
    task_id: TaskId,
    phase: RunPhase,
}

impl RunAttempt {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal run transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::trace!(task_id = %self.task_id, from = ?self.phase, to = ?next, "run phase");
        self.phase = next;
    }
}

/// What a listing shows for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Disabled,
    Running,
    /// Next execution has passed (or the task is queued for the next batch).
    Due,
    Scheduled,
    /// The policy will not fire again.
    Finished,
}

impl TaskState {
    pub fn of(task: &TaskRecord, now: DateTime<Utc>) -> Self {
        if task.is_running() {
            Self::Running
        } else if task.disabled {
            Self::Disabled
        } else if task.is_due(now) {
            Self::Due
        } else if task.next_execution.is_some() {
            Self::Scheduled
        } else {
            Self::Finished
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::ExecutionToken;
    use crate::domain::policy::ExecutionPolicy;
    use crate::domain::task::{ExecutionMark, TaskDraft};
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use ulid::Ulid;

    #[test]
    fn happy_path_is_legal() {
        let mut attempt = RunAttempt::new(TaskId::new(1));
        for next in [
            RunPhase::Selected,
            RunPhase::Locked,
            RunPhase::Running,
            RunPhase::Succeeded,
            RunPhase::Unlocked,
        ] {
            assert!(attempt.phase().can_advance_to(next));
            attempt.advance(next);
        }
        assert!(attempt.phase().is_terminal());
    }

    #[rstest]
    #[case::skip_lock(RunPhase::Selected, RunPhase::Running)]
    #[case::unlock_before_run(RunPhase::Locked, RunPhase::Unlocked)]
    #[case::skip_after_lock(RunPhase::Locked, RunPhase::Skipped)]
    #[case::restart(RunPhase::Unlocked, RunPhase::Selected)]
    fn illegal_transitions_are_rejected(#[case] from: RunPhase, #[case] to: RunPhase) {
        assert!(!from.can_advance_to(to));
    }

    #[test]
    fn lock_is_held_between_locked_and_unlocked() {
        assert!(!RunPhase::Selected.holds_lock());
        assert!(RunPhase::Running.holds_lock());
        assert!(RunPhase::Failed.holds_lock());
        assert!(!RunPhase::Unlocked.holds_lock());
    }

    #[test]
    fn display_state_prefers_running_over_disabled() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let draft = TaskDraft::new("test.noop.v1", ExecutionPolicy::single(now)).disabled();
        let mut task = TaskRecord::from_draft(TaskId::new(1), draft, Some(now));
        assert_eq!(TaskState::of(&task, now), TaskState::Disabled);

        task.executions.push(ExecutionMark {
            token: ExecutionToken::from_ulid(Ulid::new()),
            started_at: now,
        });
        assert_eq!(TaskState::of(&task, now), TaskState::Running);

        task.executions.clear();
        task.disabled = false;
        assert_eq!(TaskState::of(&task, now - Duration::seconds(1)), TaskState::Scheduled);
        assert_eq!(TaskState::of(&task, now), TaskState::Due);
        task.next_execution = None;
        assert_eq!(TaskState::of(&task, now), TaskState::Finished);
    }
}
