use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

/// Task totals by display state, as shown by `check`/`list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub disabled: usize,
    pub running: usize,
    pub due: usize,
    pub scheduled: usize,
    pub finished: usize,
    /// Unregistered or undecodable tasks.
    pub missing: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        self.total += 1;
        match state {
            TaskState::Disabled => self.disabled += 1,
            TaskState::Running => self.running += 1,
            TaskState::Due => self.due += 1,
            TaskState::Scheduled => self.scheduled += 1,
            TaskState::Finished => self.finished += 1,
        }
    }

    pub fn record_missing(&mut self) {
        self.total += 1;
        self.missing += 1;
    }
}
