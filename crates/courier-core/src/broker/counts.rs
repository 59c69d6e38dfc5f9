use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

/// Number of tasks per state, plus a running total of successes.
///
/// `completed` only counts records still retained; `succeeded` counts every
/// ack since the broker was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub scheduled: usize,
    pub active: usize,
    pub retry: usize,
    pub archived: usize,
    pub completed: usize,
    pub succeeded: usize,
}

impl QueueCounts {
    pub(crate) fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Scheduled => self.scheduled += 1,
            TaskState::Active => self.active += 1,
            TaskState::Retry => self.retry += 1,
            TaskState::Archived => self.archived += 1,
            TaskState::Completed => self.completed += 1,
        }
    }

    /// Records held by the broker right now.
    pub fn total(&self) -> usize {
        self.pending + self.scheduled + self.active + self.retry + self.archived + self.completed
    }
}
