//! Task lifecycle as seen by the broker.

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> Active -> Completed
/// - Scheduled -> Pending (delay elapsed)
/// - Active -> Retry -> Pending (loop while retried < max_retry)
/// - Active -> Archived (retry ceiling reached, or skip-retry error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to be leased.
    Pending,

    /// Waiting for its `delay` to elapse.
    Scheduled,

    /// Leased by a worker.
    Active,

    /// Waiting for retry backoff.
    Retry,

    /// Given up on; kept for inspection only.
    Archived,

    /// Handler returned success.
    Completed,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Archived)
    }

    /// Is this task eligible for lease?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Pending)
    }
}
