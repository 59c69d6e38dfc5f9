use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::DEFAULT_MAX_RETRY;

use super::{QueueName, TaskEnvelope, TaskId, TaskName, TaskState};

/// Submission metadata returned from `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: TaskName,
    pub queue: QueueName,
    pub state: TaskState,

    /// Retry ceiling the broker applies to this task.
    pub max_retry: u32,

    /// Number of failed attempts so far.
    pub retried: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub enqueued_at: DateTime<Utc>,

    /// When the task becomes eligible again (Scheduled / Retry only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_process_at: Option<DateTime<Utc>>,
}

impl TaskInfo {
    /// Info for an envelope that was executed inline and succeeded.
    pub fn completed(envelope: &TaskEnvelope) -> Self {
        Self {
            id: envelope.id(),
            name: envelope.name().clone(),
            queue: envelope.queue(),
            state: TaskState::Completed,
            max_retry: envelope.options().max_retries.unwrap_or(DEFAULT_MAX_RETRY),
            retried: 0,
            last_error: None,
            enqueued_at: envelope.enqueued_at(),
            next_process_at: None,
        }
    }
}
