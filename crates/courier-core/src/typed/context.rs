use tokio_util::sync::CancellationToken;

use crate::broker::DEFAULT_MAX_RETRY;
use crate::domain::{QueueName, TaskEnvelope, TaskId, TaskName};

/// Per-invocation context handed to a handler.
///
/// Cancellation is a request to stop promptly, not a kill: the runner never
/// aborts a handler that ignores it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    name: TaskName,
    queue: QueueName,
    retried: u32,
    max_retry: u32,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub fn new(
        envelope: &TaskEnvelope,
        retried: u32,
        max_retry: u32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            task_id: envelope.id(),
            name: envelope.name().clone(),
            queue: envelope.queue(),
            retried,
            max_retry,
            cancellation,
        }
    }

    /// Context for inline execution: first attempt, never cancelled.
    pub fn background(envelope: &TaskEnvelope) -> Self {
        let max_retry = envelope.options().max_retries.unwrap_or(DEFAULT_MAX_RETRY);
        Self::new(envelope, 0, max_retry, CancellationToken::new())
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn retried(&self) -> u32 {
        self.retried
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the runner asks in-flight handlers to wind down.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}
