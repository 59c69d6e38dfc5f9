//! Broker port and the bundled in-memory broker.
//!
//! The broker owns durability, delay, retry scheduling and archiving. The core
//! only submits envelopes, leases them back, and reports the outcome.

mod counts;
mod memory;
mod record;
mod retry;

pub use counts::QueueCounts;
pub use memory::{DEFAULT_MAX_ARCHIVED, InMemoryBroker};
pub use record::TaskRecord;
pub use retry::{DEFAULT_MAX_RETRY, RetryPolicy};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{HandlerError, QueueName, TaskEnvelope, TaskId, TaskInfo};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker: connection is closed")]
    Closed,

    #[error("broker: task id {0} conflicts with an existing task")]
    TaskIdConflict(TaskId),
}

/// A leased task for processing.
/// The worker owns this lease and must either `ack` or `fail`.
///
/// - Broker manages state transitions (Pending -> Active -> ...).
/// - Worker executes the handler and reports the result.
/// - `TaskEnvelope` is exposed as an immutable reference.
#[async_trait]
pub trait TaskLease: Send {
    fn envelope(&self) -> &TaskEnvelope;

    /// Failed attempts before this one.
    fn retried(&self) -> u32;

    fn max_retry(&self) -> u32;

    /// Mark success.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Mark failure. The broker decides between retry and archive from the
    /// error's kind and the retry count.
    async fn fail(self: Box<Self>, error: &HandlerError) -> Result<(), BrokerError>;
}

/// Broker port (interface).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Check the connection. Runners call this before spawning workers.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Submit a new envelope.
    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<TaskInfo, BrokerError>;

    /// Lease one ready task from the first non-empty queue in `queues`.
    ///
    /// Waits until a task is available. Returns `BrokerError::Closed` once the
    /// broker is closed.
    async fn lease(&self, queues: &[QueueName]) -> Result<Box<dyn TaskLease>, BrokerError>;

    /// Release the connection. Pending leases wake up with `Closed`.
    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn ping(&self) -> Result<(), BrokerError> {
        (**self).ping().await
    }

    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<TaskInfo, BrokerError> {
        (**self).enqueue(envelope).await
    }

    async fn lease(&self, queues: &[QueueName]) -> Result<Box<dyn TaskLease>, BrokerError> {
        (**self).lease(queues).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        (**self).close().await
    }
}
