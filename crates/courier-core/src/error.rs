use thiserror::Error;

use crate::app::config::ConfigError;
use crate::broker::BrokerError;
use crate::domain::{HandlerError, TaskName};
use crate::typed::CodecError;

/// Errors surfaced synchronously by `register`, `enqueue`, `start` and `close`.
#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("background: duplicate task: {0}")]
    DuplicateTask(TaskName),

    #[error("background: task not found: {0}")]
    TaskNotFound(TaskName),

    #[error("background: {0}")]
    Serialization(#[from] CodecError),

    /// Broker failures pass through untouched.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Only the inline runner reports handler failures to the enqueuer.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("background: expected tasks are not registered: {0:?}")]
    MissingTasks(Vec<String>),

    #[error("background: already started")]
    AlreadyStarted,

    #[error("background: {0}")]
    Config(#[from] ConfigError),
}
