//! Runner configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::QueueName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueWeight {
    pub queue: QueueName,
    pub weight: u32,
}

impl QueueWeight {
    pub fn new(queue: QueueName, weight: u32) -> Self {
        Self { queue, weight }
    }
}

/// Worker pool and queue topology.
///
/// Every field has a default, so a partial document deserializes:
/// ```ignore
/// let config: ServerConfig = serde_json::from_str(r#"{"concurrency": 4}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of workers processing tasks at the same time.
    pub concurrency: usize,

    /// Queues to consume and their relative service share.
    pub queues: Vec<QueueWeight>,

    /// Always drain higher-weight queues first instead of weighted shuffling.
    /// Lower queues can starve under sustained load.
    pub strict_priority: bool,

    /// How long `close` waits for in-flight handlers.
    pub shutdown_timeout: Duration,

    /// Task names that must be registered before `start`.
    pub expected_tasks: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: vec![
                QueueWeight::new(QueueName::Critical, 6),
                QueueWeight::new(QueueName::Default, 3),
                QueueWeight::new(QueueName::Low, 1),
            ],
            strict_priority: false,
            shutdown_timeout: Duration::from_secs(8),
            expected_tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("at least one queue needs a positive weight")]
    NoQueues,

    #[error("queue {0} is configured more than once")]
    DuplicateQueue(QueueName),
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        let mut seen = HashSet::new();
        for qw in &self.queues {
            if !seen.insert(qw.queue) {
                return Err(ConfigError::DuplicateQueue(qw.queue));
            }
        }
        if self.queues.iter().all(|qw| qw.weight == 0) {
            return Err(ConfigError::NoQueues);
        }
        Ok(())
    }
}
