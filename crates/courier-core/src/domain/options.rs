//! Delivery options attached to an envelope at enqueue time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Named priority queue.
///
/// The set is fixed; how often each queue is served is decided by the
/// weights in `ServerConfig`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Critical,
    #[default]
    Default,
    Low,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Critical, QueueName::Default, QueueName::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Critical => "critical",
            QueueName::Default => "default",
            QueueName::Low => "low",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing knobs for one submission.
///
/// The core never interprets `delay` or `max_retries` itself; they travel
/// unchanged inside the envelope and the broker acts on them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOptions {
    pub queue: QueueName,

    /// Wait this long before the task becomes eligible for processing.
    pub delay: Duration,

    /// Retry ceiling override. `None` uses the broker default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Upper bound on one handler invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl DeliveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, queue: QueueName) -> Self {
        self.queue = queue;
        self
    }

    pub fn process_in(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_default_queue_without_delay() {
        let opts = DeliveryOptions::new();
        assert_eq!(opts.queue, QueueName::Default);
        assert_eq!(opts.delay, Duration::ZERO);
        assert_eq!(opts.max_retries, None);
        assert_eq!(opts.timeout, None);
    }

    #[test]
    fn builder_sets_every_field() {
        let opts = DeliveryOptions::new()
            .with_queue(QueueName::Critical)
            .process_in(Duration::from_secs(10))
            .with_max_retries(3)
            .with_timeout(Duration::from_secs(30));

        assert_eq!(opts.queue, QueueName::Critical);
        assert_eq!(opts.delay, Duration::from_secs(10));
        assert_eq!(opts.max_retries, Some(3));
        assert_eq!(opts.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn queue_names_serialize_lowercase() {
        let s = serde_json::to_string(&QueueName::Critical).unwrap();
        assert_eq!(s, "\"critical\"");
        assert_eq!(QueueName::Low.to_string(), "low");
    }
}
