//! Task record: broker-side metadata + envelope.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::{TaskEnvelope, TaskInfo, TaskState};

/// Metadata + envelope for a task in the broker.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Queue structures (ready/scheduled) hold TaskId only.
/// - All state transitions happen here.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub envelope: TaskEnvelope,
    pub state: TaskState,

    /// Failed attempts so far.
    pub retried: u32,

    pub max_retry: u32,

    pub last_error: Option<String>,

    /// When a Scheduled / Retry task becomes Pending again.
    pub next_run_at: Option<Instant>,

    /// Wall-clock mirror of `next_run_at`, for TaskInfo.
    pub next_process_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(envelope: TaskEnvelope, max_retry: u32) -> Self {
        Self {
            envelope,
            state: TaskState::Pending,
            retried: 0,
            max_retry,
            last_error: None,
            next_run_at: None,
            next_process_at: None,
        }
    }

    /// Park until `delay` has elapsed.
    pub fn schedule(&mut self, delay: Duration) -> Instant {
        let at = run_at(delay);
        self.state = TaskState::Scheduled;
        self.next_run_at = Some(at);
        self.next_process_at = wall_clock_after(delay);
        at
    }

    /// Mark as leased.
    pub fn start(&mut self) {
        self.state = TaskState::Active;
    }

    pub fn complete(&mut self) {
        self.state = TaskState::Completed;
        self.next_run_at = None;
        self.next_process_at = None;
    }

    /// Give up on the task.
    pub fn archive(&mut self, error: String) {
        self.state = TaskState::Archived;
        self.last_error = Some(error);
        self.next_run_at = None;
        self.next_process_at = None;
    }

    /// Count the failure and park until the backoff elapses.
    pub fn schedule_retry(&mut self, delay: Duration, error: String) -> Instant {
        let at = run_at(delay);
        self.state = TaskState::Retry;
        self.last_error = Some(error);
        self.next_run_at = Some(at);
        self.next_process_at = wall_clock_after(delay);
        at
    }

    /// Move from Scheduled / Retry back to Pending.
    pub fn requeue(&mut self) {
        self.state = TaskState::Pending;
        self.next_run_at = None;
        self.next_process_at = None;
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.envelope.id(),
            name: self.envelope.name().clone(),
            queue: self.envelope.queue(),
            state: self.state,
            max_retry: self.max_retry,
            retried: self.retried,
            last_error: self.last_error.clone(),
            enqueued_at: self.envelope.enqueued_at(),
            next_process_at: self.next_process_at,
        }
    }
}

/// Roughly thirty years; stands in for delays too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn run_at(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

fn wall_clock_after(delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
}
