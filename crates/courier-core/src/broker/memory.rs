//! In-memory broker implementation.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{
    Broker, BrokerError, DEFAULT_MAX_RETRY, QueueCounts, RetryPolicy, TaskLease, TaskRecord,
};
use crate::domain::{ErrorKind, HandlerError, QueueName, TaskEnvelope, TaskId, TaskInfo, TaskState};

/// Archived records kept for inspection before the oldest are dropped.
pub const DEFAULT_MAX_ARCHIVED: usize = 10_000;

/// Scheduled task entry (delayed tasks and retry backoff).
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    run_at: Instant,
    task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

struct BrokerState {
    /// Live task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,

    /// Ready lists per queue (TaskIds only).
    ready: HashMap<QueueName, VecDeque<TaskId>>,

    /// Delayed and retrying tasks.
    scheduled: BinaryHeap<ScheduledTask>,

    /// Completed tasks still retained, oldest first, with their expiry.
    completed: VecDeque<(Instant, TaskId)>,

    /// Archived tasks, oldest first.
    archived: VecDeque<TaskId>,

    /// Acked tasks per queue since start, released or not.
    succeeded: HashMap<QueueName, usize>,

    retry_policy: RetryPolicy,

    default_max_retry: u32,

    /// How long a completed record stays inspectable. Zero drops it on ack.
    completed_retention: Duration,

    max_archived: usize,

    closed: bool,
}

impl BrokerState {
    fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            records: HashMap::new(),
            ready: HashMap::new(),
            scheduled: BinaryHeap::new(),
            completed: VecDeque::new(),
            archived: VecDeque::new(),
            succeeded: HashMap::new(),
            retry_policy,
            default_max_retry: DEFAULT_MAX_RETRY,
            completed_retention: Duration::ZERO,
            max_archived: DEFAULT_MAX_ARCHIVED,
            closed: false,
        }
    }

    fn push_ready(&mut self, queue: QueueName, task_id: TaskId) {
        self.ready.entry(queue).or_default().push_back(task_id);
    }

    /// Move tasks from scheduled to ready if their time has come.
    fn promote_scheduled_tasks(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.run_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.task_id)
                && matches!(record.state, TaskState::Scheduled | TaskState::Retry)
            {
                record.requeue();
                let queue = record.envelope.queue();
                self.push_ready(queue, entry.task_id);
            }
        }
    }

    /// Pop the first ready task, honouring the caller's queue order.
    /// Ids whose record is gone or no longer pending are skipped.
    fn take_ready(&mut self, queues: &[QueueName]) -> Option<TaskId> {
        for queue in queues {
            let Some(ready) = self.ready.get_mut(queue) else {
                continue;
            };
            while let Some(task_id) = ready.pop_front() {
                if self
                    .records
                    .get(&task_id)
                    .is_some_and(|record| record.state.is_runnable())
                {
                    return Some(task_id);
                }
            }
        }
        None
    }

    /// Record success; the record is released now or once retention expires.
    fn complete(&mut self, task_id: TaskId, now: Instant) {
        let Some(record) = self.records.get_mut(&task_id) else {
            return;
        };
        record.complete();
        *self.succeeded.entry(record.envelope.queue()).or_default() += 1;

        if self.completed_retention.is_zero() {
            self.records.remove(&task_id);
        } else {
            let expires_at = now
                .checked_add(self.completed_retention)
                .unwrap_or(now + Duration::from_secs(86_400 * 365));
            self.completed.push_back((expires_at, task_id));
        }
    }

    /// Track a freshly archived record and drop the oldest beyond the cap.
    fn track_archived(&mut self, task_id: TaskId) {
        self.archived.push_back(task_id);
        while self.archived.len() > self.max_archived {
            let Some(oldest) = self.archived.pop_front() else {
                break;
            };
            self.release_terminal(oldest);
        }
    }

    /// Drop completed records whose retention has expired.
    fn prune_completed(&mut self, now: Instant) {
        while let Some(&(expires_at, task_id)) = self.completed.front() {
            if expires_at > now {
                break;
            }
            self.completed.pop_front();
            self.release_terminal(task_id);
        }
    }

    fn release_terminal(&mut self, task_id: TaskId) {
        if self
            .records
            .get(&task_id)
            .is_some_and(|record| record.state.is_terminal())
        {
            self.records.remove(&task_id);
        }
    }

    fn counts(&self, queue: Option<QueueName>) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            if queue.is_none_or(|q| record.envelope.queue() == q) {
                counts.add(record.state);
            }
        }
        counts.succeeded = match queue {
            Some(q) => self.succeeded.get(&q).copied().unwrap_or(0),
            None => self.succeeded.values().sum(),
        };
        counts
    }
}

/// In-memory broker.
///
/// Provides the broker semantics the dispatcher relies on inside one process:
/// weighted queues are served in the order each `lease` call asks for,
/// delayed tasks wait in a timer heap, failures are retried with backoff up to
/// the task's ceiling and then archived. Nothing survives a restart.
///
/// Completed records are released on ack unless `completed_retention` is set;
/// archived records are capped at `max_archived`, oldest dropped first.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    pub fn with_retry_policy(retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(retry_policy))),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Override the retry ceiling used when an envelope carries none.
    pub fn default_max_retry(self, max_retry: u32) -> Self {
        self.configure(|state| state.default_max_retry = max_retry)
    }

    /// Keep completed records inspectable through `task_info` for `retention`.
    pub fn completed_retention(self, retention: Duration) -> Self {
        self.configure(|state| state.completed_retention = retention)
    }

    /// Cap on archived records kept for inspection.
    pub fn max_archived(self, max_archived: usize) -> Self {
        self.configure(|state| state.max_archived = max_archived)
    }

    fn configure(mut self, apply: impl FnOnce(&mut BrokerState)) -> Self {
        // nobody else holds the Arc while building
        if let Some(state) = Arc::get_mut(&mut self.state) {
            apply(state.get_mut());
        }
        self
    }

    /// Counts across all queues.
    pub async fn counts(&self) -> QueueCounts {
        let mut state = self.state.lock().await;
        state.prune_completed(Instant::now());
        state.counts(None)
    }

    pub async fn counts_for(&self, queue: QueueName) -> QueueCounts {
        let mut state = self.state.lock().await;
        state.prune_completed(Instant::now());
        state.counts(Some(queue))
    }

    /// Info for a live, retained or archived task. `None` once released.
    pub async fn task_info(&self, task_id: TaskId) -> Option<TaskInfo> {
        let mut state = self.state.lock().await;
        state.prune_completed(Instant::now());
        state.records.get(&task_id).map(TaskRecord::info)
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        if self.state.lock().await.closed {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<TaskInfo, BrokerError> {
        let (info, delayed) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(BrokerError::Closed);
            }
            state.prune_completed(Instant::now());
            let task_id = envelope.id();
            if state.records.contains_key(&task_id) {
                return Err(BrokerError::TaskIdConflict(task_id));
            }

            let max_retry = envelope
                .options()
                .max_retries
                .unwrap_or(state.default_max_retry);
            let delay = envelope.options().delay;
            let queue = envelope.queue();
            let mut record = TaskRecord::new(envelope, max_retry);

            let delayed = !delay.is_zero();
            if delayed {
                let run_at = record.schedule(delay);
                state.scheduled.push(ScheduledTask { run_at, task_id });
            } else {
                state.push_ready(queue, task_id);
            }
            let info = record.info();
            state.records.insert(task_id, record);
            (info, delayed)
        };

        if delayed {
            // every idle worker has to recompute its next wake-up
            self.notify.notify_waiters();
        } else {
            self.notify.notify_one();
        }

        Ok(info)
    }

    async fn lease(&self, queues: &[QueueName]) -> Result<Box<dyn TaskLease>, BrokerError> {
        loop {
            // 先に登録しておくことで close() の notify_waiters を取りこぼさない
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                let now = Instant::now();
                state.promote_scheduled_tasks(now);
                state.prune_completed(now);

                if let Some(task_id) = state.take_ready(queues)
                    && let Some(record) = state.records.get_mut(&task_id)
                {
                    record.start();
                    let lease = InMemoryLease {
                        task_id,
                        envelope: record.envelope.clone(),
                        retried: record.retried,
                        max_retry: record.max_retry,
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                    };
                    return Ok(Box::new(lease));
                }

                // No ready tasks - check if we have scheduled tasks
                state.scheduled.peek().map(|entry| entry.run_at)
            };

            // Wait for notification OR next scheduled task time
            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(wake_at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Lease implementation for InMemoryBroker.
struct InMemoryLease {
    task_id: TaskId,
    envelope: TaskEnvelope,
    retried: u32,
    max_retry: u32,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl TaskLease for InMemoryLease {
    fn envelope(&self) -> &TaskEnvelope {
        &self.envelope
    }

    fn retried(&self) -> u32 {
        self.retried
    }

    fn max_retry(&self) -> u32 {
        self.max_retry
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.state.lock().await.complete(self.task_id, Instant::now());
        Ok(())
    }

    async fn fail(self: Box<Self>, error: &HandlerError) -> Result<(), BrokerError> {
        let should_notify = {
            let mut state = self.state.lock().await;
            let policy = state.retry_policy.clone();
            let Some(record) = state.records.get_mut(&self.task_id) else {
                return Ok(());
            };
            if record.state.is_terminal() {
                return Ok(());
            }

            let message = error.to_string();
            let retry_at = if error.kind() == ErrorKind::SkipRetry {
                tracing::debug!(task_id = %self.task_id, "skip retry requested, archiving");
                record.archive(message);
                None
            } else if record.retried >= record.max_retry {
                tracing::debug!(
                    task_id = %self.task_id,
                    retried = record.retried,
                    max_retry = record.max_retry,
                    "retry ceiling reached, archiving"
                );
                record.archive(message);
                None
            } else {
                record.retried += 1;
                let delay = policy.next_delay(record.retried);
                tracing::debug!(
                    task_id = %self.task_id,
                    retried = record.retried,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
                Some(record.schedule_retry(delay, message))
            };

            match retry_at {
                Some(run_at) => {
                    state.scheduled.push(ScheduledTask {
                        run_at,
                        task_id: self.task_id,
                    });
                    true
                }
                None => {
                    state.track_archived(self.task_id);
                    false
                }
            }
        }; // Lock released here

        if should_notify {
            self.notify.notify_waiters();
        }

        Ok(())
    }
}
