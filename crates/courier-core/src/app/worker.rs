use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, warn};

use super::config::ServerConfig;
use super::processor::Processor;
use super::selector::QueueSelector;
use crate::broker::{Broker, BrokerError, TaskLease};
use crate::typed::{TaskContext, TaskRegistry};

/// Pause after a lease error other than `Closed` before asking again.
const LEASE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Worker group handle.
/// - `shutdown` を cancel するとワーカー全体が新しい lease を取らなくなる
/// - in-flight の handler は子 token 経由で cancel を観測できるが、abort はしない
pub(crate) struct WorkerGroup {
    shutdown: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `config.concurrency` workers, each running inside `span`.
    pub(crate) fn spawn<B: Broker + 'static>(
        config: &ServerConfig,
        broker: Arc<B>,
        routes: Arc<TaskRegistry>,
        span: Span,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let selector = Arc::new(QueueSelector::new(&config.queues, config.strict_priority));
        let processor = Processor::new(routes);

        let mut joins = Vec::with_capacity(config.concurrency);
        for worker_id in 0..config.concurrency {
            let worker = Worker {
                id: worker_id,
                broker: Arc::clone(&broker),
                selector: Arc::clone(&selector),
                processor: processor.clone(),
                shutdown: shutdown.clone(),
            };
            joins.push(tokio::spawn(worker.run().instrument(span.clone())));
        }

        Self { shutdown, joins }
    }

    pub(crate) fn len(&self) -> usize {
        self.joins.len()
    }

    /// Stop taking new leases and wait for the workers, at most `timeout`.
    ///
    /// Workers still busy when the timeout elapses are left to finish on their
    /// own. Returns the number of workers that ended with a panic.
    pub(crate) async fn shutdown(mut self, timeout: Duration) -> usize {
        self.shutdown.cancel();

        let joins = std::mem::take(&mut self.joins);
        let total = joins.len();
        let wait = async move {
            let mut panicked = 0;
            for join in joins {
                if let Err(e) = join.await {
                    error!(error = %e, "worker ended abnormally");
                    panicked += 1;
                }
            }
            panicked
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(panicked) => {
                debug!(workers = total, "all workers stopped");
                panicked
            }
            Err(_) => {
                warn!(
                    workers = total,
                    timeout = ?timeout,
                    "shutdown timeout elapsed; in-flight handlers keep running"
                );
                0
            }
        }
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Worker<B> {
    id: usize,
    broker: Arc<B>,
    selector: Arc<QueueSelector>,
    processor: Processor,
    shutdown: CancellationToken,
}

impl<B: Broker> Worker<B> {
    async fn run(self) {
        let mut rng = StdRng::from_entropy();
        debug!(worker_id = self.id, "worker started");

        loop {
            let order = self.selector.order(&mut rng);

            // lease は待つので shutdown と競合させる
            let lease = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                lease = self.broker.lease(&order) => lease,
            };

            match lease {
                Ok(lease) => self.handle(lease).await,
                Err(BrokerError::Closed) => break,
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "lease failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(LEASE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        debug!(worker_id = self.id, "worker stopped");
    }

    async fn handle(&self, lease: Box<dyn TaskLease>) {
        let envelope = lease.envelope().clone();
        let cancel = self.shutdown.child_token();
        let ctx = TaskContext::new(&envelope, lease.retried(), lease.max_retry(), cancel.clone());

        match self.processor.process(&envelope, ctx, cancel).await {
            Ok(()) => match lease.ack().await {
                Ok(()) => debug!(task_id = %envelope.id(), task = %envelope.name(), "task completed"),
                Err(e) => error!(task_id = %envelope.id(), error = %e, "ack failed"),
            },
            Err(err) => {
                warn!(
                    task_id = %envelope.id(),
                    task = %envelope.name(),
                    queue = %envelope.queue(),
                    retried = lease.retried(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "task failed"
                );
                if let Err(e) = lease.fail(&err).await {
                    error!(task_id = %envelope.id(), error = %e, "fail report failed");
                }
            }
        }
    }
}
