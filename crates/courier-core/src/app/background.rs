//! Background - broker を使う非同期 runner
//!
//! - register: 型ごとに handler を束ねる
//! - enqueue: 型から TaskName を引き、payload にして broker に渡す
//! - start / close: worker pool のライフサイクル

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, Span, info, warn};

use super::builder::BackgroundBuilder;
use super::config::ServerConfig;
use super::dispatcher::Dispatcher;
use super::worker::WorkerGroup;
use crate::broker::Broker;
use crate::domain::{DeliveryOptions, TaskEnvelope, TaskId, TaskInfo};
use crate::error::BackgroundError;
use crate::typed::{Handler, PayloadCodec, Task, TaskRegistry};

/// Broker-backed dispatcher.
///
/// # 使用例
/// ```ignore
/// let mut bg = Background::builder(Arc::new(InMemoryBroker::new()))
///     .concurrency(4)
///     .build()?;
/// bg.register::<DeliverEmailRequest, _>(DeliverEmail)?;
/// bg.start().await?;
///
/// bg.enqueue(&req, DeliveryOptions::new().process_in(Duration::from_secs(10))).await?;
///
/// bg.close().await?;
/// ```
pub struct Background<B: Broker> {
    broker: Arc<B>,
    registry: TaskRegistry,
    config: ServerConfig,
    span: Span,
    workers: Option<WorkerGroup>,
}

impl<B: Broker + 'static> Background<B> {
    /// Runner with the default `ServerConfig`.
    pub fn new(broker: Arc<B>) -> Self {
        Self::from_parts(broker, TaskRegistry::new(), ServerConfig::default(), default_span())
    }

    pub fn builder(broker: Arc<B>) -> BackgroundBuilder<B> {
        BackgroundBuilder::new(broker)
    }

    pub(crate) fn from_parts(
        broker: Arc<B>,
        registry: TaskRegistry,
        config: ServerConfig,
        span: Span,
    ) -> Self {
        Self {
            broker,
            registry,
            config,
            span,
            workers: None,
        }
    }

    /// Must be called before `start`; the running workers do not see later
    /// registrations.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), BackgroundError> {
        self.registry.register::<T, H>(handler)
    }

    pub async fn enqueue<T: Task>(
        &self,
        task: &T,
        options: DeliveryOptions,
    ) -> Result<TaskInfo, BackgroundError> {
        let name = T::task_name();
        if !self.registry.contains(name.as_str()) {
            return Err(BackgroundError::TaskNotFound(name));
        }

        let payload = PayloadCodec::encode(task)?;
        let envelope = TaskEnvelope::new(TaskId::generate(), name, payload, options);
        let info = self.broker.enqueue(envelope).await?;

        info!(
            parent: &self.span,
            task_id = %info.id,
            queue = %info.queue,
            "enqueued task"
        );
        Ok(info)
    }

    /// Spawn the worker pool.
    ///
    /// Fails when already running, when an expected task is not registered,
    /// or when the broker does not answer `ping`.
    pub async fn start(&mut self) -> Result<(), BackgroundError> {
        if self.workers.is_some() {
            return Err(BackgroundError::AlreadyStarted);
        }

        let missing: Vec<String> = self
            .config
            .expected_tasks
            .iter()
            .filter(|name| !self.registry.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BackgroundError::MissingTasks(missing));
        }

        self.broker.ping().await?;

        let routes = Arc::new(self.registry.clone());
        let workers = WorkerGroup::spawn(
            &self.config,
            Arc::clone(&self.broker),
            routes,
            self.span.clone(),
        );
        info!(
            parent: &self.span,
            workers = workers.len(),
            tasks = ?self.registry.registered_names(),
            "started workers"
        );
        self.workers = Some(workers);
        Ok(())
    }

    /// Stop the workers, then close the broker.
    ///
    /// The broker is closed even if workers ended abnormally; its result is
    /// what this returns.
    pub async fn close(&mut self) -> Result<(), BackgroundError> {
        if let Some(workers) = self.workers.take() {
            info!(parent: &self.span, "shutting down workers");
            let panicked = workers
                .shutdown(self.config.shutdown_timeout)
                .instrument(self.span.clone())
                .await;
            if panicked > 0 {
                warn!(parent: &self.span, panicked, "workers ended abnormally during shutdown");
            }
        }

        self.broker.close().await?;
        info!(parent: &self.span, "broker closed");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

pub(crate) fn default_span() -> Span {
    tracing::info_span!("background")
}

#[async_trait]
impl<B: Broker + 'static> Dispatcher for Background<B> {
    fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), BackgroundError> {
        Background::register(self, handler)
    }

    async fn enqueue<T: Task>(
        &self,
        task: &T,
        options: DeliveryOptions,
    ) -> Result<TaskInfo, BackgroundError> {
        Background::enqueue(self, task, options).await
    }

    async fn start(&mut self) -> Result<(), BackgroundError> {
        Background::start(self).await
    }

    async fn close(&mut self) -> Result<(), BackgroundError> {
        Background::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::broker::{BrokerError, InMemoryBroker, QueueCounts, RetryPolicy};
    use crate::domain::{HandlerError, QueueName, TaskState};
    use crate::typed::TaskContext;
    use crate::typed::handler::recording::RecordingHandler;
    use crate::typed::task::fixtures::{DeliverEmailRequest, ResizeImageRequest};

    fn broker() -> Arc<InMemoryBroker> {
        Arc::new(InMemoryBroker::with_retry_policy(RetryPolicy::constant(
            Duration::from_millis(5),
        )))
    }

    fn background(broker: &Arc<InMemoryBroker>) -> Background<InMemoryBroker> {
        Background::builder(Arc::clone(broker))
            .concurrency(2)
            .shutdown_timeout(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    async fn wait_for<F>(broker: &InMemoryBroker, done: F) -> QueueCounts
    where
        F: Fn(&QueueCounts) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let counts = broker.counts().await;
                if done(&counts) {
                    return counts;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("broker did not reach the expected state")
    }

    #[tokio::test]
    async fn enqueued_task_is_processed_and_completed() {
        let broker = broker();
        let mut bg = background(&broker);
        let (handler, calls) = RecordingHandler::<DeliverEmailRequest>::new();
        bg.register::<DeliverEmailRequest, _>(handler).unwrap();
        bg.start().await.unwrap();

        let req = DeliverEmailRequest::sample();
        let info = bg.enqueue(&req, DeliveryOptions::default()).await.unwrap();
        assert_eq!(info.state, TaskState::Pending);
        assert_eq!(info.name.as_str(), "DeliverEmailRequest");

        let counts = wait_for(&broker, |c| c.succeeded == 1).await;
        assert_eq!(*calls.lock().unwrap(), vec![req]);
        // completed records are released on ack by default
        assert_eq!(counts.total(), 0);
        assert!(broker.task_info(info.id).await.is_none());

        bg.close().await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_type_is_not_submitted() {
        let broker = broker();
        let bg = background(&broker);

        let err = bg
            .enqueue(&DeliverEmailRequest::sample(), DeliveryOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BackgroundError::TaskNotFound(name) if name.as_str() == "DeliverEmailRequest"));
        assert_eq!(broker.counts().await.total(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_archived_without_invoking_handler() {
        let broker = broker();
        let mut bg = background(&broker);
        let (handler, calls) = RecordingHandler::<DeliverEmailRequest>::new();
        bg.register::<DeliverEmailRequest, _>(handler).unwrap();
        bg.start().await.unwrap();

        let envelope = TaskEnvelope::new(
            TaskId::generate(),
            DeliverEmailRequest::task_name(),
            b"not json".to_vec(),
            DeliveryOptions::default(),
        );
        let id = envelope.id();
        broker.enqueue(envelope).await.unwrap();

        wait_for(&broker, |c| c.archived == 1).await;
        assert!(calls.lock().unwrap().is_empty());

        let info = broker.task_info(id).await.unwrap();
        assert_eq!(info.retried, 0);
        assert!(info.last_error.unwrap().contains("skip retry"));

        bg.close().await.unwrap();
    }

    #[tokio::test]
    async fn retryable_failure_is_redelivered_until_success() {
        let broker = Arc::new(
            InMemoryBroker::with_retry_policy(RetryPolicy::constant(Duration::from_millis(5)))
                .completed_retention(Duration::from_secs(60)),
        );
        let mut bg = background(&broker);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        bg.register::<DeliverEmailRequest, _>(move |_ctx: TaskContext, _req: DeliverEmailRequest| {
            let attempts = Arc::clone(&seen);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(HandlerError::retryable("smtp unavailable"));
                }
                Ok(())
            }
        })
        .unwrap();
        bg.start().await.unwrap();

        let info = bg
            .enqueue(&DeliverEmailRequest::sample(), DeliveryOptions::default())
            .await
            .unwrap();

        wait_for(&broker, |c| c.succeeded == 1).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(broker.task_info(info.id).await.unwrap().retried, 2);

        bg.close().await.unwrap();
    }

    #[tokio::test]
    async fn skip_retry_is_never_redelivered() {
        let broker = broker();
        let mut bg = background(&broker);
        let (handler, calls) = RecordingHandler::<DeliverEmailRequest>::failing(|| {
            HandlerError::skip_retry("unknown template")
        });
        bg.register::<DeliverEmailRequest, _>(handler).unwrap();
        bg.start().await.unwrap();

        bg.enqueue(&DeliverEmailRequest::sample(), DeliveryOptions::default())
            .await
            .unwrap();

        wait_for(&broker, |c| c.archived == 1).await;
        // もう一度配送されないことを確認する
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);

        bg.close().await.unwrap();
    }

    #[tokio::test]
    async fn retry_ceiling_archives_the_task() {
        let broker = broker();
        let mut bg = background(&broker);
        let (handler, calls) = RecordingHandler::<DeliverEmailRequest>::failing(|| {
            HandlerError::retryable("still failing")
        });
        bg.register::<DeliverEmailRequest, _>(handler).unwrap();
        bg.start().await.unwrap();

        let info = bg
            .enqueue(
                &DeliverEmailRequest::sample(),
                DeliveryOptions::new().with_max_retries(1),
            )
            .await
            .unwrap();
        assert_eq!(info.max_retry, 1);

        wait_for(&broker, |c| c.archived == 1).await;
        assert_eq!(calls.lock().unwrap().len(), 2);
        let info = broker.task_info(info.id).await.unwrap();
        assert_eq!(info.last_error.as_deref(), Some("still failing"));

        bg.close().await.unwrap();
    }

    #[tokio::test]
    async fn delayed_task_is_scheduled_then_processed() {
        let broker = broker();
        let mut bg = background(&broker);
        let (handler, calls) = RecordingHandler::<ResizeImageRequest>::new();
        bg.register::<ResizeImageRequest, _>(handler).unwrap();
        bg.start().await.unwrap();

        let req = ResizeImageRequest {
            url: "https://example.com/a.png".to_string(),
            width: 320,
        };
        let info = bg
            .enqueue(
                &req,
                DeliveryOptions::new()
                    .with_queue(QueueName::Low)
                    .process_in(Duration::from_millis(30)),
            )
            .await
            .unwrap();
        assert_eq!(info.state, TaskState::Scheduled);
        assert_eq!(info.queue, QueueName::Low);

        wait_for(&broker, |c| c.succeeded == 1).await;
        assert_eq!(*calls.lock().unwrap(), vec![req]);

        bg.close().await.unwrap();
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let broker = broker();
        let mut bg = background(&broker);
        bg.start().await.unwrap();
        assert!(bg.is_running());

        let err = bg.start().await.unwrap_err();
        assert!(matches!(err, BackgroundError::AlreadyStarted));

        bg.close().await.unwrap();
        assert!(!bg.is_running());
    }

    #[tokio::test]
    async fn start_requires_expected_tasks() {
        let broker = broker();
        let mut bg = Background::builder(Arc::clone(&broker))
            .expect_tasks(&[DeliverEmailRequest::NAME, ResizeImageRequest::NAME])
            .build()
            .unwrap();
        let (handler, _calls) = RecordingHandler::<DeliverEmailRequest>::new();
        bg.register::<DeliverEmailRequest, _>(handler).unwrap();

        let err = bg.start().await.unwrap_err();
        assert!(matches!(
            err,
            BackgroundError::MissingTasks(missing) if missing == vec![ResizeImageRequest::NAME.to_string()]
        ));
        assert!(!bg.is_running());
    }

    #[tokio::test]
    async fn close_stops_idle_workers_and_closes_broker() {
        let broker = broker();
        let mut bg = background(&broker);
        bg.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), bg.close())
            .await
            .expect("close should not hang on idle workers")
            .unwrap();
        assert!(broker.is_closed().await);

        let (handler, _calls) = RecordingHandler::<DeliverEmailRequest>::new();
        bg.register::<DeliverEmailRequest, _>(handler).unwrap();
        let err = bg
            .enqueue(&DeliverEmailRequest::sample(), DeliveryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackgroundError::Broker(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn close_cancels_in_flight_handler_context() {
        let broker = broker();
        let mut bg = background(&broker);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = std::sync::Mutex::new(Some(tx));
        bg.register::<DeliverEmailRequest, _>(move |ctx: TaskContext, _req: DeliverEmailRequest| {
            let started = tx.lock().unwrap().take();
            async move {
                if let Some(started) = started {
                    let _ = started.send(());
                }
                ctx.cancelled().await;
                Ok::<(), HandlerError>(())
            }
        })
        .unwrap();
        bg.start().await.unwrap();
        bg.enqueue(&DeliverEmailRequest::sample(), DeliveryOptions::default())
            .await
            .unwrap();
        rx.await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), bg.close())
            .await
            .expect("handler should observe cancellation")
            .unwrap();
        assert_eq!(broker.counts().await.succeeded, 1);
    }
}
