//! Processor - 1 envelope を routing table で handler に渡して実行する

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::{HandlerError, TaskEnvelope};
use crate::typed::{TaskContext, TaskRegistry};

/// Runs one leased envelope against the routing table.
///
/// Every failure mode comes back as a `HandlerError` so the worker only has
/// to choose between `ack` and `fail`.
#[derive(Clone)]
pub(crate) struct Processor {
    routes: Arc<TaskRegistry>,
}

impl Processor {
    pub(crate) fn new(routes: Arc<TaskRegistry>) -> Self {
        Self { routes }
    }

    /// `cancel` is the token inside `ctx`; it fires when the per-task timeout
    /// elapses.
    pub(crate) async fn process(
        &self,
        envelope: &TaskEnvelope,
        ctx: TaskContext,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let Some(handler) = self.routes.get(envelope.name().as_str()) else {
            // 別プロセスが登録しているかもしれないので retry に回す
            return Err(HandlerError::retryable(format!(
                "handler not found for task {:?}",
                envelope.name().as_str()
            )));
        };

        let payload = envelope.payload().to_vec();
        let mut join = tokio::spawn(async move { handler.handle_dyn(ctx, &payload).await });

        let joined = match envelope.options().timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    // handler は止めない。token で終了を依頼するだけ
                    cancel.cancel();
                    return Err(HandlerError::retryable(format!(
                        "task timed out after {limit:?}"
                    )));
                }
            },
            None => join.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                Err(HandlerError::retryable("handler panicked").with_source(e))
            }
            Err(e) => Err(HandlerError::retryable("handler task was cancelled").with_source(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{DeliveryOptions, ErrorKind, TaskId};
    use crate::typed::handler::recording::RecordingHandler;
    use crate::typed::task::fixtures::DeliverEmailRequest;
    use crate::typed::{PayloadCodec, Task};

    fn envelope(options: DeliveryOptions) -> TaskEnvelope {
        TaskEnvelope::new(
            TaskId::generate(),
            DeliverEmailRequest::task_name(),
            PayloadCodec::encode(&DeliverEmailRequest::sample()).unwrap(),
            options,
        )
    }

    async fn run(routes: TaskRegistry, envelope: &TaskEnvelope) -> Result<(), HandlerError> {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(envelope, 0, 3, token.clone());
        Processor::new(Arc::new(routes)).process(envelope, ctx, token).await
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let (handler, calls) = RecordingHandler::<DeliverEmailRequest>::new();
        let mut routes = TaskRegistry::new();
        routes.register::<DeliverEmailRequest, _>(handler).unwrap();

        run(routes, &envelope(DeliveryOptions::default())).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![DeliverEmailRequest::sample()]);
    }

    #[tokio::test]
    async fn missing_route_is_retryable() {
        let err = run(TaskRegistry::new(), &envelope(DeliveryOptions::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert!(err.message().contains("DeliverEmailRequest"));
    }

    #[tokio::test]
    async fn panic_is_caught_as_retryable() {
        let mut routes = TaskRegistry::new();
        routes
            .register::<DeliverEmailRequest, _>(
                |_ctx: TaskContext, _req: DeliverEmailRequest| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok::<(), HandlerError>(())
                },
            )
            .unwrap();

        let err = run(routes, &envelope(DeliveryOptions::default()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.message(), "handler panicked");
        let source = std::error::Error::source(&err).expect("join error kept as source");
        assert!(source.to_string().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_the_context() {
        let mut routes = TaskRegistry::new();
        routes
            .register::<DeliverEmailRequest, _>(
                |ctx: TaskContext, _req: DeliverEmailRequest| async move {
                    ctx.cancelled().await;
                    Ok::<(), HandlerError>(())
                },
            )
            .unwrap();

        let envelope = envelope(DeliveryOptions::new().with_timeout(Duration::from_millis(50)));
        let token = CancellationToken::new();
        let ctx = TaskContext::new(&envelope, 0, 3, token.clone());
        let err = Processor::new(Arc::new(routes))
            .process(&envelope, ctx, token.clone())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(err.message().starts_with("task timed out"));
        assert!(token.is_cancelled());
    }
}
