//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure (TypedHandler<T, H> → DynHandler)

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::PayloadCodec;
use super::context::TaskContext;
use super::task::Task;
use crate::domain::HandlerError;

/// Handler は Task を実行する
///
/// # 使用例
/// ```ignore
/// struct DeliverEmail;
///
/// #[async_trait]
/// impl Handler<DeliverEmailRequest> for DeliverEmail {
///     async fn handle(&self, ctx: TaskContext, req: DeliverEmailRequest) -> Result<(), HandlerError> {
///         send(&req.email, &req.template).await.map_err(|e| HandlerError::retryable(e.to_string()))
///     }
/// }
/// ```
///
/// Closures of shape `Fn(TaskContext, T) -> impl Future<Output = Result<(), HandlerError>>`
/// are handlers too.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: TaskContext, task: T) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, F, Fut> Handler<T> for F
where
    T: Task,
    F: Fn(TaskContext, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: TaskContext, task: T) -> Result<(), HandlerError> {
        (self)(ctx, task).await
    }
}

/// DynHandler は object-safe な Handler の抽象化
///
/// TypedHandler<T, H> を DynHandler にすることで
/// HashMap<TaskName, Arc<dyn DynHandler>> に格納できる。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, ctx: TaskContext, payload: &[u8]) -> Result<(), HandlerError>;

    fn task_name(&self) -> &'static str;
}

/// Decode step bound around a typed handler.
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, ctx: TaskContext, payload: &[u8]) -> Result<(), HandlerError> {
        // decode できない payload は何度配送しても decode できない
        let task: T =
            PayloadCodec::decode(payload).map_err(|e| HandlerError::skip_retry(e.to_string()))?;
        self.handler.handle(ctx, task).await
    }

    fn task_name(&self) -> &'static str {
        T::NAME
    }
}
