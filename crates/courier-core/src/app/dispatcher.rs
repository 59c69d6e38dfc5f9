use async_trait::async_trait;

use crate::domain::{DeliveryOptions, TaskInfo};
use crate::error::BackgroundError;
use crate::typed::{Handler, Task};

/// Dispatcher is the surface shared by the broker-backed runner and the
/// inline mock.
///
/// # 使用例
/// ```ignore
/// async fn signup<D: Dispatcher>(bg: &D, email: &str) -> Result<(), BackgroundError> {
///     let req = DeliverEmailRequest { email: email.into(), template: "welcome".into() };
///     bg.enqueue(&req, DeliveryOptions::default()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Bind `T` to `handler`. Fails with `DuplicateTask` if `T::NAME` is taken.
    fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), BackgroundError>;

    /// Submit `task`. Fails with `TaskNotFound` if no handler is registered.
    async fn enqueue<T: Task>(
        &self,
        task: &T,
        options: DeliveryOptions,
    ) -> Result<TaskInfo, BackgroundError>;

    async fn start(&mut self) -> Result<(), BackgroundError>;

    async fn close(&mut self) -> Result<(), BackgroundError>;
}
