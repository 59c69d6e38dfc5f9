//! Inline dispatcher for tests.
//!
//! Runs the bound handler on the caller's task during `enqueue`, so a test
//! sees the handler's effects, and its error, as soon as `enqueue` returns.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{Span, debug};

use super::background::default_span;
use super::dispatcher::Dispatcher;
use crate::domain::{DeliveryOptions, TaskEnvelope, TaskId, TaskInfo, TaskName};
use crate::error::BackgroundError;
use crate::typed::{Handler, PayloadCodec, Task, TaskContext, TaskRegistry};

/// Mock dispatcher.
///
/// Same registration and name resolution as `Background`, no broker, no
/// workers. Delivery options are recorded in the returned `TaskInfo` but
/// otherwise ignored: delay, retry and timeout do not apply inline.
///
/// # Example
///
/// ```ignore
/// let mut bg = MockBackground::new();
/// bg.register::<DeliverEmailRequest, _>(DeliverEmail)?;
/// bg.enqueue(&req, DeliveryOptions::default()).await?;
///
/// bg.assert_executed(DeliverEmailRequest::NAME);
/// ```
pub struct MockBackground {
    registry: TaskRegistry,
    span: Span,
    executed: Mutex<Vec<TaskInfo>>,
}

impl MockBackground {
    pub fn new() -> Self {
        Self::with_span(default_span())
    }

    pub fn with_span(span: Span) -> Self {
        Self {
            registry: TaskRegistry::new(),
            span,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), BackgroundError> {
        self.registry.register::<T, H>(handler)
    }

    /// Run the handler for `task` now and return its result.
    pub async fn enqueue<T: Task>(
        &self,
        task: &T,
        options: DeliveryOptions,
    ) -> Result<TaskInfo, BackgroundError> {
        let name = T::task_name();
        let Some(handler) = self.registry.get(name.as_str()) else {
            return Err(BackgroundError::TaskNotFound(name));
        };

        let payload = PayloadCodec::encode(task)?;
        let envelope = TaskEnvelope::new(TaskId::generate(), name, payload, options);
        let ctx = TaskContext::background(&envelope);
        handler.handle_dyn(ctx, envelope.payload()).await?;

        let info = TaskInfo::completed(&envelope);
        debug!(parent: &self.span, task_id = %info.id, task = %info.name, "executed task inline");
        self.lock().push(info.clone());
        Ok(info)
    }

    pub async fn start(&mut self) -> Result<(), BackgroundError> {
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), BackgroundError> {
        Ok(())
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Successfully executed tasks, oldest first.
    pub fn executed(&self) -> Vec<TaskInfo> {
        self.lock().clone()
    }

    pub fn executed_of(&self, name: &str) -> Vec<TaskInfo> {
        self.lock()
            .iter()
            .filter(|info| info.name.as_str() == name)
            .cloned()
            .collect()
    }

    /// Panics unless a task named `name` ran successfully.
    pub fn assert_executed(&self, name: &str) {
        let executed = self.lock();
        assert!(
            executed.iter().any(|info| info.name.as_str() == name),
            "expected task '{}' to be executed; executed: {:?}",
            name,
            executed.iter().map(|info| &info.name).collect::<Vec<&TaskName>>()
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TaskInfo>> {
        self.executed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockBackground {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for MockBackground {
    fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), BackgroundError> {
        MockBackground::register(self, handler)
    }

    async fn enqueue<T: Task>(
        &self,
        task: &T,
        options: DeliveryOptions,
    ) -> Result<TaskInfo, BackgroundError> {
        MockBackground::enqueue(self, task, options).await
    }

    async fn start(&mut self) -> Result<(), BackgroundError> {
        MockBackground::start(self).await
    }

    async fn close(&mut self) -> Result<(), BackgroundError> {
        MockBackground::close(self).await
    }
}
