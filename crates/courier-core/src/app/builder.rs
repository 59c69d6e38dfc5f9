//! BackgroundBuilder - runner の構築とワイヤリング
//!
//! - Builder パターン
//! - 起動時検証（Fail-fast 設計）: 設定は build()、期待 task は start() で検証

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use super::background::{Background, default_span};
use super::config::{QueueWeight, ServerConfig};
use crate::broker::Broker;
use crate::domain::QueueName;
use crate::error::BackgroundError;
use crate::typed::{Handler, Task, TaskRegistry};

/// BackgroundBuilder は Background を構築する
///
/// # 使用例
/// ```ignore
/// let bg = Background::builder(broker)
///     .concurrency(4)
///     .queue(QueueName::Critical, 10)
///     .expect_tasks(&["email:deliver"])
///     .span(tracing::info_span!("mailer"))
///     .register::<DeliverEmailRequest, _>(DeliverEmail)?
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() で ServerConfig を検証し、不正なら `BackgroundError::Config`
/// - expect_tasks() の集合は start() 時に「期待集合 ⊆ 登録済み集合」をチェック
pub struct BackgroundBuilder<B> {
    broker: Arc<B>,
    registry: TaskRegistry,
    config: ServerConfig,
    span: Option<Span>,
}

impl<B: Broker + 'static> BackgroundBuilder<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            registry: TaskRegistry::new(),
            config: ServerConfig::default(),
            span: None,
        }
    }

    /// Replace the whole configuration, e.g. one loaded from a file.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the weight of one queue, adding it if it is not configured yet.
    pub fn queue(mut self, queue: QueueName, weight: u32) -> Self {
        match self.config.queues.iter_mut().find(|qw| qw.queue == queue) {
            Some(qw) => qw.weight = weight,
            None => self.config.queues.push(QueueWeight::new(queue, weight)),
        }
        self
    }

    pub fn strict_priority(mut self, strict: bool) -> Self {
        self.config.strict_priority = strict;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// 期待される TaskName のリストを設定
    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.config.expected_tasks = names.iter().map(|name| name.to_string()).collect();
        self
    }

    /// Span every log line of the runner and its workers is emitted in.
    /// Defaults to `info_span!("background")`.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, BackgroundError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn build(self) -> Result<Background<B>, BackgroundError> {
        self.config.validate()?;
        let span = self.span.unwrap_or_else(default_span);
        Ok(Background::from_parts(
            self.broker,
            self.registry,
            self.config,
            span,
        ))
    }
}
