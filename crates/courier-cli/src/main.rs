use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier_core::{
    Background, DeliveryOptions, Handler, HandlerError, InMemoryBroker, QueueName, Task,
    TaskContext,
};

#[derive(Debug, Serialize, Deserialize)]
struct EmailDeliveryPayload {
    user_id: u64,
    template_id: String,
}

impl Task for EmailDeliveryPayload {
    const NAME: &'static str = "email:deliver";
}

struct DeliverEmail {
    remaining_failures: AtomicU32,
}

impl DeliverEmail {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<EmailDeliveryPayload> for DeliverEmail {
    async fn handle(
        &self,
        ctx: TaskContext,
        p: EmailDeliveryPayload,
    ) -> Result<(), HandlerError> {
        if p.template_id.is_empty() {
            return Err(HandlerError::skip_retry("template_id is empty"));
        }

        // 最初の n 回は失敗させて retry を見せる
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::retryable(format!(
                "intentional failure (left={left})"
            )));
        }

        info!(
            task_id = %ctx.task_id(),
            user_id = p.user_id,
            template_id = %p.template_id,
            retried = ctx.retried(),
            "sending welcome email"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) broker と runner を用意
    let broker = Arc::new(InMemoryBroker::new());
    let mut bg = Background::builder(broker)
        .concurrency(10)
        .expect_tasks(&[EmailDeliveryPayload::NAME])
        .register::<EmailDeliveryPayload, _>(DeliverEmail::new(1))?
        .build()?;

    // (B) worker を起動
    bg.start().await?;

    // (C) タスク投入
    bg.enqueue(
        &EmailDeliveryPayload {
            user_id: 42,
            template_id: "welcome".to_string(),
        },
        DeliveryOptions::new().with_queue(QueueName::Critical),
    )
    .await?;
    bg.enqueue(
        &EmailDeliveryPayload {
            user_id: 43,
            template_id: "reminder".to_string(),
        },
        DeliveryOptions::new().process_in(Duration::from_secs(10)),
    )
    .await?;

    info!("press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    // (D) shutdown
    bg.close().await?;
    Ok(())
}
