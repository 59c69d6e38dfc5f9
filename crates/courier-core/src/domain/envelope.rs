use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeliveryOptions, QueueName, TaskId, TaskName};

/// TaskName + payload + options の“運搬用”データ。
///
/// Built by the enqueuer, owned by the broker until leased, then by the
/// worker for one handler invocation. Fields are private so nobody mutates an
/// envelope in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    id: TaskId,
    name: TaskName,
    payload: Vec<u8>,
    options: DeliveryOptions,
    enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(id: TaskId, name: TaskName, payload: Vec<u8>, options: DeliveryOptions) -> Self {
        Self {
            id,
            name,
            payload,
            options,
            enqueued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    pub fn queue(&self) -> QueueName {
        self.options.queue
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}
