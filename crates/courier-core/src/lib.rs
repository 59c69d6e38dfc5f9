//! courier-core
//!
//! Typed background task dispatch over a broker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_name, envelope, options, state, info, errors）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TaskRegistry, PayloadCodec）
//! - **broker**: Broker trait と InMemoryBroker（遅延・retry・archive）
//! - **app**: Background（非同期 runner）, MockBackground, BackgroundBuilder
//! - **error**: BackgroundError

pub mod app;
pub mod broker;
pub mod domain;
pub mod error;
pub mod typed;

pub use app::{Background, BackgroundBuilder, Dispatcher, MockBackground, ServerConfig};
pub use broker::{Broker, BrokerError, InMemoryBroker};
pub use domain::{DeliveryOptions, HandlerError, QueueName, TaskInfo};
pub use error::BackgroundError;
pub use typed::{Handler, Task, TaskContext};
