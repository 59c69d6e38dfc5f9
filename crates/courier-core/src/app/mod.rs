//! App - アプリケーション層
//!
//! typed / broker を組み合わせて dispatcher を実装します。
//!
//! # 主要コンポーネント
//! - **Background**: broker を使う非同期 runner（worker pool）
//! - **BackgroundBuilder**: runner の構築とワイヤリング
//! - **MockBackground**: enqueue 時に handler をその場で実行する test 用 runner
//! - **Dispatcher**: 両者に共通の trait

pub mod background;
pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod mock;
mod processor;
pub mod selector;
mod worker;

// 主要な型を再エクスポート
pub use self::background::Background;
pub use self::builder::BackgroundBuilder;
pub use self::config::{ConfigError, QueueWeight, ServerConfig};
pub use self::dispatcher::Dispatcher;
pub use self::mock::MockBackground;
pub use self::selector::QueueSelector;
