//! Task trait - request type と TaskName の対応付け
//!
//! The name is a compile-time constant on the type, so routing never needs
//! runtime type inspection.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskName;

/// Task は request type を TaskName に対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct DeliverEmailRequest {
///     email: String,
///     template: String,
/// }
///
/// impl Task for DeliverEmailRequest {
///     const NAME: &'static str = "email:deliver";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: enqueue 時に payload へ変換するため
/// - `DeserializeOwned`: worker 側で payload から復元するため
/// - `Send + Sync + 'static`: handler を Arc に格納して worker 間で共有するため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Routing name. Two types registered on one dispatcher must not share it.
    const NAME: &'static str;

    fn task_name() -> TaskName {
        TaskName::new(Self::NAME)
    }
}

/// Indirection does not change the name: `Box<T>` routes to `T`'s handler.
impl<T: Task> Task for Box<T> {
    const NAME: &'static str = T::NAME;
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde::{Deserialize, Serialize};

    use super::Task;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DeliverEmailRequest {
        pub email: String,
        pub template: String,
    }

    impl Task for DeliverEmailRequest {
        const NAME: &'static str = "DeliverEmailRequest";
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ResizeImageRequest {
        pub url: String,
        pub width: u32,
    }

    impl Task for ResizeImageRequest {
        const NAME: &'static str = "ResizeImageRequest";
    }

    impl DeliverEmailRequest {
        pub fn sample() -> Self {
            Self {
                email: "a@b.com".to_string(),
                template: "t".to_string(),
            }
        }
    }
}
