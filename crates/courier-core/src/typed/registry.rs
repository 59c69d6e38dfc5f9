//! TaskRegistry - Handler の登録と管理
//!
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（worker 間で共有する）

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::TaskName;
use crate::error::BackgroundError;

/// TaskRegistry は型付き Handler を登録・管理する
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<DeliverEmailRequest, _>(DeliverEmail)?;
///
/// let handler = registry.get("email:deliver");
/// ```
///
/// Design:
/// - Built during initialization (mutable).
/// - Read-only once a runner has taken its snapshot at start.
///   Registering afterwards is a usage error the runner does not observe;
///   there is no lock guarding it.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<TaskName, Arc<dyn DynHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind `T` to `handler`.
    ///
    /// Not idempotent: a second registration for the same name fails and the
    /// first one stays in place.
    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), BackgroundError> {
        let name = T::task_name();
        if self.handlers.contains_key(&name) {
            return Err(BackgroundError::DuplicateTask(name));
        }
        self.handlers
            .insert(name, Arc::new(TypedHandler::<T, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<TaskName> {
        let mut names: Vec<TaskName> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
