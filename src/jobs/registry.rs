use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{JobContext, JobTask, Task};

/// Type-erased handler for one task kind.
#[async_trait]
trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: JsonValue, ctx: &JobContext) -> AppResult<()>;
}

struct TypedHandler<T>(T);

#[async_trait]
impl<T: JobTask> TaskHandler for TypedHandler<T> {
    async fn handle(&self, payload: JsonValue, ctx: &JobContext) -> AppResult<()> {
        let payload: T::Payload = serde_json::from_value(payload)
            .map_err(|e| AppError::validation("payload", e.to_string()))?;
        payload
            .validate()
            .map_err(|e| AppError::validation("payload", e.to_string()))?;
        self.0.execute(payload, ctx).await
    }
}

/// Registry mapping task kinds to their executors
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task executor under its `task_type()`
    pub fn register<T: JobTask>(&mut self, task: T) -> &mut Self {
        self.handlers
            .insert(T::task_type().to_string(), Arc::new(TypedHandler(task)));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Dispatch a task to the executor registered for its kind
    pub async fn execute(&self, task: Task, ctx: &JobContext) -> AppResult<()> {
        let handler = self
            .handlers
            .get(&task.kind)
            .ok_or_else(|| AppError::UnknownTaskKind {
                kind: task.kind.clone(),
            })?;

        handler.handle(task.payload, ctx).await
    }
}
