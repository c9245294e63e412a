use std::{collections::HashMap, future::Future};

use taskqueue_task::{normalize_name, Task};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    handler::{BoxedTaskHandler, TaskHandler},
    progress::ProgressSink,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No handler found for task type '{task_type}'")]
pub struct NoHandlerFound {
    pub task_type: String,
}

/// Routes a task to the handler registered for its type.
///
/// The mapping is built once at wiring time and read-only afterwards. Types are matched
/// case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct DispatchHandler {
    handlers: HashMap<String, BoxedTaskHandler>,
}

impl DispatchHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `task_type`, replacing any previous one.
    pub fn define(mut self, task_type: &str, handler: impl TaskHandler) -> Self {
        self.handlers
            .insert(normalize_name(task_type), BoxedTaskHandler::new(handler));
        self
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn get(&self, task_type: &str) -> Option<&BoxedTaskHandler> {
        self.handlers.get(&normalize_name(task_type))
    }
}

impl TaskHandler for DispatchHandler {
    fn process(
        &self,
        ctx: CancellationToken,
        task: Task,
        progress: ProgressSink,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        let handler = self.get(task.task_type()).cloned();
        async move {
            match handler {
                Some(handler) => handler.process(ctx, task, progress).await,
                None => {
                    progress.close();
                    warn!(task_id = %task.id(), task_type = %task.task_type(), "No handler found");
                    Err(NoHandlerFound {
                        task_type: task.task_type().clone(),
                    }
                    .into())
                }
            }
        }
    }
}
