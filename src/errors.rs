use taskqueue_cron_parser::CronParseError;
use taskqueue_task::{TaskStatus, UnknownTaskStatus};
use thiserror::Error;

/// Errors that can occur during task queue operations.
#[derive(Error, Debug)]
pub enum TaskQueueError {
    /// The task was cancelled, its progress can't be updated anymore
    #[error("Task is cancelled")]
    TaskCancelled,

    #[error("Task is already finished")]
    TaskFinished,

    /// The task was never dequeued
    #[error("Task is not running")]
    TaskNotRunning,

    #[error("Task not found")]
    TaskNotFound,

    #[error("Task has already failed")]
    TaskFailed,

    #[error("Task queue is not specified")]
    TaskQueueNotSpecified,

    #[error("Task type is not specified")]
    TaskTypeNotSpecified,

    /// No schedule matches the requested queue, type, spec and references
    #[error("Task is not scheduled")]
    NotScheduled,

    /// No schedule is due, ends a schedule worker iteration
    #[error("No schedule is due")]
    ScheduleQueueIsEmpty,

    #[error("Invalid cron schedule '{expression}': {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: CronParseError,
    },

    #[error("Task spec must be a JSON object")]
    InvalidSpec,

    #[error("Progress is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Unknown reference '{0}'")]
    UnknownReference(String),

    #[error("Retention only applies to finished or failed tasks, not {0}")]
    InvalidRetentionStatus(TaskStatus),

    #[error("Unexpected task status: {0}")]
    UnknownStatus(#[from] UnknownTaskStatus),

    /// The caller's context was cancelled while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// An error occurred while executing an SQL query
    #[error("Error occured while query: {0}")]
    Sql(#[from] sqlx::Error),

    /// An error occurred while serializing or deserializing JSON data
    #[error("Error while serializing params: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskQueueError {
    /// Errors telling that a task can't be updated anymore because of its status. A worker
    /// receiving one of these stops reporting progress for the task.
    pub fn is_terminal_status(&self) -> bool {
        matches!(
            self,
            TaskQueueError::TaskCancelled
                | TaskQueueError::TaskFinished
                | TaskQueueError::TaskNotFound
                | TaskQueueError::TaskNotRunning
                | TaskQueueError::TaskFailed
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskQueueError::Cancelled)
    }
}

/// A Result type alias for TaskQueueError.
pub type Result<T> = core::result::Result<T, TaskQueueError>;
