use std::sync::Arc;

use getset::Getters;
use sqlx::PgPool;
use taskqueue_schema::SetupError;
use taskqueue_task::{Reference, Schedule, Task};
use taskqueue_task_handler::TaskHandler;
use uuid::Uuid;

use crate::{
    dequeuer::Dequeuer,
    errors::{Result, TaskQueueError},
    metrics::Metrics,
    options::{TaskQueueConfig, TaskQueueOptions},
    queuer::Queuer,
    retention::RetentionHandler,
    schedule_worker::ScheduleWorker,
    scheduler::Scheduler,
    sql::{
        get_task::{get_schedule, get_task},
        update_task::cancel_task,
    },
    worker::Worker,
};

/// Handle on the `tasks` and `schedules` tables, shared by every component.
///
/// Cloning is cheap.
#[derive(Clone, Getters)]
#[getset(get = "pub")]
pub struct TaskStore {
    pub(crate) pg_pool: PgPool,
    /// Unescaped schema name
    pub(crate) schema: String,
    pub(crate) escaped_schema: String,
    pub(crate) references: Arc<Vec<Reference>>,
    pub(crate) config: TaskQueueConfig,
    pub(crate) retention_queue: String,
    pub(crate) metrics: Metrics,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("schema", &self.schema)
            .field("references", &self.references)
            .field("retention_queue", &self.retention_queue)
            .finish_non_exhaustive()
    }
}

impl TaskStore {
    pub fn options() -> TaskQueueOptions {
        TaskQueueOptions::default()
    }

    /// Creates or upgrades the tables, see [`taskqueue_schema::setup_tables`]
    pub async fn setup_tables(&self) -> std::result::Result<(), SetupError> {
        taskqueue_schema::setup_tables(&self.pg_pool, &self.schema, &self.references).await
    }

    pub fn queuer(&self) -> Queuer {
        Queuer::new(self.clone())
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone())
    }

    pub fn dequeuer(&self) -> Dequeuer {
        Dequeuer::new(self.clone())
    }

    /// A worker processing tasks of `queues` with `handler`, every queue when empty
    pub fn worker<H: TaskHandler>(&self, handler: H, queues: &[&str]) -> Worker<H> {
        Worker::new(self.dequeuer(), handler, queues)
    }

    pub fn schedule_worker(&self) -> ScheduleWorker {
        ScheduleWorker::new(self.clone())
    }

    pub fn retention_handler(&self) -> RetentionHandler {
        RetentionHandler::new(self.clone())
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        get_task(&self.pg_pool, &self.escaped_schema, task_id).await
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<Schedule>> {
        get_schedule(&self.pg_pool, &self.escaped_schema, schedule_id).await
    }

    /// Administrative cancellation of a waiting or running task.
    ///
    /// A running worker learns about it on its next heartbeat.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<Task> {
        let mut tx = self.pg_pool.begin().await?;
        let task = cancel_task(&mut tx, &self.escaped_schema, task_id).await?;
        tx.commit().await?;
        Ok(task)
    }

    pub(crate) fn reference(&self, name: &str) -> Result<&Reference> {
        self.references
            .iter()
            .find(|reference| reference.name() == name)
            .ok_or_else(|| TaskQueueError::UnknownReference(name.to_string()))
    }
}
