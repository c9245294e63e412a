use std::time::Instant;

use sqlx::PgExecutor;
use taskqueue_task::{normalize_document, normalize_name, Task, TaskEnqueueRequest};
use tracing::info;

use crate::{
    errors::{Result, TaskQueueError},
    metrics::{QUEUE_ENQUEUE_DURATION_MS, QUEUE_TASK},
    sql::{add_task::add_task, resolve_references},
    store::TaskStore,
};

/// Producer side of the queue.
#[derive(Clone)]
pub struct Queuer {
    store: TaskStore,
}

impl Queuer {
    pub fn new(store: TaskStore) -> Self {
        Queuer { store }
    }

    /// Inserts `request` as a waiting task.
    ///
    /// Fails with [`TaskQueueError::TaskQueueNotSpecified`] or
    /// [`TaskQueueError::TaskTypeNotSpecified`] when a name is blank.
    ///
    /// ```no_run
    /// use serde_json::json;
    /// use taskqueue::{TaskEnqueueRequest, TaskStore};
    ///
    /// async fn example(store: TaskStore) -> taskqueue::Result<()> {
    ///     let task = store
    ///         .queuer()
    ///         .enqueue(TaskEnqueueRequest::new("reports", "render").with_spec(json!({ "page": 1 })))
    ///         .await?;
    ///     println!("enqueued {}", task.id());
    ///     Ok(())
    /// }
    /// ```
    pub async fn enqueue(&self, request: TaskEnqueueRequest) -> Result<Task> {
        self.enqueue_in(&self.store.pg_pool, request).await
    }

    /// Same as [`Queuer::enqueue`] on a caller provided executor, usually a transaction
    pub async fn enqueue_in<'e>(
        &self,
        executor: impl PgExecutor<'e>,
        request: TaskEnqueueRequest,
    ) -> Result<Task> {
        let queue = normalize_name(request.queue());
        if queue.is_empty() {
            return Err(TaskQueueError::TaskQueueNotSpecified);
        }
        let task_type = normalize_name(request.task_type());
        if task_type.is_empty() {
            return Err(TaskQueueError::TaskTypeNotSpecified);
        }

        let spec = normalize_document(request.spec()).ok_or(TaskQueueError::InvalidSpec)?;
        let references = resolve_references(&self.store.references, request.references())?;

        let start = Instant::now();
        let task = add_task(
            executor,
            &self.store.escaped_schema,
            &queue,
            &task_type,
            &spec,
            *request.schedule_id(),
            &references,
        )
        .await?;

        let metrics = &self.store.metrics;
        metrics.record_queue(
            QUEUE_ENQUEUE_DURATION_MS,
            &queue,
            start.elapsed().as_secs_f64() * 1000.0,
        );
        metrics.count_task(QUEUE_TASK, &queue, &task_type);
        info!(task_id = %task.id(), queue, task_type, "Task enqueued");

        Ok(task)
    }
}
