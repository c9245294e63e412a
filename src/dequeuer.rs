use std::sync::Arc;

use chrono::Utc;
use taskqueue_task::{normalize_name, Task};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    errors::{Result, TaskQueueError},
    listener::{TaskListener, Wakeup},
    metrics::QUEUE_WAITING_DURATION_S,
    sql::{
        dequeue::lease_next_task,
        update_task::{update_running_task, TaskUpdate},
    },
    store::TaskStore,
    utils::{parse_progress, with_cancellation},
};

/// Consumer side of the queue: leases tasks and records their progress.
///
/// Owns one notification listener connection, shared by its clones.
#[derive(Clone)]
pub struct Dequeuer {
    store: TaskStore,
    listener: Arc<Mutex<TaskListener>>,
}

/// Lower-cases and dedups the requested queues, blank names are ignored
fn normalize_queues(queues: &[&str]) -> Vec<String> {
    let mut normalized: Vec<String> = queues
        .iter()
        .map(|queue| normalize_name(queue))
        .filter(|queue| !queue.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

impl Dequeuer {
    pub fn new(store: TaskStore) -> Self {
        let listener = TaskListener::new(store.pg_pool.clone(), store.config.clone());
        Dequeuer {
            store,
            listener: Arc::new(Mutex::new(listener)),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Opens the notification connection ahead of the first wait
    pub async fn start(&self, ctx: &CancellationToken) -> Result<()> {
        let mut listener = with_cancellation(ctx, async { Ok(self.listener.lock().await) }).await?;
        listener.start(ctx).await
    }

    pub async fn stop(&self) {
        self.listener.lock().await.stop().await;
    }

    /// Waits until a task of `queues` can be leased and leases it. An empty `queues` means
    /// every queue with unfinished work.
    ///
    /// Returns [`TaskQueueError::Cancelled`] once `ctx` is cancelled.
    pub async fn dequeue(&self, ctx: &CancellationToken, queues: &[&str]) -> Result<Task> {
        let queues = normalize_queues(queues);

        if let Some(task) = self.lease(ctx, &queues).await? {
            return Ok(task);
        }

        let mut listener = with_cancellation(ctx, async { Ok(self.listener.lock().await) }).await?;
        listener.listen(ctx).await?;

        let result = async {
            loop {
                if let Some(task) = self.lease(ctx, &queues).await? {
                    return Ok::<_, TaskQueueError>(task);
                }

                match listener.wait(ctx, self.store.config.poll_frequency).await? {
                    Wakeup::Notification => debug!("Woken up by a new task"),
                    Wakeup::ConnectionLost => debug!("Woken up by a lost connection"),
                    Wakeup::Timeout => {}
                }
            }
        }
        .await;

        if let Err(e) = listener.unlisten().await {
            warn!(error = %e, "Could not unlisten task updates");
        }

        result
    }

    /// Leases a task of `queues` if one is available right now
    pub async fn try_dequeue(&self, ctx: &CancellationToken, queues: &[&str]) -> Result<Option<Task>> {
        self.lease(ctx, &normalize_queues(queues)).await
    }

    async fn lease(&self, ctx: &CancellationToken, queues: &[String]) -> Result<Option<Task>> {
        let store = &self.store;
        let task = with_cancellation(ctx, async {
            let mut tx = store.pg_pool.begin().await?;
            let task = lease_next_task(
                &mut tx,
                &store.escaped_schema,
                queues,
                store.config.heartbeat_ttl,
                store.config.dequeue_order,
            )
            .await?;
            tx.commit().await?;
            Ok::<_, TaskQueueError>(task)
        })
        .await?;

        if let Some(task) = &task {
            store.metrics.record_task(
                QUEUE_WAITING_DURATION_S,
                task.queue(),
                task.task_type(),
                task.waiting_duration(Utc::now()).as_secs_f64(),
            );
            debug!(task_id = %task.id(), queue = %task.queue(), task_type = %task.task_type(), "Task leased");
        }

        Ok(task)
    }

    /// Stores the progress of a running task and extends its lease
    pub async fn heartbeat(&self, ctx: &CancellationToken, task_id: Uuid, progress: &[u8]) -> Result<()> {
        self.update(ctx, task_id, progress, TaskUpdate::Heartbeat).await
    }

    /// Marks a running task as finished with its final progress
    pub async fn finish(&self, ctx: &CancellationToken, task_id: Uuid, progress: &[u8]) -> Result<()> {
        self.update(ctx, task_id, progress, TaskUpdate::Finish).await
    }

    /// Marks a running task as failed with its final progress
    pub async fn fail(&self, ctx: &CancellationToken, task_id: Uuid, progress: &[u8]) -> Result<()> {
        self.update(ctx, task_id, progress, TaskUpdate::Fail).await
    }

    async fn update(
        &self,
        ctx: &CancellationToken,
        task_id: Uuid,
        progress: &[u8],
        update: TaskUpdate,
    ) -> Result<()> {
        let progress = parse_progress(progress)?;
        let store = &self.store;

        with_cancellation(ctx, async {
            let mut tx = store.pg_pool.begin().await?;
            update_running_task(&mut tx, &store.escaped_schema, task_id, &progress, update).await?;
            tx.commit().await?;
            Ok::<_, TaskQueueError>(())
        })
        .await
    }
}
