use indoc::formatdoc;
use serde_json::Value;
use sqlx::{query, query_as, query_scalar, PgConnection, Postgres, Transaction};
use taskqueue_task::{Task, TaskStatus};
use uuid::Uuid;

use crate::errors::{Result, TaskQueueError};

use super::task_fields;

/// What a running task reports to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskUpdate {
    /// Stores progress, the task keeps running
    Heartbeat,
    Finish,
    Fail,
}

impl TaskUpdate {
    fn target_status(&self) -> TaskStatus {
        match self {
            TaskUpdate::Heartbeat => TaskStatus::Running,
            TaskUpdate::Finish => TaskStatus::Finished,
            TaskUpdate::Fail => TaskStatus::Failed,
        }
    }
}

/// Error returned when a task in `status` can't take an update
fn status_error(status: TaskStatus) -> TaskQueueError {
    match status {
        TaskStatus::Waiting => TaskQueueError::TaskNotRunning,
        TaskStatus::Cancelled => TaskQueueError::TaskCancelled,
        TaskStatus::Finished => TaskQueueError::TaskFinished,
        TaskStatus::Failed => TaskQueueError::TaskFailed,
        // only reachable for transitions a running task can't take
        TaskStatus::Running => TaskQueueError::TaskNotRunning,
    }
}

/// Locks the task row and returns its status
async fn lock_task_status(
    conn: &mut PgConnection,
    escaped_schema: &str,
    task_id: Uuid,
) -> Result<TaskStatus> {
    let sql = formatdoc!(
        r#"
            select status from {escaped_schema}.tasks
            where task_id = $1::uuid
            for update
        "#
    );

    let status: Option<String> = query_scalar(&sql)
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await?;

    let status = status.ok_or(TaskQueueError::TaskNotFound)?;
    Ok(status.parse()?)
}

/// Records progress of a running task, finalizing it for `Finish` and `Fail`.
///
/// Refused unless the task is running.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", task_id = %task_id, update = ?update))]
pub async fn update_running_task(
    tx: &mut Transaction<'_, Postgres>,
    escaped_schema: &str,
    task_id: Uuid,
    progress: &Value,
    update: TaskUpdate,
) -> Result<()> {
    let status = lock_task_status(tx.as_mut(), escaped_schema, task_id).await?;
    if status != TaskStatus::Running {
        return Err(status_error(status));
    }

    let sql = match update {
        TaskUpdate::Heartbeat => formatdoc!(
            r#"
                update {escaped_schema}.tasks
                    set progress = $2::jsonb, last_heartbeat_at = now(), updated_at = now()
                    where task_id = $1::uuid
            "#
        ),
        TaskUpdate::Finish | TaskUpdate::Fail => formatdoc!(
            r#"
                update {escaped_schema}.tasks
                    set
                        status = $3::text,
                        progress = $2::jsonb,
                        finished_at = now(),
                        last_heartbeat_at = now(),
                        updated_at = now()
                    where task_id = $1::uuid
            "#
        ),
    };

    let mut q = query(&sql).bind(task_id).bind(progress);
    if update != TaskUpdate::Heartbeat {
        q = q.bind(update.target_status().as_str());
    }
    q.execute(tx.as_mut()).await?;

    Ok(())
}

/// Moves a waiting or running task to `cancelled`
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", task_id = %task_id))]
pub async fn cancel_task(
    tx: &mut Transaction<'_, Postgres>,
    escaped_schema: &str,
    task_id: Uuid,
) -> Result<Task> {
    let status = lock_task_status(tx.as_mut(), escaped_schema, task_id).await?;
    if !status.can_transition_to(TaskStatus::Cancelled) {
        return Err(status_error(status));
    }

    let sql = formatdoc!(
        r#"
            update {escaped_schema}.tasks
                set status = 'cancelled', updated_at = now()
                where task_id = $1::uuid
                returning {fields}
        "#,
        fields = task_fields(None),
    );

    let task = query_as(&sql).bind(task_id).fetch_one(tx.as_mut()).await?;
    Ok(task)
}
