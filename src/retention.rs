use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use taskqueue_task::{normalize_name, Task, TaskStatus};
use taskqueue_task_handler::{ProgressSink, TaskHandler};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    errors::{Result, TaskQueueError},
    sql::retention::delete_retained_tasks,
    store::TaskStore,
    utils::{quote_literal, with_cancellation},
};

/// Task type of the retention schedules and of [`RetentionHandler`]
pub const RETENTION_TASK_TYPE: &str = "retention";

/// Spec of a retention task.
///
/// `queueName`, `taskType` and `status` identify the schedule, `sql` is the statement the
/// handler runs, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSpec {
    /// Empty for every queue
    #[serde(default)]
    pub queue_name: String,
    /// Empty for every type
    #[serde(default)]
    pub task_type: String,
    pub status: TaskStatus,
    /// Minutes since `finished_at`
    pub age: i64,
}

impl RetentionSpec {
    pub fn new(queue: &str, task_type: &str, status: TaskStatus, age: Duration) -> Result<Self> {
        let spec = RetentionSpec {
            queue_name: normalize_name(queue),
            task_type: normalize_name(task_type),
            status,
            age: i64::try_from(age.as_secs() / 60).unwrap_or(i64::MAX),
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        match self.status {
            TaskStatus::Finished | TaskStatus::Failed => Ok(()),
            status => Err(TaskQueueError::InvalidRetentionStatus(status)),
        }
    }

    /// The `DELETE` statement equivalent to what the handler runs
    pub fn sql(&self, escaped_schema: &str) -> String {
        let mut sql = format!(
            "DELETE FROM {escaped_schema}.tasks WHERE status = {} AND finished_at <= now() - interval '{} minutes'",
            quote_literal(self.status.as_str()),
            self.age,
        );
        if !self.queue_name.is_empty() {
            sql.push_str(&format!(" AND queue = {}", quote_literal(&self.queue_name)));
        }
        if !self.task_type.is_empty() {
            sql.push_str(&format!(" AND type = {}", quote_literal(&self.task_type)));
        }
        sql
    }

    /// Spec document stored on the schedule
    pub fn to_document(&self, escaped_schema: &str) -> Result<Value> {
        let mut document = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut document {
            fields.insert("sql".into(), Value::String(self.sql(escaped_schema)));
        }
        Ok(document)
    }
}

/// Handler of `retention` tasks, deletes old finished or failed tasks.
///
/// Reports `{"rowsAffected": n, "duration": "..."}` once done.
#[derive(Clone)]
pub struct RetentionHandler {
    store: TaskStore,
}

impl RetentionHandler {
    pub fn new(store: TaskStore) -> Self {
        RetentionHandler { store }
    }

    /// Runs the retention described by `spec`, returns the number of deleted tasks
    pub async fn run(&self, ctx: &CancellationToken, spec: &RetentionSpec) -> Result<u64> {
        spec.validate()?;
        with_cancellation(
            ctx,
            delete_retained_tasks(
                &self.store.pg_pool,
                &self.store.escaped_schema,
                spec.status,
                spec.age,
                &spec.queue_name,
                &spec.task_type,
            ),
        )
        .await
    }
}

impl TaskHandler for RetentionHandler {
    fn process(
        &self,
        ctx: CancellationToken,
        task: Task,
        progress: ProgressSink,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        async move {
            let spec: RetentionSpec = serde_json::from_value(task.spec().clone())?;

            let start = Instant::now();
            let rows_affected = self.run(&ctx, &spec).await?;
            let duration = start.elapsed();

            info!(
                task_id = %task.id(),
                queue = %spec.queue_name,
                task_type = %spec.task_type,
                rows_affected,
                ?duration,
                "Retention done"
            );
            progress
                .send_json(&json!({
                    "rowsAffected": rows_affected,
                    "duration": format!("{duration:?}"),
                }))
                .await?;
            progress.close();

            Ok(())
        }
    }

    fn identifier(&self) -> &str {
        RETENTION_TASK_TYPE
    }
}
