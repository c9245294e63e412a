use indoc::formatdoc;
use serde_json::Value;
use sqlx::{query_as, PgExecutor};
use taskqueue_task::Task;
use tracing::debug;
use uuid::Uuid;

use crate::errors::Result;

use super::{task_fields, ReferenceValue};

/// Inserts a waiting task, reference columns are set in the same statement
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn add_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    queue: &str,
    task_type: &str,
    spec: &Value,
    schedule_id: Option<Uuid>,
    references: &[ReferenceValue<'_>],
) -> Result<Task> {
    let mut columns = String::new();
    let mut placeholders = String::new();
    for (i, reference) in references.iter().enumerate() {
        columns.push_str(&format!(", {}", reference.column()));
        placeholders.push_str(&format!(", {}", reference.placeholder(i + 6)));
    }

    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.tasks (task_id, queue, type, spec, status, progress, schedule_id{columns})
                values ($1::uuid, $2::text, $3::text, $4::jsonb, 'waiting', '{{}}'::jsonb, $5::uuid{placeholders})
                returning {fields}
        "#,
        fields = task_fields(None),
    );

    let task_id = Uuid::now_v7();
    let mut q = query_as(&sql)
        .bind(task_id)
        .bind(queue)
        .bind(task_type)
        .bind(spec)
        .bind(schedule_id);
    for reference in references {
        q = q.bind(reference.value);
    }

    let task: Task = q.fetch_one(executor).await?;
    debug!(task_id = %task.id(), queue, task_type, "Task added to queue");

    Ok(task)
}
