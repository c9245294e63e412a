use indoc::formatdoc;
use sqlx::{query, PgExecutor};
use taskqueue_task::TaskStatus;

use crate::errors::Result;

/// Deletes tasks in `status` finished more than `age_minutes` ago, optionally restricted to
/// a queue and a type. Empty filters match everything.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn delete_retained_tasks<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    status: TaskStatus,
    age_minutes: i64,
    queue: &str,
    task_type: &str,
) -> Result<u64> {
    let sql = formatdoc!(
        r#"
            delete from {escaped_schema}.tasks
            where status = $1::text
                and finished_at <= now() - make_interval(mins => $2::int)
                and ($3::text = '' or queue = $3::text)
                and ($4::text = '' or type = $4::text)
        "#
    );

    let result = query(&sql)
        .bind(status.as_str())
        .bind(i32::try_from(age_minutes).unwrap_or(i32::MAX))
        .bind(queue)
        .bind(task_type)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
