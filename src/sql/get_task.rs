use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};
use taskqueue_task::{Schedule, Task};
use uuid::Uuid;

use crate::errors::Result;

use super::{schedule_fields, task_fields};

pub async fn get_task<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    task_id: Uuid,
) -> Result<Option<Task>> {
    let sql = formatdoc!(
        r#"
            select {fields} from {escaped_schema}.tasks
            where task_id = $1::uuid
        "#,
        fields = task_fields(None),
    );

    let task = query_as(&sql).bind(task_id).fetch_optional(executor).await?;
    Ok(task)
}

pub async fn get_schedule<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    schedule_id: Uuid,
) -> Result<Option<Schedule>> {
    let sql = formatdoc!(
        r#"
            select {fields} from {escaped_schema}.schedules
            where schedule_id = $1::uuid
        "#,
        fields = schedule_fields(None),
    );

    let schedule = query_as(&sql)
        .bind(schedule_id)
        .fetch_optional(executor)
        .await?;
    Ok(schedule)
}
