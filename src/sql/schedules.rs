use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indoc::formatdoc;
use serde_json::Value;
use sqlx::{query, query_as, query_scalar, PgExecutor, Postgres, Row, Transaction};
use taskqueue_task::{Reference, Schedule};
use uuid::Uuid;

use crate::errors::Result;

use super::{schedule_fields, ReferenceValue};

/// Inserts a schedule due immediately
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn insert_schedule<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    queue: &str,
    task_type: &str,
    spec: &Value,
    cron_schedule: &str,
    references: &[ReferenceValue<'_>],
) -> Result<Schedule> {
    let mut columns = String::new();
    let mut placeholders = String::new();
    for (i, reference) in references.iter().enumerate() {
        columns.push_str(&format!(", {}", reference.column()));
        placeholders.push_str(&format!(", {}", reference.placeholder(i + 6)));
    }

    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.schedules
                (schedule_id, task_queue, task_type, task_spec, cron_schedule, next_execution_time{columns})
                values ($1::uuid, $2::text, $3::text, $4::jsonb, $5::text, now(){placeholders})
                returning {fields}
        "#,
        fields = schedule_fields(None),
    );

    let mut q = query_as(&sql)
        .bind(Uuid::now_v7())
        .bind(queue)
        .bind(task_type)
        .bind(spec)
        .bind(cron_schedule);
    for reference in references {
        q = q.bind(reference.value);
    }

    let schedule = q.fetch_one(executor).await?;
    Ok(schedule)
}

/// Looks for a schedule with the same queue, type, spec and reference values.
///
/// Configured references missing from `values` must be null on the matching row.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn find_schedule<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    queue: &str,
    task_type: &str,
    spec: &Value,
    configured: &[Reference],
    values: &BTreeMap<String, String>,
) -> Result<Option<Uuid>> {
    let mut conditions = String::new();
    let mut binds = Vec::new();
    for reference in configured {
        let reference_value = values.get(reference.name()).map(|value| ReferenceValue {
            reference,
            value: value.as_str(),
        });
        match reference_value {
            Some(reference_value) => {
                binds.push(reference_value.value);
                conditions.push_str(&format!(
                    "\n    and {} = {}",
                    reference_value.column(),
                    reference_value.placeholder(binds.len() + 3)
                ));
            }
            None => conditions.push_str(&format!(
                "\n    and {} is null",
                taskqueue_schema::quote_ident(reference.name())
            )),
        }
    }

    let sql = formatdoc!(
        r#"
            select schedule_id from {escaped_schema}.schedules
            where task_queue = $1::text
                and task_type = $2::text
                and task_spec = $3::jsonb{conditions}
            limit 1
        "#
    );

    let mut q = query_scalar(&sql).bind(queue).bind(task_type).bind(spec);
    for value in binds {
        q = q.bind(value);
    }

    let schedule_id = q.fetch_optional(executor).await?;
    Ok(schedule_id)
}

/// Creates or rewrites the retention schedule identified by its queue, type and the
/// `queueName`, `taskType` and `status` fields of its spec.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn upsert_retention_schedule<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    queue: &str,
    task_type: &str,
    spec: &Value,
    cron_schedule: &str,
) -> Result<Schedule> {
    let sql = formatdoc!(
        r#"
            insert into {escaped_schema}.schedules
                (schedule_id, task_queue, task_type, task_spec, cron_schedule, next_execution_time)
                values ($1::uuid, $2::text, $3::text, $4::jsonb, $5::text, now())
            on conflict (
                task_queue,
                task_type,
                (task_spec->>'queueName'),
                (task_spec->>'taskType'),
                (task_spec->>'status')
            ) where task_type = 'retention'
            do update set
                cron_schedule = excluded.cron_schedule,
                task_spec = excluded.task_spec,
                next_execution_time = now(),
                updated_at = now()
            returning {fields}
        "#,
        fields = schedule_fields(None),
    );

    let schedule = query_as(&sql)
        .bind(Uuid::now_v7())
        .bind(queue)
        .bind(task_type)
        .bind(spec)
        .bind(cron_schedule)
        .fetch_one(executor)
        .await?;
    Ok(schedule)
}

/// Locks the most overdue schedule, skipping schedules locked by other schedule workers
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn lock_due_schedule(
    tx: &mut Transaction<'_, Postgres>,
    escaped_schema: &str,
) -> Result<Option<Schedule>> {
    let sql = formatdoc!(
        r#"
            select {fields} from {escaped_schema}.schedules
            where next_execution_time <= now()
            order by next_execution_time asc
            limit 1
            for update skip locked
        "#,
        fields = schedule_fields(None),
    );

    let schedule = query_as(&sql).fetch_optional(tx.as_mut()).await?;
    Ok(schedule)
}

/// Non-null reference values of a schedule, as text
pub async fn schedule_reference_values(
    tx: &mut Transaction<'_, Postgres>,
    escaped_schema: &str,
    schedule_id: Uuid,
    configured: &[Reference],
) -> Result<BTreeMap<String, String>> {
    if configured.is_empty() {
        return Ok(BTreeMap::new());
    }

    let columns = configured
        .iter()
        .map(|reference| format!("{}::text", taskqueue_schema::quote_ident(reference.name())))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = formatdoc!(
        r#"
            select {columns} from {escaped_schema}.schedules
            where schedule_id = $1::uuid
        "#
    );

    let row = query(&sql).bind(schedule_id).fetch_one(tx.as_mut()).await?;
    let mut values = BTreeMap::new();
    for (i, reference) in configured.iter().enumerate() {
        if let Some(value) = row.try_get::<Option<String>, _>(i)? {
            values.insert(reference.name().clone(), value);
        }
    }

    Ok(values)
}

/// Moves the schedule to its next execution, `None` disables it
pub async fn advance_schedule(
    tx: &mut Transaction<'_, Postgres>,
    escaped_schema: &str,
    schedule_id: Uuid,
    next_execution_time: Option<DateTime<Utc>>,
) -> Result<()> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.schedules
                set next_execution_time = $2::timestamptz, updated_at = now()
                where schedule_id = $1::uuid
        "#
    );

    query(&sql)
        .bind(schedule_id)
        .bind(next_execution_time)
        .execute(tx.as_mut())
        .await?;
    Ok(())
}
