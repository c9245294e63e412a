use std::time::Duration;

use indoc::formatdoc;
use rand::seq::IndexedRandom;
use sqlx::{query_as, query_scalar, PgConnection, Postgres, Transaction};
use taskqueue_task::Task;
use tracing::trace;

use crate::{errors::Result, options::DequeueOrder};

use super::task_fields;

/// Queues owning an unfinished task with a fresh heartbeat. A task cancelled while its
/// handler still runs keeps owning its queue until the heartbeat goes stale.
async fn inflight_queues(
    conn: &mut PgConnection,
    escaped_schema: &str,
    double_ttl: f64,
) -> Result<Vec<String>> {
    let sql = formatdoc!(
        r#"
            select distinct queue from {escaped_schema}.tasks
            where finished_at is null
                and last_heartbeat_at > now() - make_interval(secs => $1::float8)
        "#
    );

    let queues = query_scalar(&sql)
        .bind(double_ttl)
        .fetch_all(&mut *conn)
        .await?;
    Ok(queues)
}

/// Queues with unfinished work, used when the caller names no queue
async fn pending_queues(conn: &mut PgConnection, escaped_schema: &str) -> Result<Vec<String>> {
    let sql = formatdoc!(
        r#"
            select distinct queue from {escaped_schema}.tasks
            where finished_at is null
                and status in ('waiting', 'running')
        "#
    );

    let queues = query_scalar(&sql).fetch_all(&mut *conn).await?;
    Ok(queues)
}

/// Serializes dequeuers racing for the same queue until the transaction ends
async fn try_lock_queue(conn: &mut PgConnection, escaped_schema: &str, queue: &str) -> Result<bool> {
    let locked = query_scalar("select pg_try_advisory_xact_lock(hashtext($1::text))")
        .bind(format!("{escaped_schema}:{queue}"))
        .fetch_one(&mut *conn)
        .await?;
    Ok(locked)
}

/// Leases the next task of `queue`: waiting tasks first, then running tasks whose
/// heartbeat is older than `double_ttl` seconds.
async fn lease_task(
    conn: &mut PgConnection,
    escaped_schema: &str,
    queue: &str,
    double_ttl: f64,
    order: DequeueOrder,
) -> Result<Option<Task>> {
    let sql = formatdoc!(
        r#"
            with next_task as (
                select task_id from {escaped_schema}.tasks t
                where t.queue = $1::text
                    and (
                        t.status = 'waiting'
                        or (
                            t.status = 'running'
                            and (
                                t.last_heartbeat_at is null
                                or t.last_heartbeat_at <= now() - make_interval(secs => $2::float8)
                            )
                        )
                    )
                    and not exists (
                        select 1 from {escaped_schema}.tasks live
                        where live.queue = t.queue
                            and live.finished_at is null
                            and live.last_heartbeat_at > now() - make_interval(secs => $2::float8)
                    )
                order by (t.status = 'waiting') desc, t.created_at {order}
                limit 1
                for update skip locked
            )
            update {escaped_schema}.tasks leased
                set
                    status = 'running',
                    started_at = now(),
                    last_heartbeat_at = now(),
                    updated_at = now()
                from next_task
                where leased.task_id = next_task.task_id
                returning {fields}
        "#,
        order = order.as_sql(),
        fields = task_fields(Some("leased")),
    );

    let task = query_as(&sql)
        .bind(queue)
        .bind(double_ttl)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(task)
}

/// One leasing attempt inside `tx`.
///
/// Queues already owning a live running task are skipped, the remaining ones are tried in
/// random order until a task is leased.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn lease_next_task(
    tx: &mut Transaction<'_, Postgres>,
    escaped_schema: &str,
    queues: &[String],
    heartbeat_ttl: Duration,
    order: DequeueOrder,
) -> Result<Option<Task>> {
    let double_ttl = heartbeat_ttl.as_secs_f64() * 2.0;

    let inflight = inflight_queues(tx.as_mut(), escaped_schema, double_ttl).await?;
    let candidates = if queues.is_empty() {
        pending_queues(tx.as_mut(), escaped_schema).await?
    } else {
        queues.to_vec()
    };

    let mut processable: Vec<String> = candidates
        .into_iter()
        .filter(|queue| !inflight.contains(queue))
        .collect();

    loop {
        let Some(queue) = pick_queue(&processable) else {
            trace!("No processable queue");
            return Ok(None);
        };
        processable.retain(|q| q != &queue);

        if !try_lock_queue(tx.as_mut(), escaped_schema, &queue).await? {
            trace!(queue, "Queue locked by another dequeuer");
            continue;
        }

        if let Some(task) =
            lease_task(tx.as_mut(), escaped_schema, &queue, double_ttl, order).await?
        {
            return Ok(Some(task));
        }
    }
}

fn pick_queue(processable: &[String]) -> Option<String> {
    processable.choose(&mut rand::rng()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_queue_from_empty_set() {
        assert_eq!(pick_queue(&[]), None);
    }

    #[test]
    fn pick_queue_reaches_every_queue() {
        let queues = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(pick_queue(&queues).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }
}
