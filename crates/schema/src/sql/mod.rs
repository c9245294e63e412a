use indoc::indoc;
use sqlx::{Postgres, Transaction};

/// Columns owned by the queue itself, reference columns may not reuse these names
pub const TASK_COLUMNS: &[&str] = &[
    "task_id",
    "queue",
    "type",
    "spec",
    "status",
    "progress",
    "created_at",
    "updated_at",
    "started_at",
    "finished_at",
    "last_heartbeat_at",
    "schedule_id",
];

pub const SCHEDULE_COLUMNS: &[&str] = &[
    "schedule_id",
    "task_queue",
    "task_type",
    "task_spec",
    "cron_schedule",
    "next_execution_time",
    "created_at",
    "updated_at",
];

/// Channel notified on every task insert
pub const TASK_UPDATE_CHANNEL: &str = "task_update";

/// Statements installing the tables, indexes and notify trigger.
///
/// All of them are idempotent, `:TASKQUEUE_SCHEMA` is replaced by the escaped schema.
pub const BASE_SCHEMA: &[&str] = &[
    indoc! {r#"
        create schema if not exists :TASKQUEUE_SCHEMA;
    "#},
    indoc! {r#"
        create table if not exists :TASKQUEUE_SCHEMA.schedules (
            schedule_id uuid primary key,
            task_queue text not null check (length(task_queue) > 0),
            task_type text not null check (length(task_type) > 0),
            task_spec jsonb not null default '{}'::jsonb,
            cron_schedule text not null default '',
            next_execution_time timestamptz,
            created_at timestamptz not null default now(),
            updated_at timestamptz not null default now()
        );
    "#},
    indoc! {r#"
        create table if not exists :TASKQUEUE_SCHEMA.tasks (
            task_id uuid primary key,
            queue text not null check (length(queue) > 0),
            type text not null check (length(type) > 0),
            spec jsonb not null default '{}'::jsonb,
            status text not null default 'waiting'
                check (status in ('waiting', 'running', 'cancelled', 'finished', 'failed')),
            progress jsonb not null default '{}'::jsonb,
            created_at timestamptz not null default now(),
            updated_at timestamptz not null default now(),
            started_at timestamptz,
            finished_at timestamptz,
            last_heartbeat_at timestamptz,
            schedule_id uuid references :TASKQUEUE_SCHEMA.schedules (schedule_id) on delete cascade
        );
    "#},
    indoc! {r#"
        create index if not exists tasks_queue_idx on :TASKQUEUE_SCHEMA.tasks using hash (queue);
    "#},
    indoc! {r#"
        create index if not exists tasks_type_idx on :TASKQUEUE_SCHEMA.tasks using hash (type);
    "#},
    indoc! {r#"
        create index if not exists tasks_status_idx on :TASKQUEUE_SCHEMA.tasks using hash (status);
    "#},
    indoc! {r#"
        create index if not exists tasks_schedule_id_idx on :TASKQUEUE_SCHEMA.tasks using hash (schedule_id);
    "#},
    indoc! {r#"
        create index if not exists tasks_created_at_idx on :TASKQUEUE_SCHEMA.tasks (created_at);
    "#},
    indoc! {r#"
        create index if not exists tasks_last_heartbeat_at_idx on :TASKQUEUE_SCHEMA.tasks (last_heartbeat_at);
    "#},
    indoc! {r#"
        create index if not exists tasks_started_at_idx on :TASKQUEUE_SCHEMA.tasks (started_at desc);
    "#},
    indoc! {r#"
        create index if not exists tasks_finished_at_idx on :TASKQUEUE_SCHEMA.tasks (finished_at desc);
    "#},
    indoc! {r#"
        create index if not exists schedules_next_execution_time_idx
            on :TASKQUEUE_SCHEMA.schedules (next_execution_time);
    "#},
    indoc! {r#"
        create unique index if not exists schedules_retention_idx on :TASKQUEUE_SCHEMA.schedules (
            task_queue,
            task_type,
            (task_spec->>'queueName'),
            (task_spec->>'taskType'),
            (task_spec->>'status')
        ) where task_type = 'retention';
    "#},
    indoc! {r#"
        create or replace function :TASKQUEUE_SCHEMA.tasks_notify_insert() returns trigger as $$
        begin
            perform pg_notify('task_update', '');
            return new;
        end;
        $$ language plpgsql;
    "#},
    indoc! {r#"
        drop trigger if exists _500_notify_insert on :TASKQUEUE_SCHEMA.tasks;
    "#},
    indoc! {r#"
        create trigger _500_notify_insert
            after insert on :TASKQUEUE_SCHEMA.tasks
            for each row
            execute procedure :TASKQUEUE_SCHEMA.tasks_notify_insert();
    "#},
];

pub async fn execute_base_schema(
    tx: &mut Transaction<'_, Postgres>,
    escaped_schema: &str,
) -> Result<(), sqlx::Error> {
    for stmt in BASE_SCHEMA {
        let stmt = stmt.replace(":TASKQUEUE_SCHEMA", escaped_schema);
        sqlx::query(&stmt).execute(tx.as_mut()).await?;
    }

    Ok(())
}
