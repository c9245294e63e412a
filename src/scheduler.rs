use std::time::Duration;

use rand::Rng;
use taskqueue_cron_parser::parse_cron;
use taskqueue_task::{normalize_document, normalize_name, Schedule, ScheduleRequest, TaskStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::{Result, TaskQueueError},
    metrics::{SCHEDULER_ERROR, SCHEDULER_TASK},
    retention::{RetentionSpec, RETENTION_TASK_TYPE},
    sql::{
        resolve_references,
        schedules::{find_schedule, insert_schedule, upsert_retention_schedule},
    },
    store::TaskStore,
};

/// Creates schedules producing tasks on a cron expression.
#[derive(Clone)]
pub struct Scheduler {
    store: TaskStore,
}

/// Queue, type and spec with names normalized
struct ValidatedRequest {
    queue: String,
    task_type: String,
    spec: serde_json::Value,
}

fn validate(request: &ScheduleRequest) -> Result<ValidatedRequest> {
    let queue = normalize_name(request.queue());
    if queue.is_empty() {
        return Err(TaskQueueError::TaskQueueNotSpecified);
    }
    let task_type = normalize_name(request.task_type());
    if task_type.is_empty() {
        return Err(TaskQueueError::TaskTypeNotSpecified);
    }

    let spec = normalize_document(request.spec()).ok_or(TaskQueueError::InvalidSpec)?;

    Ok(ValidatedRequest {
        queue,
        task_type,
        spec,
    })
}

/// Checks a cron expression, an empty expression means a one-shot schedule
pub(crate) fn validate_cron(expression: &str) -> Result<()> {
    if expression.trim().is_empty() {
        return Ok(());
    }
    parse_cron(expression).map_err(|source| TaskQueueError::InvalidCron {
        expression: expression.to_string(),
        source,
    })?;
    Ok(())
}

impl Scheduler {
    pub fn new(store: TaskStore) -> Self {
        Scheduler { store }
    }

    /// Inserts a schedule which enqueues its first task on the next schedule worker iteration.
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<Schedule> {
        let result = self.insert(&request).await;

        let metrics = &self.store.metrics;
        let queue = normalize_name(request.queue());
        let task_type = normalize_name(request.task_type());
        match &result {
            Ok(schedule) => {
                metrics.count_task(SCHEDULER_TASK, &queue, &task_type);
                info!(schedule_id = %schedule.id(), queue, task_type, "Schedule created");
            }
            Err(e) => {
                metrics.count_task(SCHEDULER_ERROR, &queue, &task_type);
                warn!(queue, task_type, error = %e, "Could not create schedule");
            }
        }

        result
    }

    async fn insert(&self, request: &ScheduleRequest) -> Result<Schedule> {
        let validated = validate(request)?;
        validate_cron(request.cron_schedule())?;
        let references = resolve_references(&self.store.references, request.references())?;

        insert_schedule(
            &self.store.pg_pool,
            &self.store.escaped_schema,
            &validated.queue,
            &validated.task_type,
            &validated.spec,
            request.cron_schedule().trim(),
            &references,
        )
        .await
    }

    /// Succeeds when a schedule with the same queue, type, spec and references exists,
    /// fails with [`TaskQueueError::NotScheduled`] otherwise. Never creates anything.
    pub async fn ensure_schedule(&self, request: ScheduleRequest) -> Result<Uuid> {
        let validated = validate(&request)?;
        for name in request.references().keys() {
            self.store.reference(name)?;
        }

        find_schedule(
            &self.store.pg_pool,
            &self.store.escaped_schema,
            &validated.queue,
            &validated.task_type,
            &validated.spec,
            &self.store.references,
            request.references(),
        )
        .await?
        .ok_or(TaskQueueError::NotScheduled)
    }

    /// Creates or rewrites the hourly retention schedule deleting tasks in `status` older
    /// than `age`, restricted to `queue` and `task_type` when they aren't empty.
    ///
    /// The minute is random to spread deletes across the hour.
    pub async fn assert_retention_schedule(
        &self,
        queue: &str,
        task_type: &str,
        status: TaskStatus,
        age: Duration,
    ) -> Result<Schedule> {
        let spec = RetentionSpec::new(queue, task_type, status, age)?;
        let cron = format!("{} * * * *", rand::rng().random_range(0..60));

        let schedule = upsert_retention_schedule(
            &self.store.pg_pool,
            &self.store.escaped_schema,
            &self.store.retention_queue,
            RETENTION_TASK_TYPE,
            &spec.to_document(&self.store.escaped_schema)?,
            &cron,
        )
        .await?;

        info!(
            schedule_id = %schedule.id(),
            queue = spec.queue_name,
            task_type = spec.task_type,
            status = %status,
            cron,
            "Retention schedule asserted"
        );
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_rejected() {
        let request = ScheduleRequest::new("  ", "t", "@daily");
        assert!(matches!(
            validate(&request),
            Err(TaskQueueError::TaskQueueNotSpecified)
        ));

        let request = ScheduleRequest::new("q1", "", "@daily");
        assert!(matches!(
            validate(&request),
            Err(TaskQueueError::TaskTypeNotSpecified)
        ));
    }

    #[test]
    fn names_are_normalized() {
        let validated = validate(&ScheduleRequest::new(" Q1", "Render ", "")).unwrap();
        assert_eq!(validated.queue, "q1");
        assert_eq!(validated.task_type, "render");
        assert_eq!(validated.spec, serde_json::json!({}));
    }

    #[test]
    fn cron_expressions_are_checked() {
        assert!(validate_cron("").is_ok());
        assert!(validate_cron("*/5 * * * *").is_ok());
        assert!(validate_cron("@weekly").is_ok());
        assert!(matches!(
            validate_cron("61 * * * *"),
            Err(TaskQueueError::InvalidCron { expression, .. }) if expression == "61 * * * *"
        ));
    }
}
