use std::time::Instant;

use chrono::{DateTime, Utc};
use taskqueue_cron_parser::parse_cron;
use taskqueue_task::{Task, TaskEnqueueRequest};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    errors::{Result, TaskQueueError},
    metrics::{
        SCHEDULING_COUNT, SCHEDULING_ERROR_TOTAL, SCHEDULING_ITERATION_DURATION_MS,
        SCHEDULING_TASK_TOTAL, SCHEDULING_WORKING_COUNT,
    },
    sql::schedules::{advance_schedule, lock_due_schedule, schedule_reference_values},
    store::TaskStore,
    utils::with_cancellation,
};

/// Turns due schedules into tasks.
#[derive(Clone)]
pub struct ScheduleWorker {
    store: TaskStore,
}

/// Next execution of a schedule after `now`, `None` when it never runs again
pub(crate) fn next_execution_time(
    cron_schedule: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    if cron_schedule.trim().is_empty() {
        return Ok(None);
    }

    let timer = parse_cron(cron_schedule).map_err(|source| TaskQueueError::InvalidCron {
        expression: cron_schedule.to_string(),
        source,
    })?;
    Ok(timer.next_after(&now))
}

impl ScheduleWorker {
    pub fn new(store: TaskStore) -> Self {
        ScheduleWorker { store }
    }

    /// Runs an iteration immediately, then every scheduling interval until `ctx` is cancelled
    pub async fn run(&self, ctx: &CancellationToken) {
        let _running = self.store.metrics.gauge_guard(SCHEDULING_COUNT);
        info!("Schedule worker started");

        let mut interval = tokio::time::interval(self.store.config.scheduling_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = interval.tick() => {}
            }

            match with_cancellation(ctx, self.run_once()).await {
                Ok(0) => {}
                Ok(enqueued) => debug!(enqueued, "Schedules processed"),
                Err(e) if e.is_cancelled() => break,
                Err(e) => error!(error = %e, "Schedule worker iteration failed"),
            }
        }

        info!("Schedule worker stopped");
    }

    /// Enqueues a task for every due schedule, returns the number of enqueued tasks.
    ///
    /// A schedule with an invalid cron expression is disabled and skipped.
    pub async fn run_once(&self) -> Result<usize> {
        let metrics = &self.store.metrics;
        let _working = metrics.gauge_guard(SCHEDULING_WORKING_COUNT);
        let start = Instant::now();

        let mut enqueued = 0;
        let result = loop {
            match self.schedule_next().await {
                Ok(_) => enqueued += 1,
                Err(TaskQueueError::ScheduleQueueIsEmpty) => break Ok(enqueued),
                Err(e @ TaskQueueError::InvalidCron { .. }) => {
                    warn!(error = %e, "Schedule disabled");
                    metrics.count(SCHEDULING_ERROR_TOTAL);
                }
                Err(e) => {
                    metrics.count(SCHEDULING_ERROR_TOTAL);
                    break Err(e);
                }
            }
        };

        metrics.record(
            SCHEDULING_ITERATION_DURATION_MS,
            start.elapsed().as_secs_f64() * 1000.0,
        );
        result
    }

    /// Enqueues the task of the most overdue schedule and advances it, in one transaction.
    ///
    /// Fails with [`TaskQueueError::ScheduleQueueIsEmpty`] when no schedule is due.
    async fn schedule_next(&self) -> Result<Task> {
        let store = &self.store;
        let mut tx = store.pg_pool.begin().await?;

        let Some(schedule) = lock_due_schedule(&mut tx, &store.escaped_schema).await? else {
            tx.commit().await?;
            return Err(TaskQueueError::ScheduleQueueIsEmpty);
        };

        let next = match next_execution_time(schedule.cron_schedule(), Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                advance_schedule(&mut tx, &store.escaped_schema, *schedule.id(), None).await?;
                tx.commit().await?;
                return Err(e);
            }
        };

        let mut request = TaskEnqueueRequest::new(schedule.task_queue(), schedule.task_type())
            .with_spec(schedule.task_spec().clone());
        request.schedule_id = Some(*schedule.id());
        request.references = schedule_reference_values(
            &mut tx,
            &store.escaped_schema,
            *schedule.id(),
            &store.references,
        )
        .await?;

        let task = store.queuer().enqueue_in(tx.as_mut(), request).await?;
        advance_schedule(&mut tx, &store.escaped_schema, *schedule.id(), next).await?;
        tx.commit().await?;

        store
            .metrics
            .count_task(SCHEDULING_TASK_TOTAL, task.queue(), task.task_type());
        info!(
            schedule_id = %schedule.id(),
            task_id = %task.id(),
            next_execution_time = ?next,
            "Scheduled task enqueued"
        );

        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn one_shot_schedules_never_run_again() {
        assert_eq!(next_execution_time("", Utc::now()).unwrap(), None);
        assert_eq!(next_execution_time("   ", Utc::now()).unwrap(), None);
    }

    #[test]
    fn weekly_schedule_moves_to_next_sunday() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 10, 3, 0).unwrap();
        let next = next_execution_time("@weekly", now).unwrap().unwrap();
        assert!(next - now <= Duration::days(7));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 19, 0, 0, 0).unwrap());
    }

    #[test]
    fn backlog_collapses_to_the_next_tick() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 10, 3, 30).unwrap();
        let next = next_execution_time("*/5 * * * *", now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 14, 10, 5, 0).unwrap());
    }

    #[test]
    fn invalid_cron_is_reported() {
        assert!(matches!(
            next_execution_time("not a cron", Utc::now()),
            Err(TaskQueueError::InvalidCron { .. })
        ));
    }
}
