use chrono::{DateTime, Utc};
use getset::Getters;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A cron expression producing tasks, as stored in the `schedules` table.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct Schedule {
    #[sqlx(rename = "schedule_id")]
    id: Uuid,
    task_queue: String,
    task_type: String,
    task_spec: Value,
    /// Empty for a one-shot schedule
    cron_schedule: String,
    /// `None` once the schedule will never run again
    next_execution_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn is_one_shot(&self) -> bool {
        self.cron_schedule.trim().is_empty()
    }
}
