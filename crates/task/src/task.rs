use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::TaskStatus;

/// `Task` represents one unit of work as stored in the `tasks` table.
///
/// Reference columns configured by the caller are not part of this struct; they only
/// exist in the database where they cascade deletes from the caller's own tables.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Task {
    /// Unique identifier assigned on insertion
    #[sqlx(rename = "task_id")]
    #[builder(default = "Uuid::now_v7()")]
    id: Uuid,
    /// Lower-cased queue name, at most one task per queue runs at any instant
    #[builder(default, setter(into))]
    queue: String,
    /// Lower-cased routing key used to pick a handler
    #[sqlx(rename = "type")]
    #[builder(default, setter(into))]
    task_type: String,
    /// Handler defined payload
    #[builder(default = "serde_json::json!({})")]
    spec: Value,
    #[sqlx(try_from = "String")]
    #[builder(default)]
    status: TaskStatus,
    /// Last progress document reported by the handler
    #[builder(default = "serde_json::json!({})")]
    progress: Value,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    finished_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    last_heartbeat_at: Option<DateTime<Utc>>,
    /// Set when the task was produced by a schedule
    #[builder(default, setter(strip_option))]
    schedule_id: Option<Uuid>,
}

impl TaskBuilder {
    pub fn build(self) -> Task {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}

impl Task {
    /// Creates a new builder for constructing a `Task`, mostly useful to test handlers.
    pub fn builder() -> TaskBuilder {
        TaskBuilder::default()
    }

    /// Time elapsed between the creation of the task and `at`.
    pub fn waiting_duration(&self, at: DateTime<Utc>) -> std::time::Duration {
        (at - self.created_at).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_duration_is_never_negative() {
        let now = Utc::now();
        let task = Task::builder()
            .queue("q1")
            .task_type("t")
            .status(TaskStatus::Running)
            .created_at(now)
            .started_at(now)
            .last_heartbeat_at(now)
            .build();

        assert_eq!(
            task.waiting_duration(now + chrono::Duration::seconds(3)),
            std::time::Duration::from_secs(3)
        );
        assert_eq!(
            task.waiting_duration(now - chrono::Duration::seconds(3)),
            std::time::Duration::ZERO
        );
    }

    #[test]
    fn builder_defaults_to_a_waiting_task() {
        let task = Task::builder().queue("q1").task_type("t").build();
        assert_eq!(task.status(), &TaskStatus::Waiting);
        assert_eq!(task.spec(), &serde_json::json!({}));
        assert_eq!(task.started_at(), &None);
    }
}
