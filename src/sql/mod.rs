use std::collections::BTreeMap;

use taskqueue_schema::quote_ident;
use taskqueue_task::Reference;

use crate::errors::{Result, TaskQueueError};

pub mod add_task;
pub mod dequeue;
pub mod get_task;
pub mod retention;
pub mod schedules;
pub mod update_task;

const TASK_COLUMNS: &[&str] = &[
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

const SCHEDULE_COLUMNS: &[&str] = &[
    "schedule_id",
    "task_queue",
    "task_type",
    "task_spec",
    "cron_schedule",
    "next_execution_time",
    "created_at",
    "updated_at",
];

/// Select list of a `Task`, optionally prefixed by a table alias
pub(crate) fn task_fields(alias: Option<&str>) -> String {
    fields(TASK_COLUMNS, alias)
}

pub(crate) fn schedule_fields(alias: Option<&str>) -> String {
    fields(SCHEDULE_COLUMNS, alias)
}

fn fields(columns: &[&str], alias: Option<&str>) -> String {
    columns
        .iter()
        .map(|column| match alias {
            Some(alias) => format!("{alias}.{column}"),
            None => column.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A reference column value bound as text and cast to the column type
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReferenceValue<'a> {
    pub(crate) reference: &'a Reference,
    pub(crate) value: &'a str,
}

impl ReferenceValue<'_> {
    pub(crate) fn column(&self) -> String {
        quote_ident(self.reference.name())
    }

    /// Placeholder for bind parameter `param_ord`
    pub(crate) fn placeholder(&self, param_ord: usize) -> String {
        format!("${param_ord}::text::{}", self.reference.sql_type())
    }
}

/// Pairs requested reference values with the configured references
pub(crate) fn resolve_references<'a>(
    configured: &'a [Reference],
    values: &'a BTreeMap<String, String>,
) -> Result<Vec<ReferenceValue<'a>>> {
    values
        .iter()
        .map(|(name, value)| {
            configured
                .iter()
                .find(|reference| reference.name() == name)
                .map(|reference| ReferenceValue { reference, value })
                .ok_or_else(|| TaskQueueError::UnknownReference(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_can_be_aliased() {
        assert!(task_fields(None).starts_with("task_id, queue, type"));
        assert!(task_fields(Some("t")).starts_with("t.task_id, t.queue, t.type"));
        assert!(schedule_fields(None).ends_with("created_at, updated_at"));
    }

    #[test]
    fn references_must_be_configured() {
        let configured = vec![Reference::new("organization_id", "organizations", "id", "uuid")];
        let mut values = BTreeMap::new();
        values.insert("organization_id".to_string(), "0191d3a6-0000-7000-8000-000000000000".to_string());

        let resolved = resolve_references(&configured, &values).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].column(), r#""organization_id""#);
        assert_eq!(resolved[0].placeholder(7), "$7::text::uuid");

        values.insert("team_id".to_string(), "1".to_string());
        assert!(matches!(
            resolve_references(&configured, &values),
            Err(TaskQueueError::UnknownReference(name)) if name == "team_id"
        ));
    }
}
