use std::collections::BTreeMap;

use derive_builder::Builder;
use getset::Getters;
use serde_json::Value;
use uuid::Uuid;

/// Normalizes a queue or type name: surrounding whitespace is ignored and names are
/// compared case-insensitively.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Turns an absent or null document into the empty object. Documents are always JSON
/// objects, anything else gives `None`.
pub fn normalize_document(value: &Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::Object(Default::default())),
        v @ Value::Object(_) => Some(v.clone()),
        _ => None,
    }
}

/// A request to insert a new waiting task.
#[derive(Getters, Debug, Default, Clone, PartialEq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), default, pattern = "owned")]
pub struct TaskEnqueueRequest {
    #[builder(setter(into))]
    pub queue: String,

    #[builder(setter(into))]
    pub task_type: String,

    /// Defaults to `{}` when null
    pub spec: Value,

    /// Reference column values, cast from text to the configured column type
    #[builder(setter(custom))]
    pub references: BTreeMap<String, String>,

    #[builder(setter(strip_option))]
    pub schedule_id: Option<Uuid>,
}

impl TaskEnqueueRequest {
    pub fn new(queue: impl Into<String>, task_type: impl Into<String>) -> Self {
        TaskEnqueueRequest {
            queue: queue.into(),
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn builder() -> TaskEnqueueRequestBuilder {
        TaskEnqueueRequestBuilder::default()
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.references.insert(name.into(), value.into());
        self
    }
}

impl TaskEnqueueRequestBuilder {
    pub fn reference(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.references
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> TaskEnqueueRequest {
        self.build_internal()
            .expect("There is a default value for all fields")
    }
}

/// A request to create a schedule.
#[derive(Getters, Debug, Default, Clone, PartialEq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), default, pattern = "owned")]
pub struct ScheduleRequest {
    #[builder(setter(into))]
    pub queue: String,

    #[builder(setter(into))]
    pub task_type: String,

    pub spec: Value,

    /// Empty for a one-shot schedule, otherwise a 5-field cron expression or an `@` macro
    #[builder(setter(into))]
    pub cron_schedule: String,

    #[builder(setter(custom))]
    pub references: BTreeMap<String, String>,
}

impl ScheduleRequest {
    pub fn new(
        queue: impl Into<String>,
        task_type: impl Into<String>,
        cron_schedule: impl Into<String>,
    ) -> Self {
        ScheduleRequest {
            queue: queue.into(),
            task_type: task_type.into(),
            cron_schedule: cron_schedule.into(),
            ..Default::default()
        }
    }

    pub fn builder() -> ScheduleRequestBuilder {
        ScheduleRequestBuilder::default()
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_reference(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.references.insert(name.into(), value.into());
        self
    }
}

impl ScheduleRequestBuilder {
    pub fn reference(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.references
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> ScheduleRequest {
        self.build_internal()
            .expect("There is a default value for all fields")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_task_enqueue_request_builder() {
        let schedule_id = Uuid::now_v7();
        let request = TaskEnqueueRequest::builder()
            .queue("Reports")
            .task_type("render")
            .spec(json!({ "page": 3 }))
            .reference("organization_id", "42")
            .schedule_id(schedule_id)
            .build();

        assert_eq!(request.queue(), "Reports");
        assert_eq!(request.task_type(), "render");
        assert_eq!(request.spec(), &json!({ "page": 3 }));
        assert_eq!(
            request.references().get("organization_id"),
            Some(&"42".to_string())
        );
        assert_eq!(request.schedule_id(), &Some(schedule_id));
    }

    #[test]
    fn should_build_unset_requests_without_panic() {
        let _ = TaskEnqueueRequest::builder().build();
        let _ = ScheduleRequest::builder().build();
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(normalize_name("  Standard "), "standard");
        assert_eq!(normalize_name("q1"), "q1");
    }

    #[test]
    fn null_documents_become_empty_objects() {
        assert_eq!(normalize_document(&Value::Null), Some(json!({})));
        assert_eq!(normalize_document(&json!({ "x": 1 })), Some(json!({ "x": 1 })));
    }

    #[test]
    fn documents_must_be_objects() {
        assert_eq!(normalize_document(&json!([1, 2])), None);
        assert_eq!(normalize_document(&json!("str")), None);
        assert_eq!(normalize_document(&json!(3)), None);
    }
}
