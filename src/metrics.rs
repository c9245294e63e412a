use std::sync::Arc;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Gauge, Unit,
};

pub const QUEUE_TASK: &str = "queue.task";
pub const QUEUE_ENQUEUE_DURATION_MS: &str = "queue.enqueue_duration_ms";
pub const QUEUE_WAITING_DURATION_S: &str = "queue.waiting_duration_s";
pub const SCHEDULER_TASK: &str = "scheduler.task";
pub const SCHEDULER_ERROR: &str = "scheduler.error";
pub const WORKER_DURATION_S: &str = "worker.duration_s";
pub const WORKER_WAIT_DURATION_S: &str = "worker.wait_duration_s";
pub const WORKER_COUNT: &str = "worker.count";
pub const WORKER_WAITING: &str = "worker.waiting";
pub const WORKER_WORKING: &str = "worker.working";
pub const WORKER_TASK_TOTAL: &str = "worker.task_total";
pub const WORKER_COMPLETED_TOTAL: &str = "worker.completed_total";
pub const WORKER_ERROR_TOTAL: &str = "worker.error_total";
pub const WORKER_QUEUE_ERROR_TOTAL: &str = "worker.queue_error_total";
pub const SCHEDULING_COUNT: &str = "scheduling.count";
pub const SCHEDULING_WORKING_COUNT: &str = "scheduling.working_count";
pub const SCHEDULING_ITERATION_DURATION_MS: &str = "scheduling.iteration_duration_ms";
pub const SCHEDULING_TASK_TOTAL: &str = "scheduling.task_total";
pub const SCHEDULING_ERROR_TOTAL: &str = "scheduling.error_total";

/// Prefixes metric names with a caller chosen namespace.
///
/// Recording goes through the `metrics` facade, nothing is exported unless the application
/// installs a recorder.
#[derive(Debug, Clone)]
pub struct Metrics {
    namespace: Arc<str>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new("taskqueue")
    }
}

impl Metrics {
    pub fn new(namespace: &str) -> Self {
        Metrics {
            namespace: namespace.into(),
        }
    }

    /// `worker.duration_s` becomes `<namespace>_worker_duration_s`
    pub fn name(&self, metric: &str) -> String {
        let metric = metric.replace('.', "_");
        if self.namespace.is_empty() {
            metric
        } else {
            format!("{}_{metric}", self.namespace)
        }
    }

    /// Registers units and descriptions with the installed recorder
    pub fn describe(&self) {
        describe_counter!(self.name(QUEUE_TASK), "Number of enqueued tasks");
        describe_histogram!(
            self.name(QUEUE_ENQUEUE_DURATION_MS),
            Unit::Milliseconds,
            "Time spent inserting a task"
        );
        describe_histogram!(
            self.name(QUEUE_WAITING_DURATION_S),
            Unit::Seconds,
            "Time between the creation of a task and its dequeue"
        );
        describe_counter!(self.name(SCHEDULER_TASK), "Number of created schedules");
        describe_counter!(self.name(SCHEDULER_ERROR), "Number of failed schedule creations");
        describe_histogram!(
            self.name(WORKER_DURATION_S),
            Unit::Seconds,
            "Time spent running task handlers"
        );
        describe_histogram!(
            self.name(WORKER_WAIT_DURATION_S),
            Unit::Seconds,
            "Time spent waiting for a task"
        );
        describe_gauge!(self.name(WORKER_COUNT), "Number of running workers");
        describe_gauge!(self.name(WORKER_WAITING), "Number of workers waiting for a task");
        describe_gauge!(self.name(WORKER_WORKING), "Number of tasks being processed");
        describe_counter!(self.name(WORKER_TASK_TOTAL), "Number of dequeued tasks");
        describe_counter!(self.name(WORKER_COMPLETED_TOTAL), "Number of finished tasks");
        describe_counter!(self.name(WORKER_ERROR_TOTAL), "Number of failed tasks");
        describe_counter!(
            self.name(WORKER_QUEUE_ERROR_TOTAL),
            "Number of errors talking to the task store"
        );
        describe_gauge!(self.name(SCHEDULING_COUNT), "Number of running schedule workers");
        describe_gauge!(
            self.name(SCHEDULING_WORKING_COUNT),
            "Number of schedule workers inside an iteration"
        );
        describe_histogram!(
            self.name(SCHEDULING_ITERATION_DURATION_MS),
            Unit::Milliseconds,
            "Duration of a schedule worker iteration"
        );
        describe_counter!(
            self.name(SCHEDULING_TASK_TOTAL),
            "Number of tasks enqueued from schedules"
        );
        describe_counter!(
            self.name(SCHEDULING_ERROR_TOTAL),
            "Number of failed schedule worker iterations"
        );
    }

    pub(crate) fn count(&self, metric: &str) {
        counter!(self.name(metric)).increment(1);
    }

    pub(crate) fn count_task(&self, metric: &str, queue: &str, task_type: &str) {
        counter!(
            self.name(metric),
            "queue" => queue.to_string(),
            "type" => task_type.to_string()
        )
        .increment(1);
    }

    /// Increments `metric` until the returned guard is dropped
    pub(crate) fn gauge_guard(&self, metric: &str) -> GaugeGuard {
        let gauge = gauge!(self.name(metric));
        gauge.increment(1.0);
        GaugeGuard { gauge }
    }

    pub(crate) fn task_gauge_add(&self, metric: &str, queue: &str, task_type: &str, value: f64) {
        gauge!(
            self.name(metric),
            "queue" => queue.to_string(),
            "type" => task_type.to_string()
        )
        .increment(value);
    }

    pub(crate) fn record(&self, metric: &str, value: f64) {
        histogram!(self.name(metric)).record(value);
    }

    pub(crate) fn record_queue(&self, metric: &str, queue: &str, value: f64) {
        histogram!(self.name(metric), "queue" => queue.to_string()).record(value);
    }

    pub(crate) fn record_task(&self, metric: &str, queue: &str, task_type: &str, value: f64) {
        histogram!(
            self.name(metric),
            "queue" => queue.to_string(),
            "type" => task_type.to_string()
        )
        .record(value);
    }
}

/// Gives back the increment of [`Metrics::gauge_guard`], also when a future holding it is
/// dropped before completion.
pub(crate) struct GaugeGuard {
    gauge: Gauge,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
    }
}
