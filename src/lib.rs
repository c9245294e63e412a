//! PostgreSQL backed task queue.
//!
//! Tasks are rows of a `tasks` table grouped by queue: at most one task of a queue runs at
//! any instant. A [`Worker`] leases tasks with a [`Dequeuer`], hands them to a
//! [`TaskHandler`] and records the progress the handler reports as heartbeats. A task whose
//! heartbeat is older than twice the heartbeat TTL can be leased again by another worker.
//!
//! Schedules (rows of the `schedules` table) produce tasks on a cron expression, the
//! [`ScheduleWorker`] enqueues a task for every due schedule.
//!
//! ```no_run
//! use serde_json::json;
//! use taskqueue::{
//!     shutdown_token, DispatchHandler, ProgressSink, Task, TaskEnqueueRequest, TaskQueueOptions,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn send_email(
//!     _ctx: CancellationToken,
//!     task: Task,
//!     progress: ProgressSink,
//! ) -> anyhow::Result<()> {
//!     progress.send_json(&json!({ "sent_to": task.spec()["to"] })).await?;
//!     progress.close();
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TaskQueueOptions::default()
//!         .database_url("postgres://localhost/app")
//!         .init()
//!         .await?;
//!
//!     store
//!         .queuer()
//!         .enqueue(TaskEnqueueRequest::new("emails", "send_email").with_spec(json!({ "to": "a@b.c" })))
//!         .await?;
//!
//!     let ctx = shutdown_token();
//!     let handler = DispatchHandler::new()
//!         .define("send_email", send_email)
//!         .define("retention", store.retention_handler());
//!     let worker = store.worker(handler, &[]);
//!     let schedule_worker = store.schedule_worker();
//!
//!     tokio::join!(worker.run(&ctx), schedule_worker.run(&ctx));
//!     Ok(())
//! }
//! ```

pub mod dequeuer;
pub mod errors;
pub mod listener;
pub mod metrics;
pub mod options;
pub mod queuer;
pub mod retention;
pub mod schedule_worker;
pub mod scheduler;
mod sql;
pub mod store;
mod utils;
pub mod worker;

pub use crate::dequeuer::Dequeuer;
pub use crate::errors::{Result, TaskQueueError};
pub use crate::listener::{TaskListener, Wakeup};
pub use crate::metrics::Metrics;
pub use crate::options::{DequeueOrder, TaskQueueConfig, TaskQueueOptions, WorkerBuildError};
pub use crate::queuer::Queuer;
pub use crate::retention::{RetentionHandler, RetentionSpec, RETENTION_TASK_TYPE};
pub use crate::schedule_worker::ScheduleWorker;
pub use crate::scheduler::Scheduler;
pub use crate::store::TaskStore;
pub use crate::worker::Worker;

pub use taskqueue_cron_parser::{parse_cron, CronParseError};
pub use taskqueue_cron_types::{CronTimer, CronValue};
pub use taskqueue_ctx::{ResettableTimeout, TimeoutError, Values};
pub use taskqueue_schema::SetupError;
pub use taskqueue_shutdown_signal::{shutdown_signal, shutdown_token};
pub use taskqueue_task::{
    Reference, Schedule, ScheduleRequest, ScheduleRequestBuilder, Task, TaskBuilder,
    TaskEnqueueRequest, TaskEnqueueRequestBuilder, TaskStatus,
};
pub use taskqueue_task_handler::{
    merge_error_into_progress, BoxedTaskHandler, DispatchHandler, NoHandlerFound, ProgressError,
    ProgressSink, TaskHandler,
};
