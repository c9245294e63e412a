mod reference;
mod request;
mod schedule;
mod status;
mod task;

pub use reference::Reference;
pub use request::{
    normalize_document, normalize_name, ScheduleRequest, ScheduleRequestBuilder,
    TaskEnqueueRequest, TaskEnqueueRequestBuilder,
};
pub use schedule::Schedule;
pub use status::{TaskStatus, UnknownTaskStatus};
pub use task::{Task, TaskBuilder};
