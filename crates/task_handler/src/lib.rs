mod dispatch;
mod handler;
mod progress;

pub use dispatch::{DispatchHandler, NoHandlerFound};
pub use handler::{BoxedTaskHandler, TaskFn, TaskHandler};
pub use progress::{merge_error_into_progress, ProgressError, ProgressReceiver, ProgressSink};
