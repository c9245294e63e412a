use std::{future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use taskqueue_task::Task;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressSink;

/// Processes one leased task.
///
/// The handler owns `progress` and must close it before returning (dropping it is enough).
/// Every value sent becomes a heartbeat. `Ok(())` finishes the task, an error fails it with
/// the error message merged into the last progress.
pub trait TaskHandler: Send + Sync + 'static {
    fn process(
        &self,
        ctx: CancellationToken,
        task: Task,
        progress: ProgressSink,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn identifier(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(CancellationToken, Task, ProgressSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn process(
        &self,
        ctx: CancellationToken,
        task: Task,
        progress: ProgressSink,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        (self)(ctx, task, progress)
    }
}

pub type TaskFn = Arc<
    dyn Fn(CancellationToken, Task, ProgressSink) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Type-erased handler, so handlers of different types can live in one map
#[derive(Clone)]
pub struct BoxedTaskHandler {
    identifier: String,
    run: TaskFn,
}

impl BoxedTaskHandler {
    pub fn new<H: TaskHandler>(handler: H) -> Self {
        let identifier = handler.identifier().to_string();
        let handler = Arc::new(handler);
        let run: TaskFn = Arc::new(move |ctx, task, progress| {
            let handler = handler.clone();
            async move { handler.process(ctx, task, progress).await }.boxed()
        });

        BoxedTaskHandler { identifier, run }
    }
}

impl std::fmt::Debug for BoxedTaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedTaskHandler")
            .field(&self.identifier)
            .finish()
    }
}

impl TaskHandler for BoxedTaskHandler {
    fn process(
        &self,
        ctx: CancellationToken,
        task: Task,
        progress: ProgressSink,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        (self.run)(ctx, task, progress)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_ctx: CancellationToken, _task: Task, progress: ProgressSink) -> anyhow::Result<()> {
        progress.close();
        Ok(())
    }

    fn assert_task_handler<T: TaskHandler>(_: T) {}

    #[test]
    fn functions_are_task_handlers() {
        assert_task_handler(noop);
        assert_task_handler(BoxedTaskHandler::new(noop));
    }

    #[test]
    fn boxed_handler_keeps_identifier() {
        let crate_name = env!("CARGO_PKG_NAME");
        assert_eq!(
            BoxedTaskHandler::new(noop).identifier(),
            format!("{crate_name}::handler::tests::noop")
        );
    }
}
