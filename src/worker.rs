use std::{sync::Arc, time::Instant};

use taskqueue_task::{normalize_name, Task};
use taskqueue_task_handler::{merge_error_into_progress, ProgressSink, TaskHandler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument, Span};
use uuid::Uuid;

use crate::{
    dequeuer::Dequeuer,
    errors::{Result, TaskQueueError},
    metrics::{
        WORKER_COMPLETED_TOTAL, WORKER_COUNT, WORKER_DURATION_S, WORKER_ERROR_TOTAL,
        WORKER_QUEUE_ERROR_TOTAL, WORKER_TASK_TOTAL, WORKER_WAITING, WORKER_WAIT_DURATION_S,
        WORKER_WORKING,
    },
    utils::sleep_or_cancel,
};

/// Number of progress documents buffered between a handler and its worker
const PROGRESS_BUFFER: usize = 16;

/// Runs tasks of some queues with a handler, one task at a time.
///
/// Several workers can run against the same queues, in one or many processes: the store
/// guarantees a queue never runs two tasks at once.
pub struct Worker<H> {
    dequeuer: Dequeuer,
    handler: Arc<H>,
    queues: Vec<String>,
}

/// How a handler run ended
enum HandlerOutcome {
    Success,
    Failure(String),
}

impl<H: TaskHandler> Worker<H> {
    /// A worker for `queues`, every queue with unfinished work when empty
    pub fn new(dequeuer: Dequeuer, handler: H, queues: &[&str]) -> Self {
        Worker {
            dequeuer,
            handler: Arc::new(handler),
            queues: queues
                .iter()
                .map(|queue| normalize_name(queue))
                .filter(|queue| !queue.is_empty())
                .collect(),
        }
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    fn queue_refs(&self) -> Vec<&str> {
        self.queues.iter().map(String::as_str).collect()
    }

    /// Processes tasks until `ctx` is cancelled.
    ///
    /// Store errors are logged and retried after a poll period, they never stop the worker.
    pub async fn run(&self, ctx: &CancellationToken) {
        let _running = self.dequeuer.store().metrics.gauge_guard(WORKER_COUNT);
        info!(queues = ?self.queues, handler = self.handler.identifier(), "Worker started");

        while !ctx.is_cancelled() {
            self.iterate(ctx).await;
        }

        self.dequeuer.stop().await;
        info!(queues = ?self.queues, "Worker stopped");
    }

    async fn iterate(&self, ctx: &CancellationToken) {
        let store = self.dequeuer.store();
        let metrics = &store.metrics;

        // Bounds the wait, so a dequeue never outlives the refresh interval
        let refresh = ctx.child_token();
        let refresh_timer = tokio::spawn({
            let refresh = refresh.clone();
            let interval = store.config.worker_refresh_interval;
            async move {
                tokio::time::sleep(interval).await;
                refresh.cancel();
            }
        });

        let waiting = metrics.gauge_guard(WORKER_WAITING);
        let start = Instant::now();
        let dequeued = self.dequeuer.dequeue(&refresh, &self.queue_refs()).await;
        refresh_timer.abort();
        drop(waiting);
        metrics.record(WORKER_WAIT_DURATION_S, start.elapsed().as_secs_f64());

        match dequeued {
            Ok(task) => {
                if let Err(e) = self.process_task(ctx, task).await {
                    error!(error = %e, "Could not release task");
                    metrics.count(WORKER_QUEUE_ERROR_TOTAL);
                }
            }
            Err(e) if e.is_cancelled() => {
                if !ctx.is_cancelled() {
                    trace!("Refreshing dequeue");
                }
            }
            Err(e) => {
                error!(error = %e, "Could not dequeue task");
                metrics.count(WORKER_QUEUE_ERROR_TOTAL);
                sleep_or_cancel(ctx, store.config.poll_frequency).await;
            }
        }
    }

    /// Processes at most one task without waiting, returns its id.
    pub async fn run_once(&self, ctx: &CancellationToken) -> Result<Option<Uuid>> {
        let Some(task) = self.dequeuer.try_dequeue(ctx, &self.queue_refs()).await? else {
            return Ok(None);
        };

        let task_id = *task.id();
        self.process_task(ctx, task).await?;
        Ok(Some(task_id))
    }

    /// Runs the handler on a leased task, relays its progress as heartbeats and finalizes
    /// the task.
    ///
    /// Errors are store errors while finalizing. A task that can't be updated anymore
    /// (cancelled, reclaimed...) is not an error.
    #[tracing::instrument(
        "process_task",
        skip_all,
        fields(
            task_id = %task.id(),
            messaging.system = "taskqueue",
            messaging.operation.name = "process_task",
            messaging.destination.name = %task.queue(),
            otel.name = %task.task_type()
        )
    )]
    async fn process_task(&self, ctx: &CancellationToken, task: Task) -> Result<()> {
        let metrics = &self.dequeuer.store().metrics;
        let task_id = *task.id();
        let queue = task.queue().clone();
        let task_type = task.task_type().clone();

        metrics.count_task(WORKER_TASK_TOTAL, &queue, &task_type);
        metrics.task_gauge_add(WORKER_WORKING, &queue, &task_type, 1.0);

        let mut last_progress = serde_json::to_vec(task.progress())?;
        let handler_ctx = ctx.child_token();
        let (sink, mut progress_rx) = ProgressSink::channel(PROGRESS_BUFFER);

        let start = Instant::now();
        let handler = self.handler.clone();
        let handler_task = tokio::spawn(
            {
                let handler_ctx = handler_ctx.clone();
                async move { handler.process(handler_ctx, task, sink).await }
            }
            .instrument(Span::current()),
        );

        // Ends once the handler closed or dropped its sink
        let mut forwarding = true;
        while let Some(progress) = progress_rx.recv().await {
            if !forwarding {
                continue;
            }

            match self.dequeuer.heartbeat(ctx, task_id, &progress).await {
                Ok(()) => last_progress = progress,
                Err(TaskQueueError::InvalidJson(e)) => {
                    warn!(error = %e, "Ignoring progress which is not valid JSON");
                }
                Err(e) if e.is_terminal_status() => {
                    warn!(error = %e, "Task can't be updated anymore, dropping its progress");
                    forwarding = false;
                }
                Err(e) if e.is_cancelled() => {
                    debug!("Worker cancelled, dropping progress");
                    forwarding = false;
                }
                Err(e) => {
                    error!(error = %e, "Could not record heartbeat");
                    metrics.count(WORKER_QUEUE_ERROR_TOTAL);
                }
            }
        }

        let outcome = match handler_task.await {
            Ok(Ok(())) => HandlerOutcome::Success,
            Ok(Err(e)) => HandlerOutcome::Failure(e.to_string()),
            Err(e) => {
                error!(error = %e, "Task handler panicked");
                HandlerOutcome::Failure(String::from("task panicked"))
            }
        };
        handler_ctx.cancel();

        let duration = start.elapsed();
        metrics.record_task(WORKER_DURATION_S, &queue, &task_type, duration.as_secs_f64());
        metrics.task_gauge_add(WORKER_WORKING, &queue, &task_type, -1.0);

        if !forwarding {
            debug!("Task not finalized");
            return Ok(());
        }

        let released = match &outcome {
            HandlerOutcome::Success => {
                self.dequeuer.finish(ctx, task_id, &last_progress).await
            }
            HandlerOutcome::Failure(message) => {
                let progress = merge_error_into_progress(&last_progress, message);
                self.dequeuer.fail(ctx, task_id, &progress).await
            }
        };

        match released {
            Ok(()) => match outcome {
                HandlerOutcome::Success => {
                    metrics.count_task(WORKER_COMPLETED_TOTAL, &queue, &task_type);
                    info!(duration = duration.as_millis(), "Completed task with success");
                }
                HandlerOutcome::Failure(message) => {
                    metrics.count_task(WORKER_ERROR_TOTAL, &queue, &task_type);
                    warn!(error = message, duration = duration.as_millis(), "Failed task");
                }
            },
            Err(e) if e.is_terminal_status() || e.is_cancelled() => {
                warn!(error = %e, "Task released elsewhere, result dropped");
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }
}

