use std::time::Duration;

use sqlx::{postgres::PgListener, query, PgPool};
use taskqueue_schema::TASK_UPDATE_CHANNEL;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    errors::{Result, TaskQueueError},
    options::TaskQueueConfig,
    utils::sleep_or_cancel,
};

/// Why [`TaskListener::wait`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A task was inserted
    Notification,
    /// The connection was lost, notifications may have been missed
    ConnectionLost,
    /// Nothing happened during the poll period
    Timeout,
}

/// Dedicated connection receiving `task_update` notifications.
///
/// The connection is opened by [`TaskListener::start`] with an exponential backoff and
/// reopened the same way when it breaks.
pub struct TaskListener {
    pg_pool: PgPool,
    config: TaskQueueConfig,
    listener: Option<PgListener>,
    listening: bool,
    last_ping: Instant,
}

impl TaskListener {
    pub fn new(pg_pool: PgPool, config: TaskQueueConfig) -> Self {
        TaskListener {
            pg_pool,
            config,
            listener: None,
            listening: false,
            last_ping: Instant::now(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.listener.is_some()
    }

    /// Opens the connection, retrying until it succeeds or `ctx` is cancelled
    pub async fn start(&mut self, ctx: &CancellationToken) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }

        let mut backoff = self.config.min_reconnect_timeout;
        let mut listener = loop {
            match PgListener::connect_with(&self.pg_pool).await {
                Ok(listener) => break listener,
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "Could not open notification listener");
                    if !sleep_or_cancel(ctx, backoff).await {
                        return Err(TaskQueueError::Cancelled);
                    }
                    backoff = next_backoff(
                        backoff,
                        self.config.min_reconnect_timeout,
                        self.config.max_reconnect_timeout,
                    );
                }
            }
        };

        if self.listening {
            listener.listen(TASK_UPDATE_CHANNEL).await?;
        }

        self.listener = Some(listener);
        self.last_ping = Instant::now();
        debug!("Notification listener started");
        Ok(())
    }

    /// Closes the connection
    pub async fn stop(&mut self) {
        self.listening = false;
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = listener.unlisten_all().await {
                trace!(error = %e, "Could not unlisten while stopping");
            }
            debug!("Notification listener stopped");
        }
    }

    /// Subscribes to `task_update`, starting the listener if needed
    pub async fn listen(&mut self, ctx: &CancellationToken) -> Result<()> {
        self.start(ctx).await?;
        if self.listening {
            return Ok(());
        }

        if let Some(listener) = self.listener.as_mut() {
            if let Err(e) = listener.listen(TASK_UPDATE_CHANNEL).await {
                self.listener = None;
                return Err(e.into());
            }
        }
        self.listening = true;
        Ok(())
    }

    pub async fn unlisten(&mut self) -> Result<()> {
        if !self.listening {
            return Ok(());
        }
        self.listening = false;

        if let Some(listener) = self.listener.as_mut() {
            if let Err(e) = listener.unlisten(TASK_UPDATE_CHANNEL).await {
                self.listener = None;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Waits for a notification for at most `timeout`.
    ///
    /// The connection is pinged every ten poll periods to keep it alive.
    pub async fn wait(&mut self, ctx: &CancellationToken, timeout: Duration) -> Result<Wakeup> {
        self.start(ctx).await?;
        self.ping_if_idle().await;

        let Some(listener) = self.listener.as_mut() else {
            return Ok(Wakeup::ConnectionLost);
        };

        let received = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(TaskQueueError::Cancelled),
            received = listener.try_recv() => Some(received),
            _ = tokio::time::sleep(timeout) => None,
        };

        match received {
            None => Ok(Wakeup::Timeout),
            Some(Ok(Some(notification))) => {
                trace!(channel = notification.channel(), "Notification received");
                Ok(Wakeup::Notification)
            }
            Some(Ok(None)) => {
                warn!("Notification listener connection lost, reconnecting");
                Ok(Wakeup::ConnectionLost)
            }
            Some(Err(e)) => {
                self.listener = None;
                Err(e.into())
            }
        }
    }

    async fn ping_if_idle(&mut self) {
        if self.last_ping.elapsed() < self.config.poll_frequency * 10 {
            return;
        }
        self.last_ping = Instant::now();

        if let Some(listener) = self.listener.as_mut() {
            if let Err(e) = query("select 1").execute(&mut *listener).await {
                warn!(error = %e, "Notification listener ping failed");
                self.listener = None;
            }
        }
    }
}

/// Doubles `current`, staying within `[min, max]`
fn next_backoff(current: Duration, min: Duration, max: Duration) -> Duration {
    (current * 2).clamp(min, max.max(min))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(500);

        let mut backoff = min;
        let mut steps = vec![];
        for _ in 0..5 {
            backoff = next_backoff(backoff, min, max);
            steps.push(backoff.as_millis());
        }
        assert_eq!(steps, vec![200, 400, 500, 500, 500]);
    }

    #[test]
    fn backoff_never_below_min() {
        let min = Duration::from_millis(100);
        assert_eq!(next_backoff(Duration::ZERO, min, Duration::from_secs(1)), min);
    }
}
