use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{sync::RwLock, time::Instant};
use tokio_util::sync::CancellationToken;

mod values;

pub use values::Values;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

struct Timer {
    deadline: Instant,
    stop: CancellationToken,
}

impl Timer {
    fn start(duration: Duration, token: CancellationToken, expired: Arc<AtomicBool>) -> Self {
        let deadline = Instant::now() + duration;
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    expired.store(true, Ordering::SeqCst);
                    token.cancel();
                }
                _ = stopped.cancelled() => {}
                _ = token.cancelled() => {}
            }
        });

        Timer { deadline, stop }
    }
}

/// A context whose deadline can be pushed back while it is in use.
///
/// The context is done once its parent token is cancelled or its deadline passes. Readers
/// take the shared lock, `reset` takes the exclusive lock and stops the running timer before
/// installing the new one.
#[derive(Clone)]
pub struct ResettableTimeout {
    token: CancellationToken,
    expired: Arc<AtomicBool>,
    timer: Arc<RwLock<Timer>>,
    values: Values,
}

impl ResettableTimeout {
    /// Must be called from within a tokio runtime.
    pub fn new(parent: &CancellationToken, duration: Duration) -> Self {
        Self::with_values(parent, duration, Values::new())
    }

    pub fn with_values(parent: &CancellationToken, duration: Duration, values: Values) -> Self {
        let token = parent.child_token();
        let expired = Arc::new(AtomicBool::new(false));
        let timer = Timer::start(duration, token.clone(), expired.clone());

        ResettableTimeout {
            token,
            expired,
            timer: Arc::new(RwLock::new(timer)),
            values,
        }
    }

    pub async fn deadline(&self) -> Instant {
        self.timer.read().await.deadline
    }

    /// Resolves once the context is done
    pub async fn done(&self) {
        self.token.cancelled().await
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `None` while the context is alive
    pub fn err(&self) -> Option<TimeoutError> {
        if !self.token.is_cancelled() {
            return None;
        }
        if self.expired.load(Ordering::SeqCst) {
            Some(TimeoutError::DeadlineExceeded)
        } else {
            Some(TimeoutError::Cancelled)
        }
    }

    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    /// Token cancelled when the context is done, to hand to code expecting one
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Moves the deadline to `duration` from now.
    ///
    /// Fails once the context is done, a finished context is never revived.
    pub async fn reset(&self, duration: Duration) -> Result<(), TimeoutError> {
        let mut timer = self.timer.write().await;
        if let Some(err) = self.err() {
            return Err(err);
        }

        timer.stop.cancel();
        *timer = Timer::start(duration, self.token.clone(), self.expired.clone());
        Ok(())
    }

    /// Cancels the context and its timer
    pub async fn cancel(&self) {
        let timer = self.timer.read().await;
        timer.stop.cancel();
        self.token.cancel();
    }
}

impl std::fmt::Debug for ResettableTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResettableTimeout")
            .field("done", &self.is_done())
            .field("err", &self.err())
            .field("values", &self.values)
            .finish()
    }
}
