use std::future::{pending, Future};
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn unavailable(name: &'static str, error: std::io::Error) -> &'static str {
            warn!(signal = name, %error, "Could not listen to shutdown signal");
            pending().await
        }

        async fn on_ctrl_c() -> &'static str {
            match ctrl_c() {
                Ok(mut listener) => {
                    listener.recv().await;
                    "ctrl_c"
                }
                Err(e) => unavailable("ctrl_c", e).await,
            }
        }

        async fn on_ctrl_close() -> &'static str {
            match ctrl_close() {
                Ok(mut listener) => {
                    listener.recv().await;
                    "ctrl_close"
                }
                Err(e) => unavailable("ctrl_close", e).await,
            }
        }

        async fn on_ctrl_shutdown() -> &'static str {
            match ctrl_shutdown() {
                Ok(mut listener) => {
                    listener.recv().await;
                    "ctrl_shutdown"
                }
                Err(e) => unavailable("ctrl_shutdown", e).await,
            }
        }

        async fn raw_shutdown_signal() -> &'static str {
            select! {
                name = on_ctrl_c() => name,
                name = on_ctrl_close() => name,
                name = on_ctrl_shutdown() => name,
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        /// Resolves with `name` once `kind` is received, never when it can't be listened to
        async fn unix_signal(name: &'static str, kind: SignalKind) -> &'static str {
            match signal(kind) {
                Ok(mut listener) => {
                    listener.recv().await;
                    name
                }
                Err(e) => {
                    warn!(signal = name, error = %e, "Could not listen to shutdown signal");
                    pending().await
                }
            }
        }

        async fn raw_shutdown_signal() -> &'static str {
            select! {
                name = unix_signal("SIGINT", SignalKind::interrupt()) => name,
                name = unix_signal("SIGTERM", SignalKind::terminate()) => name,
                name = unix_signal("SIGHUP", SignalKind::hangup()) => name,
            }
        }
    } else {
        compile_error!("Shutdown signals are only supported on unix and windows targets");
    }
}

/// Completes on the first shutdown signal, clones complete together
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

pub fn shutdown_signal() -> ShutdownSignal {
    async {
        let signal = raw_shutdown_signal().await;
        info!(signal, "Shutdown signal received, stopping workers");
    }
    .boxed()
    .shared()
}

/// Root token for workers, cancelled on the first shutdown signal.
///
/// Must be called from within a tokio runtime.
pub fn shutdown_token() -> CancellationToken {
    cancel_on(shutdown_signal())
}

/// Returns a token cancelled once `signal` completes. The watcher ends with the token.
fn cancel_on(signal: impl Future<Output = ()> + Send + 'static) -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        select! {
            _ = signal => cancel.cancel(),
            _ = cancel.cancelled() => (),
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn token_is_cancelled_by_signal() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let token = cancel_on(async move {
            let _ = rx.await;
        });
        assert!(!token.is_cancelled());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelling_token_stops_watching() {
        let token = cancel_on(pending());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
