use std::{future::Future, time::Duration};

use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, TaskQueueError};

/// Runs `fut` unless `ctx` is cancelled first. A dropped transaction rolls back.
pub(crate) async fn with_cancellation<T>(
    ctx: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(TaskQueueError::Cancelled),
        res = fut => res,
    }
}

/// Sleeps for `duration`, returns `false` when `ctx` got cancelled meanwhile
pub(crate) async fn sleep_or_cancel(ctx: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = ctx.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Parses progress bytes reported by a handler. Empty progress is the empty object, any
/// other progress must be a JSON object.
pub(crate) fn parse_progress(progress: &[u8]) -> Result<Value> {
    if progress.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }

    let value: Value = serde_json::from_slice(progress).map_err(TaskQueueError::InvalidJson)?;
    taskqueue_task::normalize_document(&value).ok_or_else(|| {
        TaskQueueError::InvalidJson(serde_json::Error::custom("progress must be a JSON object"))
    })
}

/// Quotes a string as an SQL literal
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn duration_ms<'de, D>(deserializer: D) -> core::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
