use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("progress receiver is gone")]
    Closed,
    #[error("progress is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write side of a task progress stream.
///
/// Each value sent is a serialized JSON document. The handler owns the sink and closes it
/// exactly once, either with [`ProgressSink::close`] or by dropping it; the worker waits for
/// that closure to know the handler is done.
#[derive(Debug)]
pub struct ProgressSink {
    tx: mpsc::Sender<Vec<u8>>,
}

pub type ProgressReceiver = mpsc::Receiver<Vec<u8>>;

impl ProgressSink {
    pub fn channel(buffer: usize) -> (ProgressSink, ProgressReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (ProgressSink { tx }, rx)
    }

    pub async fn send(&self, progress: impl Into<Vec<u8>>) -> Result<(), ProgressError> {
        self.tx
            .send(progress.into())
            .await
            .map_err(|_| ProgressError::Closed)
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, progress: &T) -> Result<(), ProgressError> {
        let bytes = serde_json::to_vec(progress)?;
        self.send(bytes).await
    }

    pub fn close(self) {
        drop(self);
    }
}

/// Adds an `"error"` field to the last progress document of a failed task.
///
/// Fields of a JSON object are kept. Anything else is not an object we can extend, so a new
/// object is built holding the error and the previous document under `"progress"`.
pub fn merge_error_into_progress(progress: &[u8], message: &str) -> Vec<u8> {
    let mut merged = Map::new();
    match serde_json::from_slice::<Value>(progress) {
        Ok(Value::Object(fields)) => merged = fields,
        Ok(Value::Null) => {}
        Ok(other) => {
            merged.insert("progress".into(), other);
        }
        Err(_) if progress.is_empty() => {}
        Err(_) => {
            merged.insert(
                "progress".into(),
                Value::String(String::from_utf8_lossy(progress).into_owned()),
            );
        }
    }
    merged.insert("error".into(), Value::String(message.to_string()));

    // A map of strings and parsed values always serializes
    serde_json::to_vec(&Value::Object(merged)).unwrap_or_default()
}
