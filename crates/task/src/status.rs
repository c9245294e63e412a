use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a task.
///
/// The only legal transitions are `waiting -> running`, `running -> running` (heartbeat),
/// `running -> finished`, `running -> failed` and `waiting | running -> cancelled`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Waiting,
    Running,
    Cancelled,
    Finished,
    Failed,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown task status '{0}'")]
pub struct UnknownTaskStatus(pub String);

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Waiting,
        TaskStatus::Running,
        TaskStatus::Cancelled,
        TaskStatus::Finished,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
        }
    }

    /// Cancelled, finished and failed tasks never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Finished | TaskStatus::Failed
        )
    }

    /// Whether moving from `self` to `next` respects the task state machine
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, next),
            (Waiting, Running)
                | (Running, Running)
                | (Running, Finished)
                | (Running, Failed)
                | (Waiting, Cancelled)
                | (Running, Cancelled)
        )
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownTaskStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownTaskStatus(s.to_string()))
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = UnknownTaskStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
