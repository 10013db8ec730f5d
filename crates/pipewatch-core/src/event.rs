//! Push-stream events and their decoding.
//!
//! The stream carries named events. The name is decoded first and the
//! payload is only parsed for names we understand; anything else is ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::timestamp;
use crate::{CoreError, NotificationInput, NotificationKind, TaskId, TaskStatus};

/// Event name sent once the server accepted the subscription.
pub const EVENT_CONNECTED: &str = "connected";

/// Event name carrying a task status change.
pub const EVENT_TASK_UPDATE: &str = "task_update";

/// Event name sent periodically to prove liveness.
pub const EVENT_HEARTBEAT: &str = "heartbeat";

/// Fallback text for failed tasks without an error message.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// A recognized push-stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Subscription confirmed. Informational only.
    Connected,
    /// A task changed status or progress.
    TaskUpdate(TaskSnapshot),
    /// Liveness signal without payload.
    Heartbeat,
}

impl StreamEvent {
    /// Decode a named event.
    ///
    /// Returns `Ok(None)` for names this client does not handle and an error
    /// when a recognized event carries a malformed payload.
    pub fn decode(name: &str, data: &str) -> Result<Option<Self>, CoreError> {
        match name {
            EVENT_CONNECTED => Ok(Some(Self::Connected)),
            EVENT_HEARTBEAT => Ok(Some(Self::Heartbeat)),
            EVENT_TASK_UPDATE => {
                let payload: TaskUpdatePayload =
                    serde_json::from_str(data).map_err(|e| CoreError::InvalidPayload {
                        event: name.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(Self::TaskUpdate(payload.task)))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskUpdatePayload {
    task: TaskSnapshot,
}

/// Task state carried by a `task_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Notification for a terminal status, `None` for pending or running.
    ///
    /// Non-terminal updates are frequent; notifying on them would flood the log.
    pub fn terminal_notification(&self) -> Option<NotificationInput> {
        if !self.status.is_terminal() {
            return None;
        }
        let input = match self.status {
            TaskStatus::Failed => {
                let reason = self
                    .error_message
                    .as_deref()
                    .filter(|msg| !msg.trim().is_empty())
                    .unwrap_or(UNKNOWN_ERROR);
                NotificationInput::new(
                    NotificationKind::Error,
                    "Task failed",
                    format!("{} failed: {}", self.task_type, reason),
                )
            }
            _ => NotificationInput::new(
                NotificationKind::Success,
                "Task completed",
                format!("{} completed successfully", self.task_type),
            ),
        };
        Some(input.with_task(self.id.clone(), self.task_type.clone()))
    }
}
