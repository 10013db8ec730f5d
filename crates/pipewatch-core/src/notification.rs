//! Client-side notifications synthesized from task events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NotificationId, NotificationKind, TaskId};

/// A notification shown to the operator.
///
/// Field names match the persisted log format (`type`, `taskId`, `taskType`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique notification identifier.
    pub id: NotificationId,

    /// Severity, drives styling.
    #[serde(rename = "type")]
    pub kind: NotificationKind,

    pub title: String,

    pub message: String,

    /// Creation time.
    pub timestamp: DateTime<Utc>,

    /// Whether the operator has seen it.
    #[serde(default)]
    pub read: bool,

    /// Task that produced this notification, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

impl Notification {
    /// Materialize an input with a fresh id and the current time, unread.
    pub fn from_input(input: NotificationInput) -> Self {
        Self {
            id: NotificationId::generate(),
            kind: input.kind,
            title: input.title,
            message: input.message,
            timestamp: Utc::now(),
            read: false,
            task_id: input.task_id,
            task_type: input.task_type,
        }
    }
}

/// The caller-supplied part of a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationInput {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub task_id: Option<TaskId>,
    pub task_type: Option<String>,
}

impl NotificationInput {
    /// Create an input without task correlation.
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            task_id: None,
            task_type: None,
        }
    }

    /// Builder method to correlate with the originating task.
    pub fn with_task(mut self, task_id: TaskId, task_type: impl Into<String>) -> Self {
        self.task_id = Some(task_id);
        self.task_type = Some(task_type.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_from_input_starts_unread() {
        let input = NotificationInput::new(NotificationKind::Info, "Hello", "world");
        let n = Notification::from_input(input);
        assert!(!n.read);
        assert_eq!(n.title, "Hello");
        assert!(n.task_id.is_none());
    }

    #[test]
    fn test_persisted_field_names() {
        let input = NotificationInput::new(NotificationKind::Error, "Task failed", "boom")
            .with_task(TaskId::new("t-1"), "pipeline");
        let n = Notification::from_input(input);

        let value = serde_json::to_value(&n).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["type"], Value::from("error"));
        assert_eq!(obj["taskId"], Value::from("t-1"));
        assert_eq!(obj["taskType"], Value::from("pipeline"));
        assert_eq!(obj["read"], Value::from(false));
        assert!(obj.contains_key("timestamp"));
    }
}
