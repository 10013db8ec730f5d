//! Event types exchanged between the monitor's background tasks and its owner.

use pipewatch_core::{
    CreatedTask, Notification, NotificationInput, TaskFilter, TaskId, TaskPage, TaskParams,
    TaskSnapshot, TaskStatus,
};

/// Connection state of the push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    #[default]
    Disconnected,

    /// Opening the channel.
    Connecting,

    /// Channel open, events flowing.
    Connected,

    /// Channel lost; one reconnect is scheduled.
    ReconnectPending,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events sent from the push-stream loop to the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The server confirmed the subscription.
    Connected,

    /// Liveness signal.
    Heartbeat,

    /// A task changed; `notification` is set for terminal statuses.
    TaskUpdated {
        task: TaskSnapshot,
        notification: Option<NotificationInput>,
    },
}

/// Events handed to the monitor's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Connected,

    Heartbeat,

    /// A task changed; `notification` is the stored notification, if any.
    TaskUpdated {
        task: TaskSnapshot,
        notification: Option<Notification>,
    },
}

/// Commands sent to the task list poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskListCommand {
    /// Re-fetch the current page now.
    Refresh,

    /// Change the status filter. Resets to page 1.
    SetFilter(Option<TaskStatus>),

    /// Jump to a page, keeping the filter.
    SetPage(u32),

    /// Change the page size. Resets to page 1.
    SetPageSize(u32),

    /// Delete a task. Running tasks are refused.
    Delete { id: TaskId, status: TaskStatus },

    /// Create a task.
    Create {
        task_type: String,
        params: TaskParams,
    },
}

/// Results published by the task list poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskListUpdate {
    /// A fresh page for the given filter.
    Page { filter: TaskFilter, page: u32, tasks: TaskPage },

    /// A task was deleted.
    Deleted(TaskId),

    /// Delete refused because the task is running.
    Blocked(TaskId),

    /// A task was created.
    Created(CreatedTask),

    /// An API call failed. The loop keeps running.
    Error(String),
}
