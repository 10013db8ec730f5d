//! pipewatch Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Persistence
//! - Runtime specifics
//!
//! It covers pipeline tasks as the backend reports them, the notifications
//! the client derives from them, push-stream event decoding, and the
//! classification of opaque task results.

pub mod error;
pub mod event;
pub mod ids;
pub mod notification;
pub mod result;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{StreamEvent, TaskSnapshot};
pub use ids::{NotificationId, TaskId};
pub use notification::{Notification, NotificationInput};
pub use result::{classify, ResultKind, ResultPanel, StepInfo};
pub use status::{NotificationKind, TaskStatus};
pub use task::{
    total_pages, CreatedTask, PipelineStats, Task, TaskFilter, TaskPage, TaskParams,
    TASK_TYPE_EMBED_QUESTION, TASK_TYPE_PIPELINE,
};
