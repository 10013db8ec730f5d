//! Task monitoring for the pipeline backend.
//!
//! - [`stream`]: push-stream client with automatic reconnect
//! - [`store`]: persisted, capped notification log
//! - [`tasks`]: task list controller and poll loop
//! - [`monitor`]: facade tying the stream to the log

pub mod config;
pub mod error;
pub mod event;
pub mod monitor;
pub mod store;
pub mod stream;
pub mod tasks;

pub use config::MonitorConfig;
pub use error::StoreError;
pub use event::{ConnectionState, MonitorEvent, PushEvent, TaskListCommand, TaskListUpdate};
pub use monitor::TaskMonitor;
pub use store::{
    FileRepository, MemoryRepository, NotificationRepository, NotificationStore, DEFAULT_CAPACITY,
    NOTIFICATIONS_KEY,
};
pub use stream::PushStreamClient;
pub use tasks::{DeleteOutcome, TaskListController, TaskQuery, DEFAULT_PAGE_SIZE};
