//! Monitor configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::store::DEFAULT_CAPACITY;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Backend base URL.
    pub api_base_url: String,

    /// Push-stream URL. Derived from `api_base_url` when unset.
    pub stream_url: Option<String>,

    /// Delay before reopening a lost push stream (seconds).
    pub reconnect_delay_secs: u64,

    /// Task list refresh interval (seconds).
    pub poll_interval_secs: u64,

    /// Maximum number of stored notifications.
    pub notification_capacity: usize,

    /// Tasks per page.
    pub page_size: u32,

    /// Directory holding persisted client state.
    pub data_dir: PathBuf,
}

impl MonitorConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            stream_url: None,
            reconnect_delay_secs: 5,
            poll_interval_secs: 5,
            notification_capacity: DEFAULT_CAPACITY,
            page_size: 10,
            data_dir: PathBuf::from(".pipewatch"),
        }
    }
}
