//! The task monitoring facade.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use pipewatch_client::{ChannelConnector, StreamEndpoint};
use pipewatch_core::{Notification, NotificationId};

use crate::event::{ConnectionState, MonitorEvent, PushEvent};
use crate::store::NotificationStore;
use crate::stream::PushStreamClient;

/// Live task monitoring: the push stream plus the notification log.
///
/// The monitor is the single owner of the log. Events from the stream are
/// applied to it in [`next_event`](Self::next_event), on the caller's task.
pub struct TaskMonitor {
    store: NotificationStore,
    stream: PushStreamClient,
    events: mpsc::Receiver<PushEvent>,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl TaskMonitor {
    /// Create a monitor over `store`. The stream stays closed until
    /// [`activate`](Self::activate).
    pub fn new(
        store: NotificationStore,
        connector: Arc<dyn ChannelConnector>,
        endpoint: Arc<dyn StreamEndpoint>,
        reconnect_delay: Duration,
    ) -> Self {
        let (stream, events) = PushStreamClient::new(connector, endpoint, reconnect_delay);
        Self {
            store,
            stream,
            events,
            last_heartbeat: None,
        }
    }

    /// Open the push stream.
    pub fn activate(&mut self) {
        info!("Activating task monitor");
        self.stream.connect();
    }

    /// Close the push stream and cancel any pending reconnect.
    pub fn deactivate(&mut self) {
        self.stream.disconnect();
    }

    /// Wait for the next push event and apply it to the log.
    ///
    /// Stays pending while the stream is inactive.
    pub async fn next_event(&mut self) -> Option<MonitorEvent> {
        let event = self.events.recv().await?;
        Some(self.apply(event))
    }

    fn apply(&mut self, event: PushEvent) -> MonitorEvent {
        match event {
            PushEvent::Connected => MonitorEvent::Connected,
            PushEvent::Heartbeat => {
                self.last_heartbeat = Some(Utc::now());
                MonitorEvent::Heartbeat
            }
            PushEvent::TaskUpdated { task, notification } => {
                let notification = notification.map(|input| {
                    let stored = self.store.append(input);
                    info!(
                        task_id = %task.id,
                        status = %task.status,
                        title = %stored.title,
                        "Task notification"
                    );
                    stored
                });
                if notification.is_none() {
                    debug!(task_id = %task.id, status = %task.status, "Task updated");
                }
                MonitorEvent::TaskUpdated { task, notification }
            }
        }
    }

    /// Notifications, newest first.
    pub fn notifications(&self) -> &[Notification] {
        self.store.notifications()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.stream.subscribe()
    }

    /// When the last heartbeat arrived, if any.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat
    }

    pub fn mark_as_read(&mut self, id: &NotificationId) {
        self.store.mark_read(id);
    }

    pub fn mark_all_as_read(&mut self) {
        self.store.mark_all_read();
    }

    pub fn delete_notification(&mut self, id: &NotificationId) {
        self.store.delete(id);
    }

    pub fn clear_all(&mut self) {
        self.store.clear_all();
    }
}

impl Drop for TaskMonitor {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pipewatch_client::{FixedEndpoint, SseFrame};
    use pipewatch_core::{NotificationKind, TaskStatus};

    use crate::store::MemoryRepository;
    use crate::stream::tests::{task_update, Attempt, FakeConnector};

    fn monitor(script: Vec<Attempt>, repo: MemoryRepository) -> TaskMonitor {
        TaskMonitor::new(
            NotificationStore::load(repo),
            FakeConnector::new(script),
            Arc::new(FixedEndpoint("http://test/events".to_string())),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_task_produces_one_error_notification() {
        let repo = MemoryRepository::new();
        let mut monitor = monitor(
            vec![Attempt::Hold(vec![
                SseFrame::new("connected", "{}"),
                task_update("t-1", "failed", Some("disk full")),
            ])],
            repo.clone(),
        );
        monitor.activate();

        assert_eq!(monitor.next_event().await, Some(MonitorEvent::Connected));
        assert!(monitor.is_connected());

        match monitor.next_event().await {
            Some(MonitorEvent::TaskUpdated { task, notification }) => {
                assert_eq!(task.status, TaskStatus::Failed);
                let notification = notification.unwrap();
                assert_eq!(notification.kind, NotificationKind::Error);
                assert_eq!(notification.message, "pipeline failed: disk full");
            }
            other => panic!("Expected TaskUpdated, got {:?}", other),
        }

        assert_eq!(monitor.notifications().len(), 1);
        assert_eq!(monitor.unread_count(), 1);
        assert_eq!(monitor.notifications()[0].task_id.as_ref().unwrap().as_str(), "t-1");

        // Persisted before the event was returned.
        let reloaded = NotificationStore::load(repo);
        assert_eq!(reloaded.notifications(), monitor.notifications());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_updates_produce_no_notifications() {
        let mut monitor = monitor(
            vec![Attempt::Hold(vec![
                task_update("t-2", "running", None),
                task_update("t-2", "running", None),
                task_update("t-2", "running", None),
                SseFrame::new("heartbeat", ""),
            ])],
            MemoryRepository::new(),
        );
        monitor.activate();

        for _ in 0..3 {
            match monitor.next_event().await {
                Some(MonitorEvent::TaskUpdated { notification, .. }) => {
                    assert!(notification.is_none())
                }
                other => panic!("Expected TaskUpdated, got {:?}", other),
            }
        }
        assert_eq!(monitor.next_event().await, Some(MonitorEvent::Heartbeat));
        assert!(monitor.last_heartbeat().is_some());
        assert!(monitor.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_operations() {
        let mut monitor = monitor(
            vec![Attempt::Hold(vec![
                task_update("a", "completed", None),
                task_update("b", "failed", None),
            ])],
            MemoryRepository::new(),
        );
        monitor.activate();
        monitor.next_event().await.unwrap();
        monitor.next_event().await.unwrap();
        assert_eq!(monitor.unread_count(), 2);

        let newest = monitor.notifications()[0].clone();
        assert_eq!(newest.message, "pipeline failed: Unknown error");
        monitor.mark_as_read(&newest.id);
        assert_eq!(monitor.unread_count(), 1);

        monitor.mark_all_as_read();
        assert_eq!(monitor.unread_count(), 0);

        monitor.delete_notification(&newest.id);
        assert_eq!(monitor.notifications().len(), 1);

        monitor.clear_all();
        assert!(monitor.notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_stops_stream() {
        let mut monitor = monitor(vec![Attempt::Hold(Vec::new())], MemoryRepository::new());
        let mut state = monitor.subscribe();
        monitor.activate();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        monitor.deactivate();
        assert_eq!(monitor.connection_state(), ConnectionState::Disconnected);
        monitor.deactivate();
        assert!(!monitor.is_connected());
    }
}
