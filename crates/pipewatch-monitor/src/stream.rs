//! Push-stream client.
//!
//! A spawned connection loop owns the channel. It opens the stream, decodes
//! frames into [`PushEvent`]s and forwards them to the owner over an mpsc
//! channel. When the channel errors or the server closes it, the loop waits
//! the reconnect delay and tries again, forever. Only one loop runs per
//! client, so at most one reconnect is ever pending.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pipewatch_client::{ChannelConnector, SseFrame, StreamEndpoint};
use pipewatch_core::StreamEvent;

use crate::event::{ConnectionState, PushEvent};

/// Capacity of the channel between the connection loop and the owner.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Shared connection state with guarded transitions.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionTracker {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionTracker {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `Connecting` for a connection attempt. The first attempt of a
    /// loop may start from `Disconnected`; a retry only proceeds from
    /// `ReconnectPending`, so it never overrides a disconnect. Returns false if
    /// the attempt must not run.
    pub(crate) fn begin_connect(&self, retry: bool) -> bool {
        self.tx.send_if_modified(|state| {
            let allowed = match state {
                ConnectionState::ReconnectPending => true,
                ConnectionState::Disconnected => !retry,
                ConnectionState::Connecting | ConnectionState::Connected => false,
            };
            if allowed {
                *state = ConnectionState::Connecting;
            }
            allowed
        })
    }

    /// The channel is open.
    pub(crate) fn opened(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
    }

    /// The channel failed or closed. Returns true if this schedules a
    /// reconnect, false if one is already pending or the client is stopped.
    pub(crate) fn transport_error(&self) -> bool {
        self.tx.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                *state = ConnectionState::ReconnectPending;
                true
            }
            ConnectionState::ReconnectPending | ConnectionState::Disconnected => false,
        })
    }

    pub(crate) fn disconnected(&self) {
        self.tx.send_replace(ConnectionState::Disconnected);
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client for the server push stream.
pub struct PushStreamClient {
    connector: Arc<dyn ChannelConnector>,
    endpoint: Arc<dyn StreamEndpoint>,
    reconnect_delay: Duration,
    tracker: ConnectionTracker,
    events: mpsc::Sender<PushEvent>,
    worker: Option<Worker>,
}

impl PushStreamClient {
    /// Create a client and the receiver its events are delivered on.
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called.
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        endpoint: Arc<dyn StreamEndpoint>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::Receiver<PushEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = Self {
            connector,
            endpoint,
            reconnect_delay,
            tracker: ConnectionTracker::new(),
            events,
            worker: None,
        };
        (client, rx)
    }

    /// Start the connection loop. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self) {
        if let Some(worker) = &self.worker {
            if !worker.handle.is_finished() {
                debug!("Push stream already running");
                return;
            }
        }

        let cancel = CancellationToken::new();
        let connection = ConnectionLoop {
            connector: Arc::clone(&self.connector),
            endpoint: Arc::clone(&self.endpoint),
            reconnect_delay: self.reconnect_delay,
            tracker: self.tracker.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(connection.run());
        self.worker = Some(Worker { cancel, handle });
    }

    /// Close the channel and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(worker) = self.worker.take() {
            info!("Disconnecting push stream");
            worker.cancel.cancel();
            worker.handle.abort();
        }
        self.tracker.disconnected();
    }

    pub fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tracker.subscribe()
    }
}

impl Drop for PushStreamClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct ConnectionLoop {
    connector: Arc<dyn ChannelConnector>,
    endpoint: Arc<dyn StreamEndpoint>,
    reconnect_delay: Duration,
    tracker: ConnectionTracker,
    events: mpsc::Sender<PushEvent>,
    cancel: CancellationToken,
}

impl ConnectionLoop {
    async fn run(self) {
        let mut retry = false;
        'connection: loop {
            if !self.tracker.begin_connect(retry) {
                debug!("Push stream no longer wanted, not reconnecting");
                break;
            }
            retry = true;
            let url = self.endpoint.stream_url();
            info!(url = %url, "Connecting to push stream");

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break 'connection,
                result = self.connector.open(&url) => result,
            };

            match opened {
                Ok(mut frames) => {
                    self.tracker.opened();
                    info!("Push stream connected");

                    loop {
                        let next = tokio::select! {
                            _ = self.cancel.cancelled() => break 'connection,
                            next = frames.next() => next,
                        };
                        match next {
                            Some(Ok(frame)) => {
                                if !self.dispatch(frame).await {
                                    debug!("Event receiver dropped, stopping push stream");
                                    self.tracker.disconnected();
                                    break 'connection;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Push stream error");
                                break;
                            }
                            None => {
                                info!("Push stream closed by server");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open push stream");
                }
            }

            if self.tracker.transport_error() {
                info!(
                    delay_secs = self.reconnect_delay.as_secs(),
                    "Reconnecting in {} seconds...",
                    self.reconnect_delay.as_secs()
                );
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break 'connection,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        debug!("Push stream loop stopped");
    }

    /// Decode one frame and forward it. Returns false once the owner is gone.
    async fn dispatch(&self, frame: SseFrame) -> bool {
        let event = match StreamEvent::decode(&frame.event, &frame.data) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(event = %frame.event, "Ignoring unhandled push event");
                return true;
            }
            Err(e) => {
                warn!(event = %frame.event, error = %e, "Dropping malformed push event");
                return true;
            }
        };

        let push = match event {
            StreamEvent::Connected => {
                self.tracker.opened();
                PushEvent::Connected
            }
            StreamEvent::Heartbeat => PushEvent::Heartbeat,
            StreamEvent::TaskUpdate(task) => {
                debug!(
                    task_id = %task.id,
                    status = %task.status,
                    progress = task.progress,
                    "Task update"
                );
                let notification = task.terminal_notification();
                PushEvent::TaskUpdated { task, notification }
            }
        };

        self.events.send(push).await.is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream;
    use pipewatch_client::{ClientError, FixedEndpoint, FrameStream};
    use pipewatch_core::{NotificationKind, TaskStatus};

    /// What the fake server does on the next connection attempt.
    pub(crate) enum Attempt {
        Refuse,
        /// Send the frames, then keep the channel open.
        Hold(Vec<SseFrame>),
        /// Send the frames, then close the channel.
        Close(Vec<SseFrame>),
    }

    /// Connector that replays scripted attempts, refusing once exhausted.
    pub(crate) struct FakeConnector {
        attempts: AtomicUsize,
        script: Mutex<VecDeque<Attempt>>,
    }

    impl FakeConnector {
        pub(crate) fn new(script: Vec<Attempt>) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
            })
        }

        pub(crate) fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelConnector for FakeConnector {
        async fn open(&self, _url: &str) -> Result<FrameStream, ClientError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next.unwrap_or(Attempt::Refuse) {
                Attempt::Refuse => Err(ClientError::Stream("connection refused".to_string())),
                Attempt::Hold(frames) => Ok(Box::pin(
                    stream::iter(frames.into_iter().map(Ok::<_, ClientError>))
                        .chain(stream::pending()),
                )),
                Attempt::Close(frames) => Ok(Box::pin(stream::iter(
                    frames.into_iter().map(Ok::<_, ClientError>),
                ))),
            }
        }
    }

    pub(crate) fn task_update(id: &str, status: &str, error: Option<&str>) -> SseFrame {
        let error = error
            .map(|e| format!("\"{}\"", e))
            .unwrap_or_else(|| "null".to_string());
        SseFrame::new(
            "task_update",
            format!(
                r#"{{"task": {{"id": "{}", "task_type": "pipeline", "status": "{}", "progress": 50, "error_message": {}}}}}"#,
                id, status, error
            ),
        )
    }

    fn client(connector: Arc<FakeConnector>) -> (PushStreamClient, mpsc::Receiver<PushEvent>) {
        PushStreamClient::new(
            connector,
            Arc::new(FixedEndpoint("http://test/events".to_string())),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_tracker_schedules_one_reconnect() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.state(), ConnectionState::Disconnected);
        assert!(!tracker.transport_error());

        assert!(tracker.begin_connect(false));
        tracker.opened();
        assert_eq!(tracker.state(), ConnectionState::Connected);

        assert!(tracker.transport_error());
        assert_eq!(tracker.state(), ConnectionState::ReconnectPending);
        assert!(!tracker.transport_error());
        assert_eq!(tracker.state(), ConnectionState::ReconnectPending);

        // A stale open signal does not resurrect a pending reconnect.
        tracker.opened();
        assert_eq!(tracker.state(), ConnectionState::ReconnectPending);
    }

    #[test]
    fn test_retry_does_not_override_disconnect() {
        let tracker = ConnectionTracker::new();
        assert!(tracker.begin_connect(false));
        tracker.opened();
        assert!(tracker.transport_error());

        // disconnect() lands while the reconnect delay is running.
        tracker.disconnected();
        assert!(!tracker.begin_connect(true));
        assert_eq!(tracker.state(), ConnectionState::Disconnected);

        // An attempt already in flight is not restarted either.
        assert!(tracker.begin_connect(false));
        assert!(!tracker.begin_connect(true));
        assert!(!tracker.begin_connect(false));
        assert_eq!(tracker.state(), ConnectionState::Connecting);

        tracker.transport_error();
        assert!(tracker.begin_connect(true));
        assert_eq!(tracker.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_at_fixed_delay() {
        let connector = FakeConnector::new(Vec::new());
        let (mut client, _rx) = client(Arc::clone(&connector));

        client.connect();
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(client.state(), ConnectionState::ReconnectPending);

        client.disconnect();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let connector = FakeConnector::new(vec![Attempt::Hold(Vec::new())]);
        let (mut client, _rx) = client(Arc::clone(&connector));

        client.connect();
        client.connect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(client.is_connected());

        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_events_and_skips_bad_frames() {
        let connector = FakeConnector::new(vec![Attempt::Hold(vec![
            SseFrame::new("connected", r#"{"status": "connected"}"#),
            task_update("t-1", "running", None),
            SseFrame::new("stats_update", "{}"),
            SseFrame::new("task_update", "{not json"),
            task_update("t-1", "failed", Some("disk full")),
            SseFrame::new("heartbeat", ""),
        ])]);
        let (mut client, mut rx) = client(connector);
        client.connect();

        assert_eq!(rx.recv().await, Some(PushEvent::Connected));

        match rx.recv().await {
            Some(PushEvent::TaskUpdated { task, notification }) => {
                assert_eq!(task.status, TaskStatus::Running);
                assert!(notification.is_none());
            }
            other => panic!("Expected TaskUpdated, got {:?}", other),
        }

        match rx.recv().await {
            Some(PushEvent::TaskUpdated { task, notification }) => {
                assert_eq!(task.status, TaskStatus::Failed);
                let notification = notification.unwrap();
                assert_eq!(notification.kind, NotificationKind::Error);
                assert_eq!(notification.title, "Task failed");
                assert_eq!(notification.message, "pipeline failed: disk full");
            }
            other => panic!("Expected TaskUpdated, got {:?}", other),
        }

        assert_eq!(rx.recv().await, Some(PushEvent::Heartbeat));
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_close_triggers_reconnect() {
        let connector = FakeConnector::new(vec![
            Attempt::Close(vec![SseFrame::new("connected", "{}")]),
            Attempt::Hold(Vec::new()),
        ]);
        let (mut client, mut rx) = client(Arc::clone(&connector));
        let mut state = client.subscribe();
        client.connect();

        assert_eq!(rx.recv().await, Some(PushEvent::Connected));
        state
            .wait_for(|s| *s == ConnectionState::ReconnectPending)
            .await
            .unwrap();
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(connector.attempts(), 2);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_stops_loop() {
        let connector = FakeConnector::new(vec![Attempt::Hold(vec![
            SseFrame::new("heartbeat", ""),
            SseFrame::new("heartbeat", ""),
        ])]);
        let (mut client, rx) = client(Arc::clone(&connector));
        drop(rx);
        client.connect();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
