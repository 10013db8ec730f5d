//! The persisted notification log.
//!
//! [`NotificationStore`] is the only owner of the log. Every mutation writes
//! the whole capped log back through a [`NotificationRepository`] before it
//! returns, so a crash loses at most the write in progress.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use pipewatch_core::{Notification, NotificationId, NotificationInput};

use crate::error::StoreError;

/// Key under which the log is persisted.
pub const NOTIFICATIONS_KEY: &str = "pipewatch.notifications";

/// Number of notifications kept; older ones are dropped on every write.
pub const DEFAULT_CAPACITY: usize = 50;

/// Key-value surface for client-side persisted state.
pub trait NotificationRepository: Send {
    /// Read the value stored under `key`, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Stores each key as `<key>.json` in a directory.
#[derive(Debug, Clone)]
pub struct FileRepository {
    dir: PathBuf,
}

impl FileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl NotificationRepository for FileRepository {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        // Write to a sibling temp file and rename so readers never see a torn log.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(self.path(key)).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

/// In-process repository. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationRepository for MemoryRepository {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Capped, newest-first notification log.
pub struct NotificationStore {
    repo: Box<dyn NotificationRepository>,
    entries: Vec<Notification>,
    capacity: usize,
}

impl NotificationStore {
    /// Restore the log from `repo` with the default capacity.
    pub fn load(repo: impl NotificationRepository + 'static) -> Self {
        Self::load_with_capacity(repo, DEFAULT_CAPACITY)
    }

    /// Restore the log from `repo`.
    ///
    /// Never fails: unreadable or corrupt data yields an empty log.
    pub fn load_with_capacity(repo: impl NotificationRepository + 'static, capacity: usize) -> Self {
        let mut entries = match repo.get(NOTIFICATIONS_KEY) {
            Ok(Some(blob)) => match decode_log(&blob) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, "Discarding unreadable notification log");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "Failed to read notification log");
                Vec::new()
            }
        };
        entries.truncate(capacity);
        debug!(count = entries.len(), "Loaded notification log");

        Self {
            repo: Box::new(repo),
            entries,
            capacity,
        }
    }

    /// Notifications, newest first.
    pub fn notifications(&self) -> &[Notification] {
        &self.entries
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.entries.iter().find(|n| &n.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of notifications not yet read.
    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    /// Record a new notification at the front of the log.
    pub fn append(&mut self, input: NotificationInput) -> Notification {
        let notification = Notification::from_input(input);
        debug!(
            id = %notification.id,
            kind = %notification.kind,
            title = %notification.title,
            "Appending notification"
        );
        self.entries.insert(0, notification.clone());
        self.persist();
        notification
    }

    /// Mark one notification as read. Unknown ids are ignored.
    pub fn mark_read(&mut self, id: &NotificationId) {
        if let Some(n) = self.entries.iter_mut().find(|n| &n.id == id) {
            n.read = true;
        }
        self.persist();
    }

    pub fn mark_all_read(&mut self) {
        for n in &mut self.entries {
            n.read = true;
        }
        self.persist();
    }

    /// Remove one notification. Unknown ids are ignored.
    pub fn delete(&mut self, id: &NotificationId) {
        self.entries.retain(|n| &n.id != id);
        self.persist();
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// Write the whole capped log. Failures are logged, never raised: the
    /// in-memory log stays authoritative for this session.
    fn persist(&mut self) {
        self.entries.truncate(self.capacity);
        let written = encode_log(&self.entries)
            .and_then(|blob| self.repo.set(NOTIFICATIONS_KEY, &blob));
        if let Err(err) = written {
            warn!(error = %err, "Failed to persist notification log");
        }
    }
}

fn decode_log(blob: &str) -> Result<Vec<Notification>, StoreError> {
    Ok(serde_json::from_str(blob)?)
}

fn encode_log(entries: &[Notification]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(entries)?)
}

impl std::fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStore")
            .field("len", &self.entries.len())
            .field("unread", &self.unread_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewatch_core::{NotificationKind, TaskId};

    fn input(n: usize) -> NotificationInput {
        NotificationInput::new(
            NotificationKind::Success,
            "Task completed",
            format!("pipeline #{} completed successfully", n),
        )
        .with_task(TaskId::new(format!("task-{}", n)), "pipeline")
    }

    #[test]
    fn test_append_round_trips_through_repository() {
        let repo = MemoryRepository::new();
        let mut store = NotificationStore::load(repo.clone());
        let stored = store.append(input(1));

        let reloaded = NotificationStore::load(repo);
        assert_eq!(reloaded.notifications(), &[stored]);
    }

    #[test]
    fn test_file_repository_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = NotificationStore::load(FileRepository::new(dir.path().join("state")));
        let first = store.append(input(1));
        let second = store.append(input(2));
        store.mark_read(&first.id);

        let reloaded = NotificationStore::load(FileRepository::new(dir.path().join("state")));
        let ids: Vec<_> = reloaded.notifications().iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec![second.id, first.id.clone()]);
        assert!(reloaded.get(&first.id).unwrap().read);
        assert_eq!(reloaded.unread_count(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = NotificationStore::load(MemoryRepository::new());
        let first = store.append(input(0));
        for n in 1..=50 {
            store.append(input(n));
        }

        assert_eq!(store.len(), 50);
        assert!(store.get(&first.id).is_none());
        assert_eq!(
            store.notifications()[0].message,
            "pipeline #50 completed successfully"
        );
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut store = NotificationStore::load(MemoryRepository::new());
        let n = store.append(input(1));
        store.append(input(2));

        store.mark_read(&n.id);
        let once: Vec<Notification> = store.notifications().to_vec();
        store.mark_read(&n.id);
        assert_eq!(store.notifications(), once.as_slice());
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_missing_ids_are_noops() {
        let mut store = NotificationStore::load(MemoryRepository::new());
        store.append(input(1));
        let missing = NotificationId::new("missing");

        store.mark_read(&missing);
        store.delete(&missing);
        assert_eq!(store.len(), 1);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_unread_count_tracks_mutations() {
        let mut store = NotificationStore::load(MemoryRepository::new());
        let ids: Vec<_> = (0..6).map(|n| store.append(input(n)).id).collect();
        let expected = |store: &NotificationStore| {
            store.notifications().iter().filter(|n| !n.read).count()
        };

        store.mark_read(&ids[0]);
        assert_eq!(store.unread_count(), expected(&store));
        store.delete(&ids[1]);
        assert_eq!(store.unread_count(), expected(&store));
        store.delete(&ids[0]);
        assert_eq!(store.unread_count(), 4);
        store.mark_all_read();
        assert_eq!(store.unread_count(), 0);
        store.append(input(7));
        assert_eq!(store.unread_count(), 1);
        store.clear_all();
        assert_eq!(store.unread_count(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_log_loads_empty() {
        let repo = MemoryRepository::new();
        repo.set(NOTIFICATIONS_KEY, "{not a list").unwrap();
        let store = NotificationStore::load(repo);
        assert!(store.is_empty());
    }

    #[test]
    fn test_decode_log_reports_serialization_error() {
        assert!(matches!(
            decode_log("{not a list"),
            Err(StoreError::Serialization(_))
        ));
        assert!(matches!(
            decode_log(r#"[{"id": 7}]"#),
            Err(StoreError::Serialization(_))
        ));

        let mut store = NotificationStore::load(MemoryRepository::new());
        let stored = store.append(input(1));
        let blob = encode_log(store.notifications()).unwrap();
        assert_eq!(decode_log(&blob).unwrap(), vec![stored]);
    }

    #[test]
    fn test_load_applies_capacity() {
        let repo = MemoryRepository::new();
        let mut big = NotificationStore::load_with_capacity(repo.clone(), 80);
        for n in 0..80 {
            big.append(input(n));
        }

        let store = NotificationStore::load(repo);
        assert_eq!(store.len(), DEFAULT_CAPACITY);
        assert_eq!(
            store.notifications()[0].message,
            "pipeline #79 completed successfully"
        );
    }

    #[test]
    fn test_clear_all_persists_empty_log() {
        let repo = MemoryRepository::new();
        let mut store = NotificationStore::load(repo.clone());
        store.append(input(1));
        store.clear_all();

        assert_eq!(repo.get(NOTIFICATIONS_KEY).unwrap().as_deref(), Some("[]"));
    }
}
