use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// An externally reported change to a project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub file_path: String,
    pub change_type: ChangeType,
    /// Seconds since the epoch, fractional.
    pub timestamp: f64,
}

impl FileChangeEvent {
    pub fn now(file_path: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            file_path: file_path.into(),
            change_type,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    /// Event time rounded to whole milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        (self.timestamp * 1000.0).round() as i64
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

/// Per-path change notifications. Delivery is at-least-once and may lag the
/// write that caused it.
pub trait ChangeSource: Send + Sync {
    fn subscribe(&self, path: &str) -> broadcast::Receiver<FileChangeEvent>;
    fn unsubscribe(&self, path: &str);
}

/// In-process fan-out of change events, one broadcast channel per path, plus
/// a firehose channel carrying every event.
pub struct ChangeBus {
    channels: Mutex<HashMap<String, broadcast::Sender<FileChangeEvent>>>,
    all: broadcast::Sender<FileChangeEvent>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(CHANNEL_CAPACITY * 4);
        Self {
            channels: Mutex::new(HashMap::new()),
            all,
        }
    }

    /// Deliver `event` to subscribers of its path. Returns how many path
    /// subscribers received it.
    pub fn publish(&self, event: FileChangeEvent) -> usize {
        // Ignore send errors (no subscribers)
        let _ = self.all.send(event.clone());
        let channels = self.lock();
        match channels.get(&event.file_path) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.all.subscribe()
    }

    pub fn subscriber_count(&self, path: &str) -> usize {
        self.lock().get(path).map_or(0, |tx| tx.receiver_count())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<FileChangeEvent>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ChangeSource for ChangeBus {
    fn subscribe(&self, path: &str) -> broadcast::Receiver<FileChangeEvent> {
        self.lock()
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drops the path's channel once nobody listens to it anymore.
    fn unsubscribe(&self, path: &str) {
        let mut channels = self.lock();
        if channels.get(path).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(path);
        }
    }
}
