use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::changes::FileChangeEvent;
use crate::flows::file_repository::canonical_path;

/// Default time after a local write during which a change notification for
/// the same path is taken to be the echo of that write.
pub const DEFAULT_ECHO_WINDOW_MS: i64 = 2000;

/// Classifies change notifications as echoes of our own saves. Paths are
/// tracked in canonical project-relative form.
///
/// An event is suppressed iff an own save `s` was recorded for its path and
/// the event time `t` satisfies `0 < t - s <= window`. Events at or before the
/// save, or after the window, are processed. A genuine external edit racing a
/// local save inside the window is swallowed.
pub struct OwnWriteSuppressor {
    window_ms: i64,
    own_saves: Mutex<HashMap<String, i64>>,
}

impl Default for OwnWriteSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_WINDOW_MS)
    }
}

impl OwnWriteSuppressor {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            own_saves: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Record "now" as the instant we wrote `path`. Call before the write is
    /// issued, never after its result is known.
    pub fn mark_own_save(&self, path: &str) {
        self.mark_own_save_at(path, Utc::now().timestamp_millis());
    }

    pub fn mark_own_save_at(&self, path: &str, at_ms: i64) {
        tracing::trace!(path, at_ms, "marked own save");
        self.lock().insert(canonical_path(path), at_ms);
    }

    pub fn last_own_save(&self, path: &str) -> Option<i64> {
        self.lock().get(&canonical_path(path)).copied()
    }

    pub fn should_suppress(&self, path: &str, event: &FileChangeEvent) -> bool {
        self.should_suppress_at(path, event.timestamp_millis())
    }

    pub fn should_suppress_at(&self, path: &str, event_ms: i64) -> bool {
        let Some(saved_at) = self.last_own_save(path) else {
            return false;
        };
        let elapsed = event_ms - saved_at;
        elapsed > 0 && elapsed <= self.window_ms
    }

    pub fn forget(&self, path: &str) {
        self.lock().remove(&canonical_path(path));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.own_saves
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
