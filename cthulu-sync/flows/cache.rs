use std::collections::HashMap;
use std::sync::Mutex;

use super::FlowSnapshot;

/// Last-known graph of every tab that is not on the canvas.
///
/// Entries only hold in-flight edits: they live until the tab's structure is
/// persisted or the project is closed. There is no eviction.
#[derive(Default)]
pub struct FlowSnapshotCache {
    snapshots: Mutex<HashMap<String, FlowSnapshot>>,
}

impl FlowSnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tab_id: &str, snapshot: FlowSnapshot) {
        self.lock().insert(tab_id.to_string(), snapshot);
    }

    pub fn get(&self, tab_id: &str) -> Option<FlowSnapshot> {
        self.lock().get(tab_id).cloned()
    }

    pub fn delete(&self, tab_id: &str) -> bool {
        self.lock().remove(tab_id).is_some()
    }

    pub fn contains(&self, tab_id: &str) -> bool {
        self.lock().contains_key(tab_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FlowSnapshot>> {
        // A poisoned map is still a valid map; keep serving it.
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
