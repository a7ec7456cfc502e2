use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::flows::graph::display_name;
use crate::flows::schema::SchemaCatalog;
use crate::flows::{Node, Tab};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
}

#[derive(Default)]
struct SessionState {
    project: Option<PathBuf>,
    tabs: Vec<Tab>,
    /// Tab highlighted in the tab bar. Updated last during a switch.
    active_tab: Option<String>,
    /// Tab whose graph the canvas holds or is about to hold. Updated first
    /// during a switch so edits made mid-switch land on the new tab.
    loaded_tab: Option<String>,
    /// Set while a snapshot is being restored onto the canvas.
    restoring: bool,
    /// The last switch failed to load, so the canvas shows a graph that is
    /// not the loaded tab's.
    canvas_stale: bool,
    saves_in_flight: usize,
    /// Edits seen so far.
    edits: u64,
    /// Tabs with unsaved structural edits, keyed to the latest edit.
    structure_dirty: HashMap<String, u64>,
    /// Display names of the nodes of each tab, for cross-tab lookups.
    names: HashMap<String, Vec<String>>,
}

impl SessionState {
    fn tab_mut(&mut self, tab_id: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == tab_id)
    }

    fn refresh_unsaved(&mut self, tab_id: &str, nodes: &[Node]) {
        let unsaved = self.structure_dirty.contains_key(tab_id) || nodes.iter().any(Node::has_dirty_file);
        if let Some(tab) = self.tab_mut(tab_id) {
            tab.has_unsaved_changes = unsaved;
        }
    }
}

/// Editor bookkeeping shared by the orchestrators: open project, tabs,
/// loaded/active tab, restore flag, save status.
///
/// The lock is only held for synchronous sections, never across an await,
/// so every update here is visible before the caller's next suspension point.
#[derive(Default)]
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Project ──────────────────────────────────────────────────

    pub fn open_project(&self, path: impl AsRef<Path>, mut tabs: Vec<Tab>) {
        tabs.sort_by_key(|t| t.order);
        *self.lock() = SessionState {
            project: Some(path.as_ref().to_path_buf()),
            tabs,
            ..SessionState::default()
        };
    }

    pub fn close_project(&self) {
        *self.lock() = SessionState::default();
    }

    pub fn project(&self) -> Option<PathBuf> {
        self.lock().project.clone()
    }

    // ── Tabs ─────────────────────────────────────────────────────

    pub fn tabs(&self) -> Vec<Tab> {
        self.lock().tabs.clone()
    }

    pub fn tab(&self, tab_id: &str) -> Option<Tab> {
        self.lock().tabs.iter().find(|t| t.id == tab_id).cloned()
    }

    /// Insert or replace a tab, keeping tab order.
    pub fn upsert_tab(&self, tab: Tab) {
        let mut state = self.lock();
        match state.tab_mut(&tab.id) {
            Some(existing) => *existing = tab,
            None => {
                state.tabs.push(tab);
                state.tabs.sort_by_key(|t| t.order);
            }
        }
    }

    pub fn active_tab_id(&self) -> Option<String> {
        self.lock().active_tab.clone()
    }

    pub fn loaded_tab_id(&self) -> Option<String> {
        self.lock().loaded_tab.clone()
    }

    /// Returns the previously loaded tab.
    pub(crate) fn set_loaded_tab(&self, tab_id: &str) -> Option<String> {
        self.lock().loaded_tab.replace(tab_id.to_string())
    }

    pub(crate) fn set_active_tab(&self, tab_id: &str) {
        self.lock().active_tab = Some(tab_id.to_string());
    }

    pub(crate) fn set_tab_loading(&self, tab_id: &str, loading: bool) {
        if let Some(tab) = self.lock().tab_mut(tab_id) {
            tab.is_loading = loading;
        }
    }

    // ── Restore flag ─────────────────────────────────────────────

    pub(crate) fn begin_restore(&self) {
        self.lock().restoring = true;
    }

    pub(crate) fn finish_restore(&self) {
        self.lock().restoring = false;
    }

    pub fn is_restoring(&self) -> bool {
        self.lock().restoring
    }

    pub(crate) fn set_canvas_stale(&self, stale: bool) {
        self.lock().canvas_stale = stale;
    }

    pub fn is_canvas_stale(&self) -> bool {
        self.lock().canvas_stale
    }

    // ── Dirtiness ────────────────────────────────────────────────

    /// Edit-originated change on the canvas. Attributed to the loaded tab;
    /// ignored while a snapshot restore is replacing the graph.
    pub fn mark_dirty(&self) -> Option<String> {
        let mut state = self.lock();
        if state.restoring {
            return None;
        }
        let tab_id = state.loaded_tab.clone()?;
        state.edits += 1;
        let seq = state.edits;
        state.structure_dirty.insert(tab_id.clone(), seq);
        if let Some(tab) = state.tab_mut(&tab_id) {
            tab.has_unsaved_changes = true;
        }
        Some(tab_id)
    }

    /// Recompute `has_unsaved_changes` from the tab's live nodes.
    pub fn refresh_unsaved(&self, tab_id: &str, nodes: &[Node]) {
        self.lock().refresh_unsaved(tab_id, nodes);
    }

    /// The tab's structure was persisted. Files still dirty in `nodes` keep
    /// the tab flagged.
    pub fn mark_saved(&self, tab_id: &str, nodes: &[Node]) {
        self.mark_saved_as_of(tab_id, nodes, u64::MAX);
    }

    /// Current edit counter. A save takes it with its snapshot.
    pub fn edit_mark(&self) -> u64 {
        self.lock().edits
    }

    /// `mark_saved` for a snapshot taken at `mark`. Structural edits made
    /// after it keep the tab flagged.
    pub fn mark_saved_as_of(&self, tab_id: &str, nodes: &[Node], mark: u64) {
        let mut state = self.lock();
        if state.structure_dirty.get(tab_id).is_some_and(|&seq| seq <= mark) {
            state.structure_dirty.remove(tab_id);
        }
        state.refresh_unsaved(tab_id, nodes);
    }

    pub fn has_unsaved_changes(&self, tab_id: &str) -> bool {
        self.tab(tab_id).is_some_and(|t| t.has_unsaved_changes)
    }

    // ── Save status ──────────────────────────────────────────────

    pub fn save_status(&self) -> SaveStatus {
        if self.lock().saves_in_flight > 0 {
            SaveStatus::Saving
        } else {
            SaveStatus::Idle
        }
    }

    /// Enter the saving state until the returned guard is dropped.
    pub(crate) fn begin_save(&self) -> SavingGuard<'_> {
        self.lock().saves_in_flight += 1;
        SavingGuard { session: self }
    }

    // ── Name index ───────────────────────────────────────────────

    pub fn index_names(&self, tab_id: &str, nodes: &[Node], schemas: &SchemaCatalog) {
        let names = nodes
            .iter()
            .map(|n| display_name(Some(n), schemas))
            .collect();
        self.lock().names.insert(tab_id.to_string(), names);
    }

    pub fn names(&self, tab_id: &str) -> Vec<String> {
        self.lock().names.get(tab_id).cloned().unwrap_or_default()
    }

    /// Tabs (other than `except_tab`) already using `name` for a node.
    pub fn tabs_using_name(&self, name: &str, except_tab: Option<&str>) -> Vec<String> {
        let state = self.lock();
        let mut tabs: Vec<String> = state
            .names
            .iter()
            .filter(|(tab_id, _)| Some(tab_id.as_str()) != except_tab)
            .filter(|(_, names)| names.iter().any(|n| n == name))
            .map(|(tab_id, _)| tab_id.clone())
            .collect();
        tabs.sort();
        tabs
    }
}

/// Leaves the saving state on drop, on every exit path.
pub(crate) struct SavingGuard<'a> {
    session: &'a Session,
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.lock();
        state.saves_in_flight = state.saves_in_flight.saturating_sub(1);
    }
}
