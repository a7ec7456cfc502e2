use std::collections::HashSet;
use std::sync::Arc;

use super::canvas::Canvas;
use super::echo::OwnWriteSuppressor;
use super::notify::{Notice, NoticeLevel, Notifier};
use super::session::Session;
use crate::flows::cache::FlowSnapshotCache;
use crate::flows::Node;
use crate::flows::dirty_files::{
    DirtyFileRecord, SaveOutcome, clear_dirty_states_for_nodes, collect_dirty_files,
    save_all_dirty_files,
};
use crate::flows::repository::ProjectStore;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error("no project is open")]
    NoProject,

    #[error("no tab is active")]
    NoActiveTab,

    #[error("canvas has no flow to save")]
    EmptyCanvas,

    #[error("canvas does not show the active tab")]
    StaleCanvas,

    #[error("store rejected the flow")]
    Rejected,

    #[error("{0}")]
    Store(String),
}

impl SaveError {
    /// Rejected before anything was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SaveError::NoProject
                | SaveError::NoActiveTab
                | SaveError::EmptyCanvas
                | SaveError::StaleCanvas
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    /// Structure and every dirty file were written.
    Complete,
    /// Structure was written; some files failed.
    WithFileErrors,
    /// Structure was written; there were no dirty files.
    NoFiles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub tab_id: String,
    pub kind: SaveKind,
    pub files: SaveOutcome,
    pub message: String,
}

/// Saves the active tab: dirty node files first, then the graph structure.
pub struct ProjectSaver {
    session: Arc<Session>,
    cache: Arc<FlowSnapshotCache>,
    store: Arc<dyn ProjectStore>,
    canvas: Arc<dyn Canvas>,
    suppressor: Arc<OwnWriteSuppressor>,
    notifier: Arc<dyn Notifier>,
}

impl ProjectSaver {
    pub fn new(
        session: Arc<Session>,
        cache: Arc<FlowSnapshotCache>,
        store: Arc<dyn ProjectStore>,
        canvas: Arc<dyn Canvas>,
        suppressor: Arc<OwnWriteSuppressor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session,
            cache,
            store,
            canvas,
            suppressor,
            notifier,
        }
    }

    pub async fn save_current_project(&self) -> Result<SaveReport, SaveError> {
        let notice_id = format!("save-project-{}", uuid::Uuid::new_v4());

        let (project, tab_id) = match (self.session.project(), self.session.active_tab_id()) {
            (Some(project), Some(tab_id)) => (project, tab_id),
            (None, _) => return Err(self.fail(&notice_id, SaveError::NoProject)),
            (Some(_), None) => return Err(self.fail(&notice_id, SaveError::NoActiveTab)),
        };
        if self.session.is_canvas_stale() {
            return Err(self.fail(&notice_id, SaveError::StaleCanvas));
        }

        let _saving = self.session.begin_save();
        self.notifier
            .notify(Notice::new(NoticeLevel::Loading, "Saving project…").with_id(&notice_id));

        let Some(mut snapshot) = self.canvas.save_flow() else {
            return Err(self.fail(&notice_id, SaveError::EmptyCanvas));
        };
        let edit_mark = self.session.edit_mark();

        let records = collect_dirty_files(&snapshot.nodes);
        let files = if records.is_empty() {
            SaveOutcome::default()
        } else {
            let outcome =
                save_all_dirty_files(&*self.store, &self.suppressor, &project, &records).await;
            let saved = outcome.successful_node_ids();
            if !saved.is_empty() {
                snapshot.nodes = clear_dirty_states_for_nodes(&snapshot.nodes, &saved);
                self.settle_written_files(&tab_id, &records, &saved);
            }
            outcome
        };

        let name = self.session.tab(&tab_id).map(|t| t.name);
        // Files written above stay written whatever happens here.
        match self
            .store
            .save_tab_flow(&project, &tab_id, &snapshot, name.as_deref())
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(self.fail(&notice_id, SaveError::Rejected)),
            Err(e) => return Err(self.fail(&notice_id, SaveError::Store(format!("{e:#}")))),
        }

        if self.shows_tab(&tab_id) {
            let nodes = self
                .canvas
                .save_flow()
                .map(|flow| flow.nodes)
                .unwrap_or_else(|| snapshot.nodes.clone());
            self.session.mark_saved_as_of(&tab_id, &nodes, edit_mark);
            self.cache.delete(&tab_id);
        } else {
            // Switched away mid-save; the cached graph may hold newer edits.
            let nodes = self
                .cache
                .get(&tab_id)
                .map(|flow| flow.nodes)
                .unwrap_or_else(|| snapshot.nodes.clone());
            self.session.mark_saved_as_of(&tab_id, &nodes, edit_mark);
        }

        let (kind, level, message) = if files.total_files == 0 {
            (SaveKind::NoFiles, NoticeLevel::Success, "Project saved".to_string())
        } else if files.error_count == 0 {
            (
                SaveKind::Complete,
                NoticeLevel::Success,
                format!("Project saved ({} files)", files.success_count),
            )
        } else {
            (
                SaveKind::WithFileErrors,
                NoticeLevel::Warning,
                format!(
                    "Project saved, but {} of {} files failed to save",
                    files.error_count, files.total_files
                ),
            )
        };

        tracing::info!(
            tab_id = %tab_id,
            files = files.total_files,
            failed = files.error_count,
            "saved project"
        );
        self.notifier
            .notify(Notice::new(level, message.clone()).with_id(&notice_id));

        Ok(SaveReport {
            tab_id,
            kind,
            files,
            message,
        })
    }

    fn shows_tab(&self, tab_id: &str) -> bool {
        self.session.loaded_tab_id().as_deref() == Some(tab_id) && !self.session.is_canvas_stale()
    }

    /// Move the saved marker of each written file to the content that was
    /// written. Text typed during the write stays dirty. When the canvas moved
    /// to another tab meanwhile, the tab's cached graph is settled instead.
    fn settle_written_files(
        &self,
        tab_id: &str,
        records: &[DirtyFileRecord],
        saved: &HashSet<String>,
    ) {
        let written: Vec<&DirtyFileRecord> = records
            .iter()
            .filter(|r| saved.contains(&r.node_id))
            .collect();

        if self.shows_tab(tab_id) {
            for record in &written {
                self.canvas
                    .update_node(&record.node_id, &mut |node| confirm_written(node, record));
            }
            return;
        }

        let Some(mut cached) = self.cache.get(tab_id) else {
            tracing::debug!(tab_id = %tab_id, "saved tab is no longer on the canvas");
            return;
        };
        for record in &written {
            if let Some(node) = cached.nodes.iter_mut().find(|n| n.id == record.node_id) {
                confirm_written(node, record);
            }
        }
        self.cache.set(tab_id, cached);
    }

    fn fail(&self, notice_id: &str, error: SaveError) -> SaveError {
        let message = if error.is_validation() {
            format!("Cannot save: {error}")
        } else {
            tracing::error!(error = %error, "failed to save project");
            format!("Failed to save project: {error}")
        };
        self.notifier
            .notify(Notice::new(NoticeLevel::Error, message).with_id(notice_id));
        error
    }
}

fn confirm_written(node: &mut Node, record: &DirtyFileRecord) {
    if let Some(state) = node.data.file_save_state.as_mut() {
        if state.file_path == record.file_path {
            state.confirm_written(&record.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::canvas::MemoryCanvas;
    use crate::editor::session::SaveStatus;
    use crate::flows::repository::FileContent;
    use crate::flows::{FileSaveState, FlowSnapshot, Node, NodeData, Position, Tab};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockStore {
        failing_files: Vec<String>,
        flow_result: Option<bool>,
        flow_error: Option<String>,
        saved_flows: StdMutex<Vec<(PathBuf, String, FlowSnapshot, Option<String>)>>,
        written: StdMutex<Vec<(String, String)>>,
        /// Runs while a file write is in flight.
        during_write: StdMutex<Option<Box<dyn FnMut() + Send>>>,
    }

    #[async_trait]
    impl ProjectStore for MockStore {
        async fn list_tabs(&self, _project: &Path) -> Result<Vec<Tab>> {
            Ok(vec![])
        }
        async fn load_tab_flow(&self, _project: &Path, _tab_id: &str) -> Result<Option<FlowSnapshot>> {
            Ok(None)
        }
        async fn save_tab_flow(
            &self,
            project: &Path,
            tab_id: &str,
            snapshot: &FlowSnapshot,
            name: Option<&str>,
        ) -> Result<bool> {
            if let Some(e) = &self.flow_error {
                bail!("{e}");
            }
            self.saved_flows.lock().unwrap().push((
                project.to_path_buf(),
                tab_id.to_string(),
                snapshot.clone(),
                name.map(String::from),
            ));
            Ok(self.flow_result.unwrap_or(true))
        }
        async fn read_file(&self, _project: &Path, _path: &str) -> Result<FileContent> {
            bail!("not used")
        }
        async fn write_file(&self, _project: &Path, path: &str, content: &str) -> Result<()> {
            if self.failing_files.iter().any(|f| f == path) {
                bail!("permission denied");
            }
            if let Some(hook) = self.during_write.lock().unwrap().as_mut() {
                hook();
            }
            self.written
                .lock()
                .unwrap()
                .push((path.to_string(), content.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: StdMutex<Vec<Notice>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    impl RecordingNotifier {
        fn last(&self) -> Notice {
            self.notices.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct Fixture {
        session: Arc<Session>,
        cache: Arc<FlowSnapshotCache>,
        store: Arc<MockStore>,
        canvas: Arc<MemoryCanvas>,
        notifier: Arc<RecordingNotifier>,
        suppressor: Arc<OwnWriteSuppressor>,
        saver: ProjectSaver,
    }

    fn file_node(id: &str, path: &str, content: &str) -> Node {
        let mut fs = FileSaveState::clean(path, "");
        fs.edit(content.to_string());
        Node {
            id: id.to_string(),
            node_type: "python".to_string(),
            position: Position { x: 0.0, y: 0.0 },
            data: NodeData {
                config: serde_json::Map::new(),
                file_save_state: Some(fs),
            },
        }
    }

    fn clean_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "trigger".to_string(),
            position: Position { x: 0.0, y: 0.0 },
            data: NodeData::default(),
        }
    }

    fn fixture(store: MockStore, nodes: Option<Vec<Node>>) -> Fixture {
        let session = Arc::new(Session::new());
        session.open_project("/p", vec![Tab::new("t1", "Main Flow", 0)]);
        session.set_loaded_tab("t1");
        session.set_active_tab("t1");

        let cache = Arc::new(FlowSnapshotCache::new());
        let store = Arc::new(store);
        let canvas = Arc::new(match nodes {
            Some(nodes) => MemoryCanvas::with_flow(FlowSnapshot {
                nodes,
                ..FlowSnapshot::empty()
            }),
            None => MemoryCanvas::new(),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let suppressor = Arc::new(OwnWriteSuppressor::default());
        let saver = ProjectSaver::new(
            session.clone(),
            cache.clone(),
            store.clone(),
            canvas.clone(),
            suppressor.clone(),
            notifier.clone(),
        );
        Fixture {
            session,
            cache,
            store,
            canvas,
            notifier,
            suppressor,
            saver,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_save() {
        let f = fixture(
            MockStore::default(),
            Some(vec![file_node("n1", "a.py", "x"), clean_node("n2")]),
        );
        f.session.mark_dirty();
        f.cache.set("t1", FlowSnapshot::empty());

        let report = f.saver.save_current_project().await.unwrap();
        assert_eq!(report.kind, SaveKind::Complete);
        assert_eq!(report.message, "Project saved (1 files)");
        assert_eq!(
            *f.store.written.lock().unwrap(),
            vec![("a.py".to_string(), "x".to_string())]
        );

        // Dirty flag cleared on the live canvas.
        assert!(!f.canvas.node("n1").unwrap().has_dirty_file());

        let saved = f.store.saved_flows.lock().unwrap();
        let (project, tab_id, snapshot, name) = &saved[0];
        assert_eq!(project, Path::new("/p"));
        assert_eq!(tab_id, "t1");
        assert_eq!(name.as_deref(), Some("Main Flow"));
        let ids: Vec<_> = snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert!(!snapshot.nodes[0].has_dirty_file());

        assert!(f.cache.get("t1").is_none());
        assert!(!f.session.has_unsaved_changes("t1"));
        assert_eq!(f.session.save_status(), SaveStatus::Idle);
        assert!(f.suppressor.last_own_save("a.py").is_some());

        let last = f.notifier.last();
        assert_eq!(last.level, NoticeLevel::Success);
        assert_eq!(last.message, "Project saved (1 files)");
    }

    #[tokio::test]
    async fn test_loading_notice_replaced_in_place() {
        let f = fixture(MockStore::default(), Some(vec![clean_node("n1")]));
        f.saver.save_current_project().await.unwrap();

        let notices = f.notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].level, NoticeLevel::Loading);
        assert_eq!(notices[0].id, notices[1].id);
        assert_eq!(notices[1].message, "Project saved");
    }

    #[tokio::test]
    async fn test_no_dirty_files() {
        let f = fixture(MockStore::default(), Some(vec![clean_node("n1")]));
        let report = f.saver.save_current_project().await.unwrap();
        assert_eq!(report.kind, SaveKind::NoFiles);
        assert_eq!(report.files.total_files, 0);
        assert!(f.store.written.lock().unwrap().is_empty());
        assert_eq!(f.store.saved_flows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_file_failure() {
        let f = fixture(
            MockStore {
                failing_files: vec!["b.py".to_string()],
                ..MockStore::default()
            },
            Some(vec![file_node("n1", "a.py", "x"), file_node("n2", "b.py", "y")]),
        );

        let report = f.saver.save_current_project().await.unwrap();
        assert_eq!(report.kind, SaveKind::WithFileErrors);
        assert_eq!(report.files.success_count, 1);
        assert_eq!(report.files.error_count, 1);
        assert!(!f.canvas.node("n1").unwrap().has_dirty_file());
        assert!(f.canvas.node("n2").unwrap().has_dirty_file());

        // The structure save still happened and the failed file keeps the tab flagged.
        assert_eq!(f.store.saved_flows.lock().unwrap().len(), 1);
        assert!(f.session.has_unsaved_changes("t1"));
        assert_eq!(f.notifier.last().level, NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn test_structure_save_error_keeps_cache_and_files() {
        let f = fixture(
            MockStore {
                flow_error: Some("connection reset".to_string()),
                ..MockStore::default()
            },
            Some(vec![file_node("n1", "a.py", "x")]),
        );
        f.cache.set("t1", FlowSnapshot::empty());

        let err = f.saver.save_current_project().await.unwrap_err();
        assert_eq!(err, SaveError::Store("connection reset".to_string()));
        assert!(f.cache.contains("t1"));
        // Not rolled back.
        assert_eq!(f.store.written.lock().unwrap().len(), 1);
        assert!(!f.canvas.node("n1").unwrap().has_dirty_file());
        assert_eq!(f.session.save_status(), SaveStatus::Idle);

        let last = f.notifier.last();
        assert_eq!(last.level, NoticeLevel::Error);
        assert_eq!(last.message, "Failed to save project: connection reset");
    }

    #[tokio::test]
    async fn test_structure_save_rejected() {
        let f = fixture(
            MockStore {
                flow_result: Some(false),
                ..MockStore::default()
            },
            Some(vec![clean_node("n1")]),
        );
        f.cache.set("t1", FlowSnapshot::empty());
        assert_eq!(f.saver.save_current_project().await, Err(SaveError::Rejected));
        assert!(f.cache.contains("t1"));
        assert_eq!(f.session.save_status(), SaveStatus::Idle);
    }

    #[tokio::test]
    async fn test_validation_without_project() {
        let f = fixture(MockStore::default(), Some(vec![clean_node("n1")]));
        f.session.close_project();

        assert_eq!(f.saver.save_current_project().await, Err(SaveError::NoProject));
        assert!(f.store.saved_flows.lock().unwrap().is_empty());
        let notices = f.notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_validation_without_active_tab() {
        let f = fixture(MockStore::default(), Some(vec![clean_node("n1")]));
        f.session.open_project("/p", vec![]);
        assert_eq!(f.saver.save_current_project().await, Err(SaveError::NoActiveTab));
    }

    #[tokio::test]
    async fn test_empty_canvas() {
        let f = fixture(MockStore::default(), None);
        assert_eq!(f.saver.save_current_project().await, Err(SaveError::EmptyCanvas));
        assert_eq!(f.session.save_status(), SaveStatus::Idle);
        assert!(f.store.saved_flows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_canvas_refuses_save() {
        let f = fixture(MockStore::default(), Some(vec![file_node("n1", "a.py", "x")]));
        f.session.set_canvas_stale(true);

        assert_eq!(f.saver.save_current_project().await, Err(SaveError::StaleCanvas));
        assert!(SaveError::StaleCanvas.is_validation());
        assert!(f.store.written.lock().unwrap().is_empty());
        assert!(f.store.saved_flows.lock().unwrap().is_empty());
        assert_eq!(f.session.save_status(), SaveStatus::Idle);

        let notices = f.notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, "Cannot save: canvas does not show the active tab");
    }

    #[tokio::test]
    async fn test_edit_during_write_stays_dirty() {
        let f = fixture(MockStore::default(), Some(vec![file_node("n1", "a.py", "x")]));
        let canvas = f.canvas.clone();
        *f.store.during_write.lock().unwrap() = Some(Box::new(move || {
            canvas.update_node("n1", &mut |node| {
                if let Some(fs) = node.data.file_save_state.as_mut() {
                    fs.edit("typed during save".to_string());
                }
            });
        }));

        let report = f.saver.save_current_project().await.unwrap();
        assert_eq!(report.kind, SaveKind::Complete);
        assert_eq!(
            *f.store.written.lock().unwrap(),
            vec![("a.py".to_string(), "x".to_string())]
        );

        let fs = f.canvas.node("n1").unwrap().data.file_save_state.unwrap();
        assert_eq!(fs.content, "typed during save");
        assert_eq!(fs.saved_content, "x");
        assert!(fs.is_dirty);
        assert!(f.session.has_unsaved_changes("t1"));

        // The persisted graph holds what reached disk.
        let saved = f.store.saved_flows.lock().unwrap();
        let persisted = saved[0].2.nodes[0].data.file_save_state.clone().unwrap();
        assert_eq!(persisted.content, "x");
        assert!(!persisted.is_dirty);
    }

    #[tokio::test]
    async fn test_structural_edit_during_save_keeps_tab_flagged() {
        let f = fixture(MockStore::default(), Some(vec![file_node("n1", "a.py", "x")]));
        f.session.mark_dirty();
        let session = f.session.clone();
        *f.store.during_write.lock().unwrap() = Some(Box::new(move || {
            session.mark_dirty();
        }));

        f.saver.save_current_project().await.unwrap();
        assert!(!f.canvas.node("n1").unwrap().has_dirty_file());
        assert!(f.session.has_unsaved_changes("t1"));
    }

    #[tokio::test]
    async fn test_switch_during_write_settles_cached_tab() {
        let f = fixture(MockStore::default(), Some(vec![file_node("n1", "a.py", "x")]));
        let (canvas, session, cache) = (f.canvas.clone(), f.session.clone(), f.cache.clone());
        *f.store.during_write.lock().unwrap() = Some(Box::new(move || {
            if let Some(current) = canvas.save_flow() {
                cache.set("t1", current);
            }
            session.set_loaded_tab("t2");
            session.set_active_tab("t2");
            canvas.restore_flow(FlowSnapshot {
                nodes: vec![file_node("n1", "b.py", "other tab")],
                ..FlowSnapshot::empty()
            });
        }));

        let report = f.saver.save_current_project().await.unwrap();
        assert_eq!(report.tab_id, "t1");

        // The other tab's node shares the id but is left alone.
        let on_canvas = f.canvas.node("n1").unwrap().data.file_save_state.unwrap();
        assert_eq!(on_canvas.file_path, "b.py");
        assert_eq!(on_canvas.content, "other tab");
        assert!(on_canvas.is_dirty);

        let cached = f.cache.get("t1").unwrap();
        let fs = cached.nodes[0].data.file_save_state.clone().unwrap();
        assert_eq!(fs.saved_content, "x");
        assert!(!fs.is_dirty);
        assert!(!f.session.has_unsaved_changes("t1"));
    }
}
