pub mod canvas;
pub mod changes;
pub mod echo;
pub mod notify;
pub mod save;
pub mod session;
pub mod subscriptions;
pub mod tabs;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::flows::cache::FlowSnapshotCache;
use crate::flows::repository::ProjectStore;
use crate::flows::schema::SchemaCatalog;
use crate::flows::FileSaveState;
use canvas::Canvas;
use changes::ChangeSource;
use echo::OwnWriteSuppressor;
use notify::Notifier;
use save::{ProjectSaver, SaveError, SaveReport};
use session::Session;
use subscriptions::FileSubscriptions;
use tabs::{SwitchOutcome, TabSwitcher};

/// One editor window: the open project, its tabs, the live canvas and the
/// file subscriptions of its nodes.
pub struct Studio {
    session: Arc<Session>,
    cache: Arc<FlowSnapshotCache>,
    store: Arc<dyn ProjectStore>,
    canvas: Arc<dyn Canvas>,
    schemas: Arc<SchemaCatalog>,
    suppressor: Arc<OwnWriteSuppressor>,
    switcher: TabSwitcher,
    saver: ProjectSaver,
    subscriptions: FileSubscriptions,
}

impl Studio {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        canvas: Arc<dyn Canvas>,
        notifier: Arc<dyn Notifier>,
        source: Arc<dyn ChangeSource>,
        schemas: Arc<SchemaCatalog>,
        echo_window_ms: i64,
    ) -> Self {
        let session = Arc::new(Session::new());
        let cache = Arc::new(FlowSnapshotCache::new());
        let suppressor = Arc::new(OwnWriteSuppressor::new(echo_window_ms));

        let saver = ProjectSaver::new(
            session.clone(),
            cache.clone(),
            store.clone(),
            canvas.clone(),
            suppressor.clone(),
            notifier,
        );
        let subscriptions = FileSubscriptions::new(
            source,
            store.clone(),
            canvas.clone(),
            session.clone(),
            suppressor.clone(),
            schemas.clone(),
        );
        let switcher = TabSwitcher::new(
            session.clone(),
            cache.clone(),
            store.clone(),
            canvas.clone(),
            schemas.clone(),
        )
        .with_subscriptions(subscriptions.clone());

        Self {
            session,
            cache,
            store,
            canvas,
            schemas,
            suppressor,
            switcher,
            saver,
            subscriptions,
        }
    }

    /// Open `path` and load its first tab. Returns `None` when the project
    /// has no tabs yet.
    pub async fn open_project(&self, path: impl AsRef<Path>) -> Result<Option<SwitchOutcome>> {
        let path = path.as_ref();
        let tabs = self
            .store
            .list_tabs(path)
            .await
            .with_context(|| format!("failed to list tabs of {}", path.display()))?;

        self.close_project();
        let first = tabs.iter().min_by_key(|t| t.order).map(|t| t.id.clone());
        tracing::info!(project = %path.display(), tabs = tabs.len(), "opened project");
        self.session.open_project(path, tabs);

        match first {
            Some(tab_id) => Ok(Some(self.switch_to(&tab_id).await)),
            None => Ok(None),
        }
    }

    pub fn close_project(&self) {
        self.subscriptions.unwatch_all();
        self.cache.clear();
        self.canvas.clear_canvas();
        self.session.close_project();
    }

    pub async fn switch_to(&self, tab_id: &str) -> SwitchOutcome {
        self.switcher.switch_to(tab_id).await
    }

    pub async fn save_current_project(&self) -> Result<SaveReport, SaveError> {
        self.saver.save_current_project().await
    }

    /// Hook for user edits of the graph structure.
    pub fn mark_dirty(&self) -> Option<String> {
        self.session.mark_dirty()
    }

    /// Apply an editor keystroke batch to a node's file-backed field.
    /// Returns `false` if the node is missing or has no backing file.
    pub fn edit_node_file(&self, node_id: &str, content: &str) -> bool {
        let schemas = &self.schemas;
        let mut edited = false;
        self.canvas.update_node(node_id, &mut |node| {
            let Some(path) = schemas.file_path_of(node).map(String::from) else {
                return;
            };
            let editor = schemas.editor(&node.node_type);
            let original = editor
                .and_then(|e| node.config_str(&e.content_key))
                .unwrap_or_default()
                .to_string();
            if let Some(editor) = editor {
                node.data
                    .config
                    .insert(editor.content_key.clone(), Value::String(content.to_string()));
            }
            node.data
                .file_save_state
                .get_or_insert_with(|| FileSaveState::clean(path, original))
                .edit(content.to_string());
            edited = true;
        });

        if edited {
            if let (Some(tab_id), Some(flow)) = (self.session.loaded_tab_id(), self.canvas.save_flow()) {
                self.session.refresh_unsaved(&tab_id, &flow.nodes);
            }
        }
        edited
    }

    /// Reconcile file subscriptions with the set of expanded nodes.
    pub fn set_expanded(&self, expanded: &HashSet<String>) {
        let nodes = self.canvas.save_flow().map(|f| f.nodes).unwrap_or_default();
        self.subscriptions.sync_with_nodes(&nodes, expanded);
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<FlowSnapshotCache> {
        &self.cache
    }

    pub fn subscriptions(&self) -> &FileSubscriptions {
        &self.subscriptions
    }

    pub fn suppressor(&self) -> &Arc<OwnWriteSuppressor> {
        &self.suppressor
    }

    pub fn schemas(&self) -> &Arc<SchemaCatalog> {
        &self.schemas
    }
}
