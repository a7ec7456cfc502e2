use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};

use super::canvas::Canvas;
use super::changes::{ChangeSource, ChangeType, FileChangeEvent};
use super::echo::OwnWriteSuppressor;
use super::session::Session;
use crate::flows::file_repository::canonical_path;
use crate::flows::repository::ProjectStore;
use crate::flows::schema::SchemaCatalog;
use crate::flows::{FileSaveState, Node};

/// What happened to a delivered change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDisposition {
    /// Content was re-read and applied to the node.
    Reloaded,
    Ignored(IgnoreReason),
    /// Reading the file failed; the node was left untouched.
    ReloadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The node has no live subscription for this path (collapsed, removed
    /// or re-pointed at another file).
    Collapsed,
    NoProject,
    Deleted,
    /// Echo of one of our own writes.
    OwnWrite,
    /// The node is no longer on the canvas.
    NodeMissing,
    /// The canvas moved to another tab than the one the subscription was
    /// made for.
    TabChanged,
}

struct ActiveSubscription {
    /// Canonical project-relative path.
    file_path: String,
    /// Tab loaded when the subscription was made.
    tab_id: Option<String>,
    shutdown: oneshot::Sender<()>,
}

struct Inner {
    source: Arc<dyn ChangeSource>,
    store: Arc<dyn ProjectStore>,
    canvas: Arc<dyn Canvas>,
    session: Arc<Session>,
    suppressor: Arc<OwnWriteSuppressor>,
    schemas: Arc<SchemaCatalog>,
    active: Mutex<HashMap<String, ActiveSubscription>>,
}

/// Keeps one change subscription per expanded code-bearing node and pulls
/// external edits of its file into the node.
///
/// Subscribing never fetches content; only later change events do. Must be
/// used from within a tokio runtime: each subscription runs as a task.
#[derive(Clone)]
pub struct FileSubscriptions {
    inner: Arc<Inner>,
}

impl FileSubscriptions {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn ProjectStore>,
        canvas: Arc<dyn Canvas>,
        session: Arc<Session>,
        suppressor: Arc<OwnWriteSuppressor>,
        schemas: Arc<SchemaCatalog>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                canvas,
                session,
                suppressor,
                schemas,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveSubscription>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Subscription lifecycle ───────────────────────────────────

    /// Ensure `node_id` (expanded) listens to `file_path`. Returns `true`
    /// when a new subscription was established.
    pub fn watch_node(&self, node_id: &str, file_path: &str) -> bool {
        let file_path = canonical_path(file_path);
        let file_path = file_path.as_str();
        let tab_id = self.inner.session.loaded_tab_id();
        let mut active = self.active();
        if active
            .get(node_id)
            .is_some_and(|sub| sub.file_path == file_path && sub.tab_id == tab_id)
        {
            return false;
        }
        if let Some(old) = active.remove(node_id) {
            stop(old);
        }

        let rx = self.inner.source.subscribe(file_path);
        let (shutdown, shutdown_rx) = oneshot::channel();
        tokio::spawn(run_subscription(
            Arc::downgrade(&self.inner),
            node_id.to_string(),
            file_path.to_string(),
            rx,
            shutdown_rx,
        ));

        tracing::debug!(node_id, path = file_path, "subscribed to file changes");
        active.insert(
            node_id.to_string(),
            ActiveSubscription {
                file_path: file_path.to_string(),
                tab_id,
                shutdown,
            },
        );
        true
    }

    /// Tear down the node's subscription (collapsed or removed).
    pub fn unwatch_node(&self, node_id: &str) -> bool {
        match self.active().remove(node_id) {
            Some(sub) => {
                tracing::debug!(node_id, path = %sub.file_path, "unsubscribed from file changes");
                stop(sub);
                true
            }
            None => false,
        }
    }

    pub fn unwatch_all(&self) {
        for (_, sub) in self.active().drain() {
            stop(sub);
        }
    }

    /// Drop subscriptions of nodes that are no longer part of `nodes`.
    pub fn retain_nodes(&self, nodes: &[Node]) {
        let live: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut active = self.active();
        let gone: Vec<String> = active
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        for node_id in gone {
            if let Some(sub) = active.remove(&node_id) {
                stop(sub);
            }
        }
    }

    /// Reconcile with the live graph: every expanded node with an editor
    /// file gets exactly one subscription, everything else gets none.
    pub fn sync_with_nodes(&self, nodes: &[Node], expanded: &HashSet<String>) {
        let mut wanted: HashMap<&str, &str> = HashMap::new();
        for node in nodes {
            if !expanded.contains(&node.id) {
                continue;
            }
            if let Some(path) = self.inner.schemas.file_path_of(node) {
                wanted.insert(node.id.as_str(), path);
            }
        }

        let stale: Vec<String> = self
            .active()
            .keys()
            .filter(|id| !wanted.contains_key(id.as_str()))
            .cloned()
            .collect();
        for node_id in stale {
            self.unwatch_node(&node_id);
        }
        for (node_id, path) in wanted {
            self.watch_node(node_id, path);
        }
    }

    pub fn watched_path(&self, node_id: &str) -> Option<String> {
        self.active().get(node_id).map(|sub| sub.file_path.clone())
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    // ── Event handling ───────────────────────────────────────────

    /// Apply one delivered change event to `node_id`.
    pub async fn handle_change(&self, node_id: &str, event: FileChangeEvent) -> ChangeDisposition {
        let path = canonical_path(&event.file_path);
        let path = path.as_str();

        let Some(tab_id) = self
            .active()
            .get(node_id)
            .filter(|sub| sub.file_path == path)
            .map(|sub| sub.tab_id.clone())
        else {
            return ChangeDisposition::Ignored(IgnoreReason::Collapsed);
        };
        let Some(project) = self.inner.session.project() else {
            return ChangeDisposition::Ignored(IgnoreReason::NoProject);
        };
        if self.inner.session.loaded_tab_id() != tab_id {
            return ChangeDisposition::Ignored(IgnoreReason::TabChanged);
        }
        if event.change_type == ChangeType::Deleted {
            return ChangeDisposition::Ignored(IgnoreReason::Deleted);
        }
        if self.inner.suppressor.should_suppress(path, &event) {
            tracing::trace!(node_id, path, "skipping own write");
            return ChangeDisposition::Ignored(IgnoreReason::OwnWrite);
        }

        let content = match self.inner.store.read_file(&project, path).await {
            Ok(file) => file.content,
            Err(e) => {
                tracing::warn!(node_id, path, error = %e, "failed to reload changed file");
                return ChangeDisposition::ReloadFailed;
            }
        };

        // The read suspended: a tab switch or collapse may have happened.
        if !self.still_current(node_id, path, &tab_id) {
            tracing::debug!(node_id, path, "dropping reload, subscription went away during read");
            return ChangeDisposition::Ignored(IgnoreReason::TabChanged);
        }

        let schemas = &self.inner.schemas;
        let mut matched = false;
        let found = self.inner.canvas.update_node(node_id, &mut |node| {
            if schemas.file_path_of(node).map(canonical_path).as_deref() != Some(path) {
                return;
            }
            matched = true;
            // Config and saved-content marker change in the same mutation.
            if let Some(editor) = schemas.editor(&node.node_type) {
                node.data
                    .config
                    .insert(editor.content_key.clone(), Value::String(content.clone()));
            }
            node.data
                .file_save_state
                .get_or_insert_with(|| FileSaveState::clean(path, ""))
                .accept_external(content.clone());
        });
        if !found {
            return ChangeDisposition::Ignored(IgnoreReason::NodeMissing);
        }
        if !matched {
            return ChangeDisposition::Ignored(IgnoreReason::Collapsed);
        }

        self.refresh_loaded_tab();
        tracing::info!(node_id, path, "reloaded externally changed file");
        ChangeDisposition::Reloaded
    }

    fn still_current(&self, node_id: &str, path: &str, tab_id: &Option<String>) -> bool {
        let watched = self
            .active()
            .get(node_id)
            .is_some_and(|sub| sub.file_path == path && sub.tab_id == *tab_id);
        watched && self.inner.session.loaded_tab_id() == *tab_id
    }

    // ── Own saves ────────────────────────────────────────────────

    /// Record that we are about to write `path` ourselves.
    pub fn mark_save_timestamp(&self, path: &str) {
        self.inner.suppressor.mark_own_save(path);
    }

    /// Save one node's file from the editor. Returns `false` when the node
    /// has nothing to save.
    pub async fn save_node_file(&self, node_id: &str) -> Result<bool> {
        let Some(project) = self.inner.session.project() else {
            bail!("no project open");
        };
        let Some(fs) = self
            .inner
            .canvas
            .save_flow()
            .and_then(|flow| flow.node(node_id).and_then(|n| n.data.file_save_state.clone()))
        else {
            return Ok(false);
        };
        if !fs.is_dirty {
            return Ok(false);
        }

        self.mark_save_timestamp(&fs.file_path);
        self.inner
            .store
            .write_file(&project, &fs.file_path, &fs.content)
            .await
            .with_context(|| format!("failed to save {}", fs.file_path))?;

        self.inner.canvas.update_node(node_id, &mut |node| {
            if let Some(state) = node.data.file_save_state.as_mut() {
                state.confirm_written(&fs.content);
            }
        });
        self.refresh_loaded_tab();
        Ok(true)
    }

    fn refresh_loaded_tab(&self) {
        let session = &self.inner.session;
        if let (Some(tab_id), Some(flow)) = (session.loaded_tab_id(), self.inner.canvas.save_flow()) {
            session.refresh_unsaved(&tab_id, &flow.nodes);
        }
    }
}

fn stop(sub: ActiveSubscription) {
    // Err means the task already exited.
    let _ = sub.shutdown.send(());
}

async fn run_subscription(
    inner: Weak<Inner>,
    node_id: String,
    file_path: String,
    mut rx: broadcast::Receiver<FileChangeEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            received = rx.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(node_id = %node_id, skipped = n, "file change subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let subscriptions = FileSubscriptions { inner };
        let disposition = subscriptions.handle_change(&node_id, event).await;
        tracing::trace!(node_id = %node_id, ?disposition, "handled file change");
    }

    drop(rx);
    if let Some(inner) = inner.upgrade() {
        inner.source.unsubscribe(&file_path);
    }
}
