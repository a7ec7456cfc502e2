use std::sync::Arc;

use super::canvas::Canvas;
use super::session::Session;
use super::subscriptions::FileSubscriptions;
use crate::flows::FlowSnapshot;
use crate::flows::cache::FlowSnapshotCache;
use crate::flows::repository::ProjectStore;
use crate::flows::schema::SchemaCatalog;

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    /// The target was already loaded; nothing happened.
    Unchanged,
    /// The target's graph is on the canvas.
    Restored { from_cache: bool },
    /// The target has never been saved; the canvas was cleared.
    Empty,
    /// The target could not be loaded. The tab is active but the canvas
    /// still shows the previous graph, and saving is refused until a later
    /// switch succeeds.
    Stale,
}

/// Moves the live graph between tabs.
pub struct TabSwitcher {
    session: Arc<Session>,
    cache: Arc<FlowSnapshotCache>,
    store: Arc<dyn ProjectStore>,
    canvas: Arc<dyn Canvas>,
    schemas: Arc<SchemaCatalog>,
    subscriptions: Option<FileSubscriptions>,
}

impl TabSwitcher {
    pub fn new(
        session: Arc<Session>,
        cache: Arc<FlowSnapshotCache>,
        store: Arc<dyn ProjectStore>,
        canvas: Arc<dyn Canvas>,
        schemas: Arc<SchemaCatalog>,
    ) -> Self {
        Self {
            session,
            cache,
            store,
            canvas,
            schemas,
            subscriptions: None,
        }
    }

    /// Drop these file subscriptions whenever the loaded tab changes.
    pub fn with_subscriptions(mut self, subscriptions: FileSubscriptions) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    pub async fn switch_to(&self, target: &str) -> SwitchOutcome {
        if self.session.loaded_tab_id().as_deref() == Some(target) {
            return SwitchOutcome::Unchanged;
        }

        // Everything up to the first await runs in one go, so a concurrent
        // switch can never interleave between the cache write and the
        // bookkeeping update. A stale canvas holds another tab's graph and
        // is not cached.
        if let Some(previous) = self.session.loaded_tab_id() {
            if !self.session.is_canvas_stale() {
                if let Some(live) = self.canvas.save_flow() {
                    self.cache.set(&previous, live);
                }
            }
        }
        self.session.set_loaded_tab(target);
        // Node ids are only unique within a tab.
        if let Some(subscriptions) = &self.subscriptions {
            subscriptions.unwatch_all();
        }

        let snapshot = match self.cache.get(target) {
            Some(cached) => Some((cached, true)),
            None => match self.fetch(target).await {
                Ok(Some(stored)) => Some((stored, false)),
                Ok(None) => None,
                Err(()) => {
                    self.session.set_canvas_stale(true);
                    self.session.set_active_tab(target);
                    return SwitchOutcome::Stale;
                }
            },
        };

        let outcome = match snapshot {
            Some((snapshot, from_cache)) => {
                let nodes = snapshot.nodes.clone();
                self.restore(snapshot).await;
                self.session.index_names(target, &nodes, &self.schemas);
                self.session.refresh_unsaved(target, &nodes);
                SwitchOutcome::Restored { from_cache }
            }
            None => {
                self.restore(FlowSnapshot::empty()).await;
                self.session.index_names(target, &[], &self.schemas);
                SwitchOutcome::Empty
            }
        };

        self.session.set_active_tab(target);
        tracing::debug!(tab_id = target, ?outcome, "switched tab");
        outcome
    }

    /// Load the target from the store. `Err` means the canvas must be left
    /// alone.
    async fn fetch(&self, tab_id: &str) -> Result<Option<FlowSnapshot>, ()> {
        let Some(project) = self.session.project() else {
            tracing::warn!(tab_id, "no project open, cannot load tab");
            return Err(());
        };

        self.session.set_tab_loading(tab_id, true);
        let result = self.store.load_tab_flow(&project, tab_id).await;
        self.session.set_tab_loading(tab_id, false);

        result.map_err(|e| {
            tracing::warn!(tab_id, error = %e, "failed to load tab flow, canvas left unchanged");
        })
    }

    /// Replace the canvas graph without it counting as a user edit. The
    /// restore flag outlives the call by one scheduler turn so follow-up
    /// events raised by the replace are still recognized.
    async fn restore(&self, snapshot: FlowSnapshot) {
        self.session.begin_restore();
        self.canvas.restore_flow(snapshot);
        self.session.set_canvas_stale(false);
        tokio::task::yield_now().await;
        self.session.finish_restore();
    }
}
