use std::sync::Mutex;

use crate::flows::{FlowSnapshot, Node};

/// The graph editor surface. Calls are synchronous: the canvas lives in the
/// same process and applies changes immediately.
pub trait Canvas: Send + Sync {
    /// Current live graph, or `None` when nothing is loaded.
    fn save_flow(&self) -> Option<FlowSnapshot>;
    /// Replace the live graph.
    fn restore_flow(&self, snapshot: FlowSnapshot);
    fn clear_canvas(&self);
    /// Replace the live nodes, keeping edges and viewport.
    fn set_nodes(&self, nodes: Vec<Node>);
    /// Apply `update` to one node in a single step. Returns `false` if the
    /// node is not on the canvas.
    fn update_node(&self, node_id: &str, update: &mut dyn FnMut(&mut Node)) -> bool;
}

/// Headless canvas holding the live graph in memory.
#[derive(Default)]
pub struct MemoryCanvas {
    live: Mutex<Option<FlowSnapshot>>,
}

impl MemoryCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(snapshot: FlowSnapshot) -> Self {
        Self {
            live: Mutex::new(Some(snapshot)),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.lock().as_ref()?.node(node_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<FlowSnapshot>> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Canvas for MemoryCanvas {
    fn save_flow(&self) -> Option<FlowSnapshot> {
        self.lock().clone()
    }

    fn restore_flow(&self, snapshot: FlowSnapshot) {
        *self.lock() = Some(snapshot);
    }

    fn clear_canvas(&self) {
        *self.lock() = Some(FlowSnapshot::empty());
    }

    fn set_nodes(&self, nodes: Vec<Node>) {
        let mut live = self.lock();
        match live.as_mut() {
            Some(flow) => flow.nodes = nodes,
            None => {
                *live = Some(FlowSnapshot {
                    nodes,
                    ..FlowSnapshot::empty()
                })
            }
        }
    }

    fn update_node(&self, node_id: &str, update: &mut dyn FnMut(&mut Node)) -> bool {
        let mut live = self.lock();
        let Some(node) = live
            .as_mut()
            .and_then(|flow| flow.nodes.iter_mut().find(|n| n.id == node_id))
        else {
            return false;
        };
        update(node);
        true
    }
}
