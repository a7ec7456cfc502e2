use std::collections::HashSet;
use std::path::Path;

use futures::future::join_all;
use serde::Serialize;

use super::Node;
use super::repository::ProjectStore;
use crate::editor::echo::OwnWriteSuppressor;

/// A node file with unsaved edits. Derived from the graph on every save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirtyFileRecord {
    pub node_id: String,
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSaveResult {
    pub node_id: String,
    pub file_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub total_files: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<FileSaveResult>,
}

impl SaveOutcome {
    pub fn successful_node_ids(&self) -> HashSet<String> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.node_id.clone())
            .collect()
    }
}

pub fn collect_dirty_files(nodes: &[Node]) -> Vec<DirtyFileRecord> {
    nodes
        .iter()
        .filter_map(|node| {
            let fs = node.data.file_save_state.as_ref()?;
            fs.is_dirty.then(|| DirtyFileRecord {
                node_id: node.id.clone(),
                file_path: fs.file_path.clone(),
                content: fs.content.clone(),
            })
        })
        .collect()
}

/// Write every record independently; one failure never aborts the others.
///
/// Each path is marked as an own save before its write is issued so the
/// resulting change notification is recognized as an echo.
pub async fn save_all_dirty_files(
    store: &dyn ProjectStore,
    suppressor: &OwnWriteSuppressor,
    project: &Path,
    records: &[DirtyFileRecord],
) -> SaveOutcome {
    let writes: Vec<_> = records
        .iter()
        .map(|record| {
            suppressor.mark_own_save(&record.file_path);
            async move {
                let result = store
                    .write_file(project, &record.file_path, &record.content)
                    .await;
                match result {
                    Ok(()) => {
                        tracing::debug!(node_id = %record.node_id, path = %record.file_path, "Saved node file");
                        FileSaveResult {
                            node_id: record.node_id.clone(),
                            file_path: record.file_path.clone(),
                            success: true,
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::error!(node_id = %record.node_id, path = %record.file_path, error = %e, "Failed to save node file");
                        FileSaveResult {
                            node_id: record.node_id.clone(),
                            file_path: record.file_path.clone(),
                            success: false,
                            error: Some(format!("{e:#}")),
                        }
                    }
                }
            }
        })
        .collect();

    let results = join_all(writes).await;
    let success_count = results.iter().filter(|r| r.success).count();

    SaveOutcome {
        total_files: results.len(),
        success_count,
        error_count: results.len() - success_count,
        results,
    }
}

/// Mark the files of `successful` nodes as saved. Every other node is
/// returned unchanged.
pub fn clear_dirty_states_for_nodes(nodes: &[Node], successful: &HashSet<String>) -> Vec<Node> {
    nodes
        .iter()
        .map(|node| {
            if !successful.contains(&node.id) {
                return node.clone();
            }
            let mut node = node.clone();
            if let Some(fs) = node.data.file_save_state.as_mut() {
                fs.mark_saved();
            }
            node
        })
        .collect()
}
