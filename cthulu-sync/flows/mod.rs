pub mod cache;
pub mod dirty_files;
pub mod file_repository;
pub mod graph;
pub mod repository;
pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full graph of one tab at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
}

impl FlowSnapshot {
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            viewport: Viewport::default(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    /// A non-empty string value from the node's config.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.data
            .config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn has_dirty_file(&self) -> bool {
        self.data
            .file_save_state
            .as_ref()
            .is_some_and(|fs| fs.is_dirty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_save_state: Option<FileSaveState>,
}

/// File-level edit state of a node whose schema declares an editor field.
/// Tracked independently of graph-structure dirtiness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSaveState {
    pub is_dirty: bool,
    pub file_path: String,
    pub content: String,
    /// Last content known to be on disk. Dirtiness is measured against it.
    #[serde(default)]
    pub saved_content: String,
}

impl FileSaveState {
    pub fn clean(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            is_dirty: false,
            file_path: file_path.into(),
            saved_content: content.clone(),
            content,
        }
    }

    /// Apply an edit from the editor. Typing back to the saved text is clean.
    pub fn edit(&mut self, content: String) {
        self.is_dirty = content != self.saved_content;
        self.content = content;
    }

    /// The current content was confirmed written.
    pub fn mark_saved(&mut self) {
        self.saved_content = self.content.clone();
        self.is_dirty = false;
    }

    /// `written` reached disk. Edits made since it was captured stay dirty.
    pub fn confirm_written(&mut self, written: &str) {
        self.saved_content = written.to_string();
        self.is_dirty = self.content != self.saved_content;
    }

    /// Content reloaded from disk replaces both the buffer and the marker.
    pub fn accept_external(&mut self, content: String) {
        self.saved_content = content.clone();
        self.content = content;
        self.is_dirty = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// One independently persisted workflow graph within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub has_unsaved_changes: bool,
    #[serde(default)]
    pub is_loading: bool,
}

impl Tab {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order,
            viewport: Viewport::default(),
            has_unsaved_changes: false,
            is_loading: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: "python".to_string(),
            position: Position { x: 10.0, y: 20.0 },
            data: NodeData {
                config: serde_json::json!({"name": "Fetch", "code": "print(1)"})
                    .as_object()
                    .cloned()
                    .unwrap(),
                file_save_state: Some(FileSaveState::clean("fetch.py", "print(1)")),
            },
        }
    }

    #[test]
    fn test_node_type_serializes_as_type() {
        let json = serde_json::to_value(code_node("n1")).unwrap();
        assert_eq!(json["type"], "python");
        assert!(json.get("node_type").is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = FlowSnapshot {
            nodes: vec![code_node("n1")],
            edges: vec![Edge {
                id: "e1".to_string(),
                source: "n0".to_string(),
                target: "n1".to_string(),
                source_handle: None,
                target_handle: Some("input".to_string()),
            }],
            viewport: Viewport::default(),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: FlowSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_file_save_state_omitted_when_absent() {
        let mut node = code_node("n1");
        node.data.file_save_state = None;
        let json = serde_json::to_value(&node).unwrap();
        assert!(json["data"].get("file_save_state").is_none());
    }

    #[test]
    fn test_missing_data_defaults() {
        let node: Node =
            serde_json::from_str(r#"{"id":"n1","type":"trigger","position":{"x":0,"y":0}}"#)
                .unwrap();
        assert!(node.data.config.is_empty());
        assert!(!node.has_dirty_file());
    }

    #[test]
    fn test_edit_back_to_saved_content_is_clean() {
        let mut fs = FileSaveState::clean("a.py", "x");
        fs.edit("xy".to_string());
        assert!(fs.is_dirty);
        fs.edit("x".to_string());
        assert!(!fs.is_dirty);
    }

    #[test]
    fn test_mark_saved_moves_marker() {
        let mut fs = FileSaveState::clean("a.py", "x");
        fs.edit("y".to_string());
        fs.mark_saved();
        assert!(!fs.is_dirty);
        assert_eq!(fs.saved_content, "y");
    }

    #[test]
    fn test_confirm_written_keeps_later_edits_dirty() {
        let mut fs = FileSaveState::clean("a.py", "x");
        fs.edit("y".to_string());
        fs.edit("yz".to_string());
        fs.confirm_written("y");
        assert_eq!(fs.saved_content, "y");
        assert!(fs.is_dirty);

        fs.confirm_written("yz");
        assert!(!fs.is_dirty);
    }

    #[test]
    fn test_config_str_ignores_empty() {
        let mut node = code_node("n1");
        node.data
            .config
            .insert("name".to_string(), Value::String(String::new()));
        assert_eq!(node.config_str("name"), None);
        assert_eq!(node.config_str("code"), Some("print(1)"));
    }
}
