use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Receives edges: matched against `Edge::target_handle`.
    Input,
    /// Emits edges: matched against `Edge::source_handle`.
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub kind: PortKind,
    #[serde(default)]
    pub label: Option<String>,
}

impl Port {
    pub fn input(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: PortKind::Input,
            label: None,
        }
    }

    pub fn output(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: PortKind::Output,
            label: None,
        }
    }
}

/// A code/text editor field whose content is stored as a separate file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorField {
    /// Config key holding the editor text.
    pub content_key: String,
    /// Config key holding the project-relative file path.
    #[serde(default = "default_path_key")]
    pub path_key: String,
}

fn default_path_key() -> String {
    "file_path".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSchema {
    pub node_type: String,
    pub label: String,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<EditorField>,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    schemas: Vec<NodeSchema>,
}

/// Node schemas keyed by node type.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: HashMap<String, NodeSchema>,
}

impl SchemaCatalog {
    pub fn new(schemas: Vec<NodeSchema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|s| (s.node_type.clone(), s))
                .collect(),
        }
    }

    /// Schemas for the node kinds the studio ships with.
    pub fn builtin() -> Self {
        let editor = |key: &str| {
            Some(EditorField {
                content_key: key.to_string(),
                path_key: default_path_key(),
            })
        };
        Self::new(vec![
            NodeSchema {
                node_type: "trigger".to_string(),
                label: "Trigger".to_string(),
                ports: vec![Port::output("output")],
                editor: None,
            },
            NodeSchema {
                node_type: "source".to_string(),
                label: "Source".to_string(),
                ports: vec![Port::input("input"), Port::output("output")],
                editor: None,
            },
            NodeSchema {
                node_type: "python".to_string(),
                label: "Python Script".to_string(),
                ports: vec![Port::input("input"), Port::output("output")],
                editor: editor("code"),
            },
            NodeSchema {
                node_type: "prompt".to_string(),
                label: "Prompt".to_string(),
                ports: vec![
                    Port::input("input"),
                    Port::input("context"),
                    Port::output("output"),
                ],
                editor: editor("prompt"),
            },
            NodeSchema {
                node_type: "sink".to_string(),
                label: "Sink".to_string(),
                ports: vec![Port::input("input")],
                editor: None,
            },
        ])
    }

    /// Load a YAML catalog (`schemas: [...]`). Entries override built-ins
    /// with the same node type.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schema catalog: {}", path.display()))?;
        let file: SchemaFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse schema catalog: {}", path.display()))?;

        let mut catalog = Self::builtin();
        for schema in file.schemas {
            catalog.schemas.insert(schema.node_type.clone(), schema);
        }
        Ok(catalog)
    }

    /// Load the catalog at `path` if it exists, otherwise the built-ins.
    pub fn load_or_builtin(path: &Path) -> Self {
        if !path.exists() {
            return Self::builtin();
        }
        match Self::load(path) {
            Ok(catalog) => {
                tracing::info!(path = %path.display(), count = catalog.schemas.len(), "Loaded node schemas");
                catalog
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Falling back to built-in node schemas");
                Self::builtin()
            }
        }
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeSchema> {
        self.schemas.get(node_type)
    }

    pub fn label(&self, node_type: &str) -> Option<&str> {
        self.get(node_type)
            .map(|s| s.label.as_str())
            .filter(|l| !l.is_empty())
    }

    pub fn editor(&self, node_type: &str) -> Option<&EditorField> {
        self.get(node_type).and_then(|s| s.editor.as_ref())
    }

    /// The project-relative file backing a node's editor field, if any.
    pub fn file_path_of<'a>(&self, node: &'a Node) -> Option<&'a str> {
        if let Some(fs) = &node.data.file_save_state {
            if !fs.file_path.is_empty() {
                return Some(fs.file_path.as_str());
            }
        }
        let editor = self.editor(&node.node_type)?;
        node.config_str(&editor.path_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::{FileSaveState, NodeData, Position};

    fn node(node_type: &str, config: serde_json::Value) -> Node {
        Node {
            id: "n1".to_string(),
            node_type: node_type.to_string(),
            position: Position { x: 0.0, y: 0.0 },
            data: NodeData {
                config: config.as_object().cloned().unwrap_or_default(),
                file_save_state: None,
            },
        }
    }

    #[test]
    fn test_builtin_editor_fields() {
        let catalog = SchemaCatalog::builtin();
        assert_eq!(catalog.editor("python").unwrap().content_key, "code");
        assert_eq!(catalog.editor("prompt").unwrap().content_key, "prompt");
        assert!(catalog.editor("trigger").is_none());
        assert!(catalog.editor("unknown").is_none());
    }

    #[test]
    fn test_file_path_prefers_save_state() {
        let catalog = SchemaCatalog::builtin();
        let mut n = node("python", serde_json::json!({"file_path": "config.py"}));
        assert_eq!(catalog.file_path_of(&n), Some("config.py"));

        n.data.file_save_state = Some(FileSaveState::clean("state.py", ""));
        assert_eq!(catalog.file_path_of(&n), Some("state.py"));
    }

    #[test]
    fn test_file_path_requires_editor_schema() {
        let catalog = SchemaCatalog::builtin();
        let n = node("trigger", serde_json::json!({"file_path": "x.py"}));
        assert_eq!(catalog.file_path_of(&n), None);
    }

    #[test]
    fn test_load_yaml_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemas.yaml");
        std::fs::write(
            &path,
            r#"
schemas:
  - node_type: python
    label: Python
    editor:
      content_key: source
  - node_type: shell
    label: Shell Command
    ports:
      - id: input
        kind: input
"#,
        )
        .unwrap();

        let catalog = SchemaCatalog::load(&path).unwrap();
        assert_eq!(catalog.label("python"), Some("Python"));
        assert_eq!(catalog.editor("python").unwrap().content_key, "source");
        assert_eq!(catalog.editor("python").unwrap().path_key, "file_path");
        assert_eq!(catalog.label("shell"), Some("Shell Command"));
        assert_eq!(catalog.label("trigger"), Some("Trigger"));
    }

    #[test]
    fn test_load_or_builtin_on_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemas.yaml");
        std::fs::write(&path, "schemas: [not, a, schema").unwrap();
        let catalog = SchemaCatalog::load_or_builtin(&path);
        assert_eq!(catalog.label("python"), Some("Python Script"));
    }
}
