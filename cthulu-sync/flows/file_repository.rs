use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::repository::{FileContent, ProjectStore};
use super::{Edge, FlowSnapshot, Node, Tab, Viewport};

/// Directory inside a project holding studio metadata.
pub const META_DIR: &str = ".cthulu";

/// On-disk form of one tab: `<project>/.cthulu/tabs/<tab_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTabFlow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
    pub updated_at: DateTime<Utc>,
}

impl StoredTabFlow {
    fn tab(&self) -> Tab {
        Tab {
            viewport: self.viewport,
            ..Tab::new(&self.id, &self.name, self.order)
        }
    }

    fn snapshot(self) -> FlowSnapshot {
        FlowSnapshot {
            nodes: self.nodes,
            edges: self.edges,
            viewport: self.viewport,
        }
    }
}

/// Filesystem-backed project store. Tab flows are JSON files under the
/// project's metadata directory; node files live at their project-relative
/// paths.
#[derive(Debug, Default)]
pub struct FileProjectStore;

impl FileProjectStore {
    pub fn new() -> Self {
        Self
    }

    pub fn tabs_dir(project: &Path) -> PathBuf {
        project.join(META_DIR).join("tabs")
    }

    fn tab_file(project: &Path, tab_id: &str) -> Result<PathBuf> {
        if tab_id.is_empty() || tab_id.contains(['/', '\\']) || tab_id.starts_with('.') {
            bail!("invalid tab id: {tab_id:?}");
        }
        Ok(Self::tabs_dir(project).join(format!("{tab_id}.json")))
    }

    fn read_stored(path: &Path) -> Result<StoredTabFlow> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tab file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse tab file: {}", path.display()))
    }

    /// Resolve a project-relative path, rejecting anything that escapes the
    /// project root.
    pub fn resolve(project: &Path, relative: &str) -> Result<PathBuf> {
        Ok(project.join(normalize_relative(relative)?))
    }
}

/// Canonical `dir/file` form of a project-relative path. Leading `/` and `.`
/// segments are dropped and `..` is folded; escaping the root is an error.
pub fn normalize_relative(relative: &str) -> Result<String> {
    let requested = Path::new(relative);
    let requested = requested.strip_prefix("/").unwrap_or(requested);

    let mut segments: Vec<String> = Vec::new();
    for component in requested.components() {
        match component {
            Component::Normal(seg) => segments.push(seg.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if segments.pop().is_none() {
                    bail!("path escapes project: {relative}");
                }
            }
            _ => {}
        }
    }

    if segments.is_empty() {
        bail!("empty file path");
    }
    Ok(segments.join("/"))
}

/// Key under which change events and own saves for `path` are tracked.
/// Paths that cannot be normalized are kept as given.
pub fn canonical_path(path: &str) -> String {
    normalize_relative(path).unwrap_or_else(|_| path.to_string())
}

/// Write via temp file + rename so watchers never see a half-written file.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir: {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    std::fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write file: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to move file into place: {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    async fn list_tabs(&self, project: &Path) -> Result<Vec<Tab>> {
        let dir = Self::tabs_dir(project);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read tabs dir: {}", dir.display()))?;

        let mut tabs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_stored(&path) {
                Ok(stored) => tabs.push(stored.tab()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid tab file");
                }
            }
        }

        tabs.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        tracing::debug!(project = %project.display(), count = tabs.len(), "Listed tabs");
        Ok(tabs)
    }

    async fn load_tab_flow(&self, project: &Path, tab_id: &str) -> Result<Option<FlowSnapshot>> {
        let path = Self::tab_file(project, tab_id)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_stored(&path)?.snapshot()))
    }

    async fn save_tab_flow(
        &self,
        project: &Path,
        tab_id: &str,
        snapshot: &FlowSnapshot,
        name: Option<&str>,
    ) -> Result<bool> {
        let path = Self::tab_file(project, tab_id)?;

        let existing = if path.exists() {
            Some(Self::read_stored(&path)?)
        } else {
            None
        };
        let order = match &existing {
            Some(stored) => stored.order,
            None => self.list_tabs(project).await?.len() as u32,
        };
        let name = name
            .map(String::from)
            .or_else(|| existing.map(|s| s.name))
            .unwrap_or_else(|| tab_id.to_string());

        let stored = StoredTabFlow {
            id: tab_id.to_string(),
            name,
            order,
            nodes: snapshot.nodes.clone(),
            edges: snapshot.edges.clone(),
            viewport: snapshot.viewport,
            updated_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&stored).context("failed to serialize tab flow")?;
        write_atomic(&path, &content)?;

        tracing::debug!(tab_id, nodes = stored.nodes.len(), "Saved tab flow");
        Ok(true)
    }

    async fn read_file(&self, project: &Path, path: &str) -> Result<FileContent> {
        let full = Self::resolve(project, path)?;
        let content = std::fs::read_to_string(&full)
            .with_context(|| format!("failed to read file: {}", full.display()))?;
        Ok(FileContent { content })
    }

    async fn write_file(&self, project: &Path, path: &str, content: &str) -> Result<()> {
        let full = Self::resolve(project, path)?;
        write_atomic(&full, content)
    }
}
