use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::{FlowSnapshot, Tab};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
}

/// Persisted state of a project: one flow per tab plus the node files.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn list_tabs(&self, project: &Path) -> Result<Vec<Tab>>;
    async fn load_tab_flow(&self, project: &Path, tab_id: &str) -> Result<Option<FlowSnapshot>>;
    /// Returns `false` when the store declined the write.
    async fn save_tab_flow(
        &self,
        project: &Path,
        tab_id: &str,
        snapshot: &FlowSnapshot,
        name: Option<&str>,
    ) -> Result<bool>;
    async fn read_file(&self, project: &Path, path: &str) -> Result<FileContent>;
    async fn write_file(&self, project: &Path, path: &str, content: &str) -> Result<()>;
}
