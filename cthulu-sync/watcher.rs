use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};

use crate::editor::changes::{ChangeBus, ChangeType, FileChangeEvent};
use crate::flows::file_repository::META_DIR;

/// Watches a project directory and publishes node file changes on a
/// [`ChangeBus`].
pub struct ProjectWatcher {
    /// Dropping the debouncer stops the watcher.
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    root: PathBuf,
}

impl ProjectWatcher {
    /// Start watching `project` recursively. The returned value's lifetime
    /// controls the watcher thread.
    pub fn start(project: &Path, bus: Arc<ChangeBus>, debounce: Duration) -> anyhow::Result<Self> {
        let root = std::fs::canonicalize(project)
            .with_context(|| format!("failed to resolve project dir: {}", project.display()))?;
        let event_root = root.clone();

        let mut debouncer = new_debouncer(
            debounce,
            move |events: Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "fs watcher error");
                        return;
                    }
                };

                for event in events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }
                    let Some(change) = change_event(&event_root, &event.path) else {
                        continue;
                    };

                    tracing::info!(
                        path = %change.file_path,
                        change_type = ?change.change_type,
                        "external file change detected"
                    );
                    bus.publish(change);
                }
            },
        )
        .context("failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;

        tracing::info!(project = %root.display(), "project watcher started");

        Ok(Self {
            _debouncer: debouncer,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map a raw filesystem path to a change event on its project-relative path.
/// Studio metadata, temp files and directories are skipped.
fn change_event(root: &Path, path: &Path) -> Option<FileChangeEvent> {
    let relative = path.strip_prefix(root).ok()?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(seg) => segments.push(seg.to_str()?),
            _ => return None,
        }
    }
    let filename = *segments.last()?;
    if segments[0] == META_DIR || filename.ends_with(".tmp") {
        return None;
    }
    if path.is_dir() {
        return None;
    }

    let change_type = if path.exists() {
        ChangeType::Modified
    } else {
        ChangeType::Deleted
    };
    Some(FileChangeEvent::now(segments.join("/"), change_type))
}
