pub mod config;
pub mod editor;
pub mod flows;
pub mod watcher;
