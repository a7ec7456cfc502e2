use std::path::PathBuf;

use crate::editor::echo::DEFAULT_ECHO_WINDOW_MS;

const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 500;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub project: PathBuf,
    pub echo_window_ms: i64,
    pub watch_debounce_ms: u64,
    pub schemas_path: PathBuf,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("CTHULU_PROJECT").ok().as_deref(),
            std::env::var("CTHULU_ECHO_WINDOW_MS").ok().as_deref(),
            std::env::var("CTHULU_WATCH_DEBOUNCE_MS").ok().as_deref(),
            std::env::var("CTHULU_SCHEMAS").ok().as_deref(),
            std::env::var("SENTRY_DSN").ok().as_deref(),
            std::env::var("ENVIRONMENT").ok().as_deref(),
        )
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(
        project: Option<&str>,
        echo_window_ms: Option<&str>,
        watch_debounce_ms: Option<&str>,
        schemas_path: Option<&str>,
        sentry_dsn: Option<&str>,
        environment: Option<&str>,
    ) -> Self {
        let project = non_empty(project)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let echo_window_ms = echo_window_ms
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_ECHO_WINDOW_MS);

        let watch_debounce_ms = watch_debounce_ms
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WATCH_DEBOUNCE_MS);

        let schemas_path = non_empty(schemas_path)
            .map(PathBuf::from)
            .unwrap_or_else(default_schemas_path);

        let sentry_dsn = non_empty(sentry_dsn).map(String::from);

        let environment = non_empty(environment)
            .map(String::from)
            .unwrap_or_else(|| "local".to_string());

        Config {
            project,
            echo_window_ms,
            watch_debounce_ms,
            schemas_path,
            sentry_dsn,
            environment,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

fn default_schemas_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cthulu")
        .join("schemas.yaml")
}
