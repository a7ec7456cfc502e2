use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cthulu_sync::config::Config;
use cthulu_sync::editor::changes::ChangeBus;
use cthulu_sync::flows::file_repository::FileProjectStore;
use cthulu_sync::flows::graph::resolve_connection_names;
use cthulu_sync::flows::repository::ProjectStore;
use cthulu_sync::flows::schema::{Port, SchemaCatalog};
use cthulu_sync::watcher::ProjectWatcher;

#[derive(Parser)]
#[command(name = "cthulu-sync", about = "Tab and file sync for cthulu studio projects")]
enum Cli {
    /// List the tabs of a project
    Tabs {
        /// Project directory (defaults to CTHULU_PROJECT)
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Show which nodes are wired to each port of a node
    Connections {
        #[arg(long)]
        tab: String,
        #[arg(long)]
        node: String,
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Watch a project and print file changes as JSON lines
    Watch {
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cthulu_sync=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(false)
                .with_writer(std::io::stderr),
        )
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            enable_logs: true,
            ..Default::default()
        },
    ));

    match cli {
        Cli::Tabs { project } => list_tabs(project.unwrap_or(config.project)).await?,
        Cli::Connections { tab, node, project } => {
            let schemas = SchemaCatalog::load_or_builtin(&config.schemas_path);
            show_connections(project.unwrap_or(config.project), &tab, &node, &schemas).await?
        }
        Cli::Watch { project } => {
            let debounce = Duration::from_millis(config.watch_debounce_ms);
            watch(project.unwrap_or(config.project), debounce).await?
        }
    }
    Ok(())
}

async fn list_tabs(project: PathBuf) -> Result<()> {
    let tabs = FileProjectStore::new().list_tabs(&project).await?;
    if tabs.is_empty() {
        println!("No tabs in {}", project.display());
        return Ok(());
    }
    for tab in tabs {
        println!("{:>3}  {:<24} {}", tab.order, tab.id, tab.name);
    }
    Ok(())
}

async fn show_connections(
    project: PathBuf,
    tab_id: &str,
    node_id: &str,
    schemas: &SchemaCatalog,
) -> Result<()> {
    let Some(flow) = FileProjectStore::new()
        .load_tab_flow(&project, tab_id)
        .await?
    else {
        bail!("tab {tab_id} not found in {}", project.display());
    };
    let Some(node) = flow.node(node_id) else {
        bail!("node {node_id} not found in tab {tab_id}");
    };

    let ports = schemas
        .get(&node.node_type)
        .map(|s| s.ports.clone())
        .unwrap_or_default();
    // Runtime-declared ports live in the node config.
    let dynamic_ports: Vec<Port> = node
        .data
        .config
        .get("ports")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let names = resolve_connection_names(
        node_id,
        &ports,
        &dynamic_ports,
        &flow.nodes,
        &flow.edges,
        schemas,
    );
    println!("{}", serde_json::to_string_pretty(&names)?);
    Ok(())
}

async fn watch(project: PathBuf, debounce: Duration) -> Result<()> {
    let bus = Arc::new(ChangeBus::new());
    let mut rx = bus.subscribe_all();
    let _watcher = ProjectWatcher::start(&project, bus.clone(), debounce)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down watcher");
                return Ok(());
            }
            received = rx.recv() => match received {
                Ok(event) => {
                    let line = serde_json::to_string(&event).context("failed to encode change event")?;
                    println!("{line}");
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "watch output lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
