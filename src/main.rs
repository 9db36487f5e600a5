//! # haggle
//!
//! Marketplace chat server binary. Loads settings, opens the message store
//! and serves the chat WebSocket until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use haggle_core::logging::init_subscriber;
use haggle_server::metrics::install_recorder;
use haggle_server::{HaggleServer, ServerConfig};
use haggle_settings::HaggleSettings;
use haggle_store::{SqliteStore, StaticResourceGateway};

/// How long open sessions get to drain after ctrl-c.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Marketplace chat server.
#[derive(Parser, Debug)]
#[command(name = "haggle", about = "Marketplace chat server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` message database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file (default `~/.haggle/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter, e.g. `debug` or `haggle_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Fold command-line overrides into the loaded settings.
    fn apply(&self, settings: &mut HaggleSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.storage.db_path = path.display().to_string();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json {
            settings.logging.json = true;
        }
    }
}

fn db_path(settings: &HaggleSettings) -> PathBuf {
    if settings.storage.db_path.is_empty() {
        haggle_settings::default_db_path()
    } else {
        PathBuf::from(&settings.storage.db_path)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_file = cli
        .settings
        .clone()
        .unwrap_or_else(haggle_settings::settings_path);
    let mut settings = haggle_settings::load_settings_from_path(&settings_file)
        .with_context(|| format!("Failed to load settings from {}", settings_file.display()))?;
    cli.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.json);

    let db_path = db_path(&settings);
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let media = StaticResourceGateway::new(settings.media.base_url.clone());
    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let server = HaggleServer::new(
        ServerConfig::from(&settings),
        Arc::new(store),
        Arc::new(media),
    )
    .with_metrics(metrics);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(%addr, db = %db_path.display(), "haggle listening on ws://{addr}/api/im/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    server
        .graceful_shutdown(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!("shutdown complete");
    Ok(())
}
