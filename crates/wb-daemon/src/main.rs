//! # workbenchd
//!
//! Workbench daemon: loads settings, connects to the container engine and
//! the reverse-proxy control plane, then serves editor sessions until
//! interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use wb_container::docker::DockerRuntime;
use wb_proxy::RedisStore;
use wb_server::{HeaderIdentity, WorkbenchServer};
use wb_session::SessionContext;
use wb_settings::WorkbenchSettings;

/// Workbench session server.
#[derive(Parser, Debug)]
#[command(name = "workbenchd", about = "Workbench session server")]
struct Cli {
    /// Settings file (defaults to `WB_SETTINGS_PATH` or `~/.workbench/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind, overriding settings.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding settings.
    #[arg(long)]
    port: Option<u16>,

    /// Log level, overriding settings.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_settings(&self) -> Result<WorkbenchSettings> {
        let path = self.settings.clone().unwrap_or_else(wb_settings::settings_path);
        let mut settings = wb_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    wb_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics = wb_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let runtime = Arc::new(DockerRuntime::connect().context("Failed to connect to the container engine")?);
    let store = Arc::new(
        RedisStore::connect(&settings.redis.url)
            .await
            .with_context(|| format!("Failed to connect to {}", settings.redis.url))?,
    );
    let ctx = SessionContext::from_settings(runtime, store, &settings).context("Invalid proxy settings")?;
    let identity = Arc::new(HeaderIdentity::new(&settings.repositories.root));

    let server = WorkbenchServer::new(&settings, ctx, identity).with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        network = %settings.docker.network,
        repositories = %settings.repositories.root,
        "workbench listening on http://{addr}"
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().drain(None).await;
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
