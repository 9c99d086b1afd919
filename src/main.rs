//! # logtail
//!
//! Log tailing gateway binary: loads settings, installs telemetry and serves
//! the WebSocket gateway over an in-memory bus until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use logtail_bus::{MemoryBus, MemoryBusConfig};
use logtail_server::LogtailServer;
use logtail_settings::LogtailSettings;
use logtail_telemetry::{TelemetryConfig, init_telemetry};

/// Real-time job log gateway.
#[derive(Parser, Debug)]
#[command(name = "logtail", about = "Real-time job log gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.logtail/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default log level (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: Option<bool>,
}

impl Cli {
    /// Apply flags on top of loaded settings.
    fn apply(&self, settings: &mut LogtailSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(json) = self.json_logs {
            settings.logging.json = json;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(logtail_settings::loader::settings_path);
    let mut settings = logtail_settings::loader::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    let telemetry = init_telemetry(&TelemetryConfig::from_settings(&settings.logging));
    tracing::info!(filter = telemetry.filter(), "telemetry initialized");

    let metrics_handle =
        logtail_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let bus = Arc::new(MemoryBus::new(MemoryBusConfig {
        retention_per_topic: settings.bus.retention_per_topic,
        max_topics: settings.bus.max_topics,
        topic_idle_ttl: settings.bus.topic_idle_ttl(),
    }));
    let _reclaimer = bus.spawn_reclaimer(settings.bus.reclaim_interval());
    let server = LogtailServer::new(settings, bus.clone()).with_metrics(metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        "logtail listening on http://{addr} (actions: {})",
        server.dispatcher().actions().join(", ")
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown_gracefully().await {
        tracing::warn!("streamers still running at shutdown timeout");
    }
    bus.close();
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
