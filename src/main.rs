//! # marquee
//!
//! Real-time gateway binary: loads settings, initializes logging and serves
//! the monitor and dashboard endpoints on one shared port until Ctrl-C.

#![deny(unsafe_code)]

mod handlers;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use marquee_core::logging::{LogFormat, init_subscriber};
use marquee_server::{Gateway, GatewayConfig};
use marquee_settings::{MarqueeSettings, load_settings_from_path, settings_path};
use tracing::info;

/// Marquee real-time gateway.
#[derive(Parser, Debug)]
#[command(name = "marquee", about = "Real-time gateway for signage monitors and dashboards")]
struct Cli {
    /// Settings file (defaults to `~/.marquee/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port shared by the endpoints (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `debug` or `info,marquee_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut MarqueeSettings) {
        if let Some(ref host) = self.host {
            settings.gateway.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.endpoints.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let gateway = Gateway::new(GatewayConfig::from(&settings.gateway));
    let port = settings.endpoints.port;

    let monitors = gateway
        .register_endpoint(port, handlers::monitor_endpoint(&settings.endpoints.monitor_path))
        .await
        .context("Failed to register monitor endpoint")?;
    let _dashboards = gateway
        .register_endpoint(
            port,
            handlers::dashboard_endpoint(&settings.endpoints.dashboard_path, monitors),
        )
        .await
        .context("Failed to register dashboard endpoint")?;

    if let Some(addr) = gateway.local_addr(port).await {
        info!(%addr, paths = ?gateway.paths(port), "marquee listening");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    gateway.dispose().await;
    Ok(())
}
