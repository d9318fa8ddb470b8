//! # asmo
//!
//! Webhook relay server binary: loads configuration, installs logging and
//! serves until ctrl-c.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use asmo_server::ServerConfig;
use asmo_telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use clap::Parser;
use tracing::Level;

/// Relays inbound webhooks to connected browser sessions.
#[derive(Parser, Debug)]
#[command(name = "asmo", about = "Webhook relay for Notion memory apps")]
struct Cli {
    /// Host to bind (overrides HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Log output format: pretty or json.
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Default log level. RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        format: cli.log_format,
        ..TelemetryConfig::default()
    })
    .context("Failed to initialize logging")?;

    let mut config = ServerConfig::from_env().context("Invalid configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        require_notion_token = config.require_notion_token,
        relay_timeout_secs = config.relay_timeout_secs,
        "Starting asmo"
    );

    let handle = asmo_server::start(config)
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, "Asmo ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
