//! webhook-sentry: egress proxy for outbound webhook delivery
//!
//! This is the main entry point for the webhook-sentry binary. It handles
//! CLI argument parsing, configuration loading, telemetry initialization,
//! and runs the proxy listeners until interrupted.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: goes to syslog (not stdout/stderr) so the egress
//!   trail survives process restarts and lands in the SIEM pipeline
//! - **Debug logging**: `tracing` to stderr, verbosity via `-v`

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webhook_sentry::{
    cli::{Cli, Commands},
    config::{Config, ConfigLoader},
    proxy::{ProxyConfig, ProxyServer},
    telemetry::AuditLogger,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose).context("Failed to initialize tracing subscriber")?;

    debug!("parsed CLI arguments: {:?}", cli);

    let config_loader = ConfigLoader::new();
    let config = config_loader
        .load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    debug!("loaded configuration: {:?}", config);

    if let Some(Commands::CheckConfig) = cli.command {
        return check_config(&config);
    }

    // Audit telemetry goes to syslog; fall back to the null logger when no
    // daemon is reachable so the proxy still serves.
    let audit = match AuditLogger::new() {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            warn!("audit logging disabled: {}", e);
            Arc::new(AuditLogger::new_null())
        }
    };

    let proxy_config =
        ProxyConfig::from_config(&config).context("Failed to build proxy configuration")?;

    info!(
        "starting webhook-sentry with {} listener(s)",
        proxy_config.listeners.len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = ProxyServer::new(proxy_config, audit, shutdown_rx);
    let server_handle = tokio::spawn(server.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("received shutdown signal");

    shutdown_tx
        .send(true)
        .context("Failed to signal shutdown")?;

    server_handle
        .await
        .context("Proxy server task panicked")?
        .context("Proxy server failed")?;

    Ok(())
}

/// Validate and print the merged configuration.
fn check_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
