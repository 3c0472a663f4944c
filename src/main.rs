//! CLI Entry Point for edge-sentry
//!
//! Provides command-line interface for:
//! - Running the device daemon (capture loop + command server)
//! - Running the fleet controller with its operator console
//!
//! # Usage
//!
//! ```bash
//! edge-sentry device --config config/edge_sentry.toml
//! edge-sentry fleet --config config/edge_sentry.toml
//! ```
//!
//! The device subcommand runs with simulated camera, detector and GPIO; real drivers plug
//! in through the `hardware::capabilities` traits. Host actions only reach the system
//! shutdown command when `device.host_actions` is enabled.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edge_sentry::config::SentryConfig;
use edge_sentry::daemon::{DeviceDaemon, DeviceHardware};
use edge_sentry::fleet::{FleetManager, LatestFrameSink};
use edge_sentry::hardware::host::SystemHostControl;
use edge_sentry::{console, logging};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "edge-sentry")]
#[command(about = "Forklift/pedestrian safety monitor and fleet controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device daemon
    Device {
        /// Configuration file (default: config/edge_sentry.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run the fleet controller with the operator console
    Fleet {
        /// Configuration file (default: config/edge_sentry.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Device { config } => run_device(load_config(config)?).await,
        Commands::Fleet { config } => run_fleet(load_config(config)?).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SentryConfig> {
    let config = match &path {
        Some(path) => SentryConfig::load_from(path),
        None => SentryConfig::load(),
    }
    .context("Failed to load configuration")?;
    logging::init_from_config(&config)?;
    info!(name = %config.application.name, config = ?path, "Configuration loaded");
    Ok(config)
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "Cannot listen for interrupts, shutting down"),
        }
        token.cancel();
    });
    shutdown
}

async fn run_device(config: SentryConfig) -> Result<()> {
    let mut hardware = DeviceHardware::simulated(&config);
    if config.device.host_actions {
        hardware.host = Arc::new(SystemHostControl::new());
    }
    let daemon = DeviceDaemon::build(&config, hardware)
        .await
        .context("Failed to start device daemon")?;
    info!(addr = %daemon.local_addr()?, "Device daemon running, Ctrl+C to stop");

    daemon.run(shutdown_on_ctrl_c()).await?;
    Ok(())
}

async fn run_fleet(config: SentryConfig) -> Result<()> {
    let manager = Arc::new(
        FleetManager::new(&config.fleet, Arc::new(LatestFrameSink::new()))
            .context("Invalid device roster")?,
    );
    info!(devices = manager.device_names().len(), "Fleet controller starting");
    manager.start();

    let shutdown = shutdown_on_ctrl_c();
    let result = console::run(manager.clone(), shutdown.clone()).await;
    shutdown.cancel();
    manager.shutdown().await;
    result.context("Console input failed")
}
