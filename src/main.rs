//! tunsocks - SOCKS5 proxy service for a VPN gateway container
//!
//! Exposes a local SOCKS5 listener so other processes can route their
//! traffic through the gateway's tunnel.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunsocks::{config::ConfigManager, ShutdownCoordinator, Supervisor};

/// CLI arguments for tunsocks
#[derive(Parser, Debug)]
#[command(name = "tunsocks")]
#[command(about = "SOCKS5 proxy service for a VPN gateway")]
#[command(version)]
#[command(long_about = "
tunsocks - SOCKS5 proxy service for a VPN gateway container

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  TUNSOCKS_ENABLED          - Serve on startup (true/false)
  TUNSOCKS_LISTEN_ADDR      - Listening address (e.g., 0.0.0.0:1080)
  TUNSOCKS_USER             - Username for client authentication
  TUNSOCKS_PASSWORD         - Password for client authentication
  TUNSOCKS_LOG_REQUESTS     - Log protocol requests (true/false)
  TUNSOCKS_BACKOFF_INITIAL  - First restart delay (e.g., 10s)
  TUNSOCKS_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "tunsocks.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Listening address (overrides config file)
    #[arg(short, long, help = "Listening address (e.g., 0.0.0.0:1080)")]
    pub listen: Option<String>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, help = "Port to listen on")]
    pub port: Option<u16>,

    /// Username clients must authenticate with
    #[arg(long, help = "Username for client authentication")]
    pub username: Option<String>,

    /// Password clients must authenticate with
    #[arg(long, help = "Password for client authentication")]
    pub password: Option<String>,

    /// Log every proxied request
    #[arg(long, help = "Log every proxied request")]
    pub log_requests: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting tunsocks v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.listen.as_deref(),
        args.port,
        args.username,
        args.password,
        args.log_requests,
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Listening address: {}", config.socks5.listening_address);
        info!(
            "  Authentication: {}",
            if config.socks5.username.is_some() || config.socks5.password.is_some() {
                "username/password"
            } else {
                "none"
            }
        );
        info!("  Request logging: {}", config.socks5.log_requests);
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Listening address: {}", config.socks5.listening_address);

    let shutdown_coordinator = ShutdownCoordinator::new();

    let (supervisor, handle) = Supervisor::new(
        config.socks5.clone(),
        shutdown_coordinator.context(),
        config.supervisor.options(),
    );
    let supervisor_task = tokio::spawn(supervisor.run());

    if config.socks5.enabled {
        handle.start().await?;
    } else {
        info!("SOCKS5 service disabled, waiting for an enable signal");
    }

    // Block until SIGTERM/SIGINT, which broadcasts the shutdown context.
    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    info!("Initiating graceful shutdown...");
    if let Err(e) = supervisor_task.await {
        if !e.is_cancelled() {
            error!("Supervisor task failed: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
