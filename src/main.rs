//! regtrace Binary Entry Point
//!
//! Runs the device registry, the SQLite store and the HTTP API.
//! Core functionality is provided by the `regtrace` library crate.

use clap::Parser;
use regtrace::{
    collector::{DeviceRegistry, ModbusConnector},
    config::{AppConfig, parse_duration},
    server::{AppState, create_router},
    storage::StorageBuilder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// regtrace - Modbus register acquisition service
#[derive(Parser, Debug)]
#[command(name = "regtrace", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "REGTRACE_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "REGTRACE_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "REGTRACE_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database file path (overrides config file)
    #[arg(long, env = "REGTRACE_DB_PATH")]
    db_path: Option<String>,

    /// Poll interval, e.g. "1s" or "500ms" (overrides config file)
    #[arg(long, env = "REGTRACE_POLL_INTERVAL", value_parser = parse_duration)]
    poll_interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,regtrace=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("regtrace - Modbus register acquisition");

    let cli = Cli::parse();

    tracing::info!(path = %cli.config, "Loading configuration");
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(interval) = cli.poll_interval {
        config.polling.interval = interval;
    }
    config.validate()?;

    tracing::info!(
        bind = %config.server.bind,
        port = config.server.port,
        db = %config.database.path,
        interval = ?config.polling.interval,
        "Configuration loaded"
    );

    let handles = StorageBuilder::new(&config.database.path)
        .pool_size(config.database.pool_size)
        .acquire_timeout(config.database.acquire_timeout)
        .busy_timeout(config.database.busy_timeout)
        .build()
        .await?;

    let registry = Arc::new(DeviceRegistry::new(
        Arc::new(ModbusConnector::new()),
        handles.store.clone(),
        config.polling.clone(),
    )?);

    // Startup devices; a device that cannot be reached is skipped
    for device in &config.devices {
        match registry.add(device).await {
            Ok(handle) => {
                tracing::info!(device = %device, collection = %handle.collection(), "Monitoring device");
            }
            Err(e) => {
                tracing::error!(device = %device, error = %e, "Failed to monitor device");
            }
        }
    }

    let shutdown = CancellationToken::new();
    let app = create_router(AppState {
        registry: Arc::clone(&registry),
        store: handles.store.clone(),
        shutdown: shutdown.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await;

    // No request can add a device once the server has stopped
    tracing::info!("Stopping polling workers...");
    registry.shutdown().await;

    tracing::info!("Shutting down storage...");
    handles.shutdown().await;

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then end open event streams.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
    shutdown.cancel();
}
