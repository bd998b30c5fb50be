//! modelgate Server
//!
//! Serves predictions from versioned models held in an MLflow-compatible
//! registry or in S3-compatible object storage.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};

use modelgate_server::{create_router, telemetry, AppState, ConfigArgs, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "modelgate-server")]
#[command(about = "modelgate model serving gateway", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Listen address
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long, env = "PORT")]
    port: Option<u16>,

    /// Skip loading the default model at startup
    #[arg(long)]
    no_preload: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.no_preload {
        config.preload = false;
    }

    telemetry::init_tracing(cli.verbose, cli.json_logs || config.logging.json);

    info!("Starting modelgate server");
    info!("Tracking server: {}", config.loader.registry.tracking_uri);
    if let Some(endpoint) = &config.loader.storage.endpoint_url {
        info!("Object storage endpoint: {}", endpoint);
    }

    let metrics_handle = telemetry::init_metrics()?;

    let state = AppState::new(&config, metrics_handle)?;

    if config.preload {
        info!("Preloading {}", state.service.default_reference());
        if !state.service.warm_up().await {
            warn!("Default model unavailable at startup, will retry on first request");
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
