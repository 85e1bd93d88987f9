use anyhow::Result;
use clap::Parser;
use std::{io::ErrorKind, process};
use tokio::{fs, net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Load config ---
    let args = config::Args::parse();
    let cfg = match config::AppConfig::load(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!("Failed to load configuration from {}: {}", args.config, err);
            process::exit(1);
        }
    };

    tracing::info!("Starting upload-store with config: {:?}", cfg);

    // --- Ensure upload directory exists ---
    if !fs::try_exists(&cfg.upload_dir).await.unwrap_or(false) {
        fs::create_dir_all(&cfg.upload_dir).await?;
        tracing::info!("Created upload directory at {}", cfg.upload_dir.display());
    }

    // --- Build router ---
    let app = routes::routes::app(&cfg);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            let hint = if err.kind() == ErrorKind::PermissionDenied {
                " (permission denied; try a port above 1024)"
            } else {
                ""
            };
            tracing::error!("Failed to bind {}: {}{}", addr, err, hint);
            process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve when Ctrl-C or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", err);
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

    tracing::info!("Shutdown signal received");
}
