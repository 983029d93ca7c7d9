//! logload trigger host - main entry point

use anyhow::{Context, Result};
use logload_common::logging::{init_logging, LogConfig};
use logload_ingest::{config::ClientConfig, CloudClients, Stages};
use logload_server::{app, AppState, ServerConfig};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("logload-server")
        .filter_directives("logload_server=debug,logload_ingest=debug,tower_http=info")
        .build()
        .with_env_overrides()?;

    let _guard = init_logging(&log_config)?;

    info!("Starting logload trigger host");

    let config = ServerConfig::from_env()?;
    let client_config = ClientConfig::from_env()?;
    let clients = CloudClients::new(client_config)
        .await
        .context("Failed to build cloud clients")?;
    info!("Cloud clients initialized");

    let state = AppState {
        stages: Stages::new(Arc::new(clients)),
        request_timeout: config.request_timeout(),
    };

    let addr = config.addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let server = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let grace = grace_period(&shutdown, config.shutdown_timeout());

    tokio::select! {
        served = server => {
            served?;
            info!("Server shut down gracefully");
        },
        _ = grace => {
            // Dropping the server drops the open requests, which cancels
            // their invocations.
            warn!("Grace period over, abandoning in-flight invocations");
        },
    }
    Ok(())
}

async fn grace_period(shutdown: &CancellationToken, grace: Duration) {
    shutdown.cancelled().await;
    info!(grace_secs = grace.as_secs(), "Draining in-flight invocations");
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    shutdown.cancel();
}
