//! Server startup and graceful shutdown

use std::sync::Arc;

use anyhow::Result;
use axum::Router;

use crate::state::AppState;

/// Serve `app` until SIGINT or SIGTERM, then stop the background loops.
pub async fn start_server(state: Arc<AppState>, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.server_port());
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let limits = state.config.limits();
    tracing::info!(
        default_max_upload_size = limits.default_max_upload_size,
        default_max_parallel_uploads = limits.default_max_parallel_uploads_per_user,
        handlers = ?state.orchestrator.handlers().supported_extensions(),
        storage_backend = %state.storage.backend_type(),
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.background.worker.shutdown().await;
    if let Some(sweeper) = &state.background.sweeper_shutdown {
        let _ = sweeper.send(()).await;
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A signal handler that cannot be installed
/// never resolves, leaving the other one in charge.
async fn shutdown_signal() {
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
