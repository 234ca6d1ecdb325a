//! HTTP health surface
//!
//! Any path answers with the live worker count as plain text; /metrics
//! serves the Prometheus gather.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::{Result, WardenError};
use crate::metrics::gather_system_metrics;
use crate::shutdown::ShutdownSignal;
use crate::supervisor::WorkerSupervisor;

/// Serve the health endpoint until shutdown.
pub async fn serve(
    addr: SocketAddr,
    supervisor: Arc<WorkerSupervisor>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(|| async { gather_system_metrics() }))
        .fallback(get(worker_count))
        .layer(CorsLayer::permissive())
        .with_state(supervisor);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WardenError::Internal {
            message: format!("failed to bind health server on {}: {}", addr, e),
        })?;
    info!("Health server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|e| WardenError::Internal {
            message: format!("health server error: {}", e),
        })
}

async fn worker_count(State(supervisor): State<Arc<WorkerSupervisor>>) -> String {
    supervisor.count().to_string()
}
