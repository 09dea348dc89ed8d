//! Health and metrics HTTP endpoints, each on its own port.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::observability::log::iso8601_now;
use crate::observability::metrics::WorkerMetrics;

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": iso8601_now(),
        })),
    )
}

pub fn health_router() -> Router {
    Router::new().route("/_health", get(health))
}

async fn metrics(State(metrics): State<Arc<WorkerMetrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.encode(),
    )
}

pub fn metrics_router(worker_metrics: Arc<WorkerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(worker_metrics)
}

/// Bind and serve a router; returns the bound address (useful with port 0)
/// and the server task handle.
pub async fn serve(
    router: Router,
    addr: &str,
) -> Result<(std::net::SocketAddr, JoinHandle<()>), WorkerError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "endpoint server exited");
        }
    });
    Ok((local_addr, handle))
}
