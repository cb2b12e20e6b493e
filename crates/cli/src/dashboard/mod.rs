//! Read-only monitoring dashboard (axum).
//!
//! - `routes.rs`: the HTML page, health check and JSON endpoints
//! - `errors.rs`: consistent JSON error bodies

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

use queuectl_infra::jobs::JobStore;
use queuectl_infra::MetricsRecorder;

pub mod errors;
pub mod routes;

/// Build the dashboard router over `store`.
pub fn router<S>(store: Arc<S>) -> Router
where
    S: JobStore + MetricsRecorder + 'static,
{
    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health))
        .route("/api/stats", get(routes::stats::<S>))
        .route("/api/jobs", get(routes::jobs::<S>))
        .route("/api/executions", get(routes::executions::<S>))
        .layer(ServiceBuilder::new().layer(Extension(store)))
}

/// Serve the dashboard on `addr` until `shutdown` fires.
pub async fn serve<S>(store: Arc<S>, addr: &str, shutdown: CancellationToken) -> Result<()>
where
    S: JobStore + MetricsRecorder + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!(addr = %local, "dashboard listening on http://{local}");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("dashboard server failed")?;

    info!("dashboard stopped");
    Ok(())
}
