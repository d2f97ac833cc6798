// src/observability/mod.rs
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, SentryError};

/// Serves the Prometheus exposition endpoint. Binding failure is fatal:
/// an agent nobody can scrape is not running.
pub async fn serve_metrics(
    registry: Registry,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SentryError::Network(format!("failed to bind metrics port {addr}: {e}")))?;
    info!(addr = %addr, "metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| SentryError::Network(format!("metrics server error: {e}")))?;
    Ok(())
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("Failed to encode metrics: {e}"),
        )
            .into_response(),
    }
}
