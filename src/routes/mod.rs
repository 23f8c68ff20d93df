pub mod caption;
pub mod error;
pub mod health;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Room for multipart boundaries and base64 expansion on top of the raw image limit.
fn body_limit(max_image_bytes: usize) -> usize {
    max_image_bytes / 3 * 4 + 64 * 1024
}

/// Build the gateway router with its middleware stack.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    let limit = body_limit(state.max_image_bytes);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/caption", post(caption::submit_caption))
        .route("/result/{task_id}", get(caption::get_result))
        .with_state(state.clone())
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state((state, prometheus)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(limit))
        .layer(RequestBodyLimitLayer::new(limit))
}
