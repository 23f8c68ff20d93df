use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::app_state::AppState;

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(
    State((state, handle)): State<(AppState, Arc<PrometheusHandle>)>,
) -> impl IntoResponse {
    if let Ok(depth) = state.store.queue_depth().await {
        metrics::gauge!("caption_queue_depth").set(depth as f64);
    }
    handle.render()
}

/// Register descriptions for every series the gateway and worker emit.
pub fn describe() {
    metrics::describe_counter!(
        "caption_jobs_submitted_total",
        "Total caption jobs accepted by the gateway"
    );
    metrics::describe_counter!(
        "caption_jobs_finished_total",
        "Caption jobs that reached a terminal state, by state"
    );
    metrics::describe_histogram!(
        "caption_processing_seconds",
        "Time from dequeue to terminal state for a caption job"
    );
    metrics::describe_gauge!(
        "caption_queue_depth",
        "Current number of caption jobs waiting in the queue"
    );
}
