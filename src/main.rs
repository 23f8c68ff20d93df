use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use caption_queue::{
    app_state::AppState, config::AppConfig, routes, services::queue::RedisJobStore,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing caption gateway");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe();

    tracing::info!(
        broker = %config.broker_url,
        results = %config.result_backend_url,
        queue = %config.queue_name,
        "Connecting to job store"
    );
    let store = RedisJobStore::new(
        &config.broker_url,
        &config.result_backend_url,
        &config.queue_name,
        config.result_ttl(),
    )
    .expect("Failed to initialize job store");

    let state = AppState::new(Arc::new(store), config.max_image_bytes);
    let app = routes::router(state, Arc::new(prometheus_handle));

    tracing::info!("Starting caption gateway on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
