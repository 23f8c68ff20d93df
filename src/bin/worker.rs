use caption_queue::{
    config::AppConfig,
    routes,
    services::{
        captioner::{ModelHandle, WorkersAiLoader, WorkersAiSettings},
        normalizer::InputNormalizer,
        queue::{JobStore, RedisJobStore},
        worker::Worker,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting caption worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to start Prometheus exporter");
        routes::metrics::describe();
        tracing::info!(%addr, "Worker metrics listener started");
    }

    tracing::info!(queue = %config.queue_name, "Connecting to job store");
    let store: Arc<dyn JobStore> = Arc::new(
        RedisJobStore::new(
            &config.broker_url,
            &config.result_backend_url,
            &config.queue_name,
            config.result_ttl(),
        )
        .expect("Failed to initialize job store"),
    );

    // The worker must not run without its store.
    if let Err(e) = store.health_check().await {
        tracing::error!(error = %e, "Job store unreachable at startup");
        std::process::exit(1);
    }

    let normalizer = Arc::new(
        InputNormalizer::new(config.fetch_timeout(), config.max_image_bytes)
            .expect("Failed to initialize HTTP client"),
    );

    // Loaded on the first job, shared by every loop in this process.
    let model = Arc::new(ModelHandle::new(WorkersAiLoader::new(
        WorkersAiSettings::from_config(&config),
    )));

    let worker = Arc::new(Worker::new(store, normalizer, model));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let concurrency = config.worker_concurrency.max(1);
    tracing::info!(concurrency, "Worker ready, starting job processing loops");

    let mut loops = JoinSet::new();
    for _ in 0..concurrency {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        loops.spawn(async move { worker.run(shutdown).await });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, finishing in-flight jobs");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                // Keep the sender alive so the loops keep running.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    while let Some(joined) = loops.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // Store faults are fatal; let the supervisor restart us.
                tracing::error!(error = %e, "Job store failure, exiting");
                std::process::exit(1);
            }
            Err(e) => {
                tracing::error!(error = %e, "Worker loop aborted, exiting");
                std::process::exit(1);
            }
        }
    }

    tracing::info!("Caption worker stopped");
}
