use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::models::job::{JobMessage, JobOutcome, CAPTION_TASK};
use crate::services::captioner::ModelHandle;
use crate::services::normalizer::InputNormalizer;
use crate::services::queue::{JobStore, QueueError, FETCH_BLOCK};

pub const UNKNOWN_TASK: &str = "unknown task";
pub const MISSING_ARGUMENT: &str = "missing task argument";
pub const MODEL_UNAVAILABLE: &str = "model unavailable";
pub const CAPTION_FAILED: &str = "caption generation failed";
pub const WORKER_FAULT: &str = "unexpected worker fault";

/// Pulls caption jobs off the queue and records their outcome.
///
/// Every per-job fault ends the job in FAILURE. Only store errors escape
/// [`Worker::process_next`]; the caller treats them as fatal.
pub struct Worker {
    store: Arc<dyn JobStore>,
    normalizer: Arc<InputNormalizer>,
    model: Arc<ModelHandle>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        normalizer: Arc<InputNormalizer>,
        model: Arc<ModelHandle>,
    ) -> Self {
        Self {
            store,
            normalizer,
            model,
        }
    }

    /// Process jobs until `shutdown` flips to true or its sender is dropped.
    ///
    /// Shutdown is checked between bounded pops, never during one, so a
    /// message the store hands out is always processed to its terminal write.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                return Ok(());
            }

            if let Some(message) = self.store.try_fetch(FETCH_BLOCK).await? {
                self.process(message).await?;
            }
        }
    }

    /// Wait for the next job and process it.
    pub async fn process_next(&self) -> Result<JobOutcome, QueueError> {
        let message = self.store.fetch_next().await?;
        self.process(message).await
    }

    async fn process(&self, message: JobMessage) -> Result<JobOutcome, QueueError> {
        let job_id = message.id.clone();
        tracing::info!(job_id = %job_id, task = %message.task_name, "Processing caption job");

        self.store.mark_running(&job_id).await?;

        let start = Instant::now();
        let outcome = self.execute_isolated(&message).await;
        let elapsed = start.elapsed();

        let written = self.store.set_result(&job_id, &outcome).await?;
        self.store.acknowledge(&message).await?;

        if !written {
            tracing::warn!(job_id = %job_id, "Job already had a terminal result, kept the earlier one");
        }

        let state = outcome.state();
        metrics::counter!("caption_jobs_finished_total", "state" => state.to_string()).increment(1);
        metrics::histogram!("caption_processing_seconds").record(elapsed.as_secs_f64());

        match &outcome {
            JobOutcome::Success(result) => tracing::info!(
                job_id = %job_id,
                duration_ms = elapsed.as_millis() as u64,
                width = result.width,
                height = result.height,
                "Caption job succeeded"
            ),
            JobOutcome::Failure(reason) => tracing::warn!(
                job_id = %job_id,
                duration_ms = elapsed.as_millis() as u64,
                reason = %reason,
                "Caption job failed"
            ),
        }

        Ok(outcome)
    }

    /// Run the job on its own task so a panic becomes a FAILURE outcome.
    async fn execute_isolated(&self, message: &JobMessage) -> JobOutcome {
        let normalizer = self.normalizer.clone();
        let model = self.model.clone();
        let message = message.clone();
        let job_id = message.id.clone();

        match tokio::spawn(async move { execute(&normalizer, &model, &message).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Caption job aborted");
                JobOutcome::failure(WORKER_FAULT)
            }
        }
    }
}

async fn execute(
    normalizer: &InputNormalizer,
    model: &ModelHandle,
    message: &JobMessage,
) -> JobOutcome {
    if message.task_name != CAPTION_TASK {
        return JobOutcome::failure(UNKNOWN_TASK);
    }
    let Some(input) = message.input() else {
        return JobOutcome::failure(MISSING_ARGUMENT);
    };

    let captioner = match model.get().await {
        Ok(captioner) => captioner,
        Err(e) => {
            tracing::error!(job_id = %message.id, error = %e, "Caption model failed to load");
            return JobOutcome::failure(MODEL_UNAVAILABLE);
        }
    };

    let image = match normalizer.normalize(input).await {
        Ok(image) => image,
        Err(e) => {
            tracing::error!(job_id = %message.id, error = %e, "Failed to load image");
            return JobOutcome::failure(e.reason());
        }
    };
    tracing::info!(
        job_id = %message.id,
        width = image.width(),
        height = image.height(),
        "Image loaded, generating caption"
    );

    match captioner.caption(&image).await {
        Ok(result) => JobOutcome::Success(result),
        Err(e) => {
            tracing::error!(job_id = %message.id, error = %e, "Caption generation failed");
            JobOutcome::failure(CAPTION_FAILED)
        }
    }
}
