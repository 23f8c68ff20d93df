use base64::Engine;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::JobMessage;
use crate::services::queue::{JobStore, QueueError};

/// How a client handed over its image.
#[derive(Debug, Clone)]
pub enum JobInput {
    /// URL or inline base64 text.
    Reference(String),
    /// Raw uploaded file bytes.
    Upload(Vec<u8>),
}

impl JobInput {
    /// Single wire form the worker understands: uploads become base64.
    fn into_wire(self) -> Option<String> {
        match self {
            JobInput::Reference(reference) => {
                let reference = reference.trim();
                (!reference.is_empty()).then(|| reference.to_string())
            }
            JobInput::Upload(bytes) => (!bytes.is_empty())
                .then(|| base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }
}

/// Accepts submissions and queues them without waiting for a result.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Queue a caption job and return its id.
    pub async fn submit(&self, input: Option<JobInput>) -> Result<String, SubmitError> {
        let wire = input
            .and_then(JobInput::into_wire)
            .ok_or(SubmitError::MissingInput)?;

        let job_id = Uuid::new_v4().to_string();
        let message = JobMessage::caption(job_id.clone(), wire);
        self.store.enqueue(&message).await?;

        metrics::counter!("caption_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job_id, "Caption job queued");

        Ok(job_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("an image file or image_url is required")]
    MissingInput,

    #[error("job store unavailable: {0}")]
    Store(#[from] QueueError),
}
