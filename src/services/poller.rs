use std::sync::Arc;

use crate::models::job::JobView;
use crate::services::queue::{JobStore, QueueError};

/// Read-only access to job state.
pub struct ResultPoller {
    store: Arc<dyn JobStore>,
}

impl ResultPoller {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Current state of a job. Ids the store has never seen read as pending.
    pub async fn poll(&self, job_id: &str) -> Result<JobView, QueueError> {
        self.store.get_state(job_id).await
    }
}
