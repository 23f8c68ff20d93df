//! In-process job store with the same delivery and state rules as
//! [`RedisJobStore`](super::queue::RedisJobStore). Used by tests and single
//! process setups where jobs do not need to outlive the process.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::queue::{JobStore, QueueError};
use crate::models::job::{JobMessage, JobOutcome, JobView, TaskMeta};

enum Record {
    Running,
    Done(TaskMeta),
}

#[derive(Default)]
pub struct MemoryJobStore {
    queue: Mutex<VecDeque<JobMessage>>,
    in_flight: Mutex<Vec<JobMessage>>,
    records: Mutex<HashMap<String, Record>>,
    available: Notify,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages taken by a consumer but not yet acknowledged.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Move the head of the queue into flight. Both locks are held before
    /// anything changes, so a cancelled call leaves the queue untouched.
    async fn take(&self) -> Option<JobMessage> {
        let mut queue = self.queue.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        let message = queue.pop_front()?;
        // Pass the wake-up on if more work is waiting.
        if !queue.is_empty() {
            self.available.notify_one();
        }
        in_flight.push(message.clone());
        Some(message)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.queue.lock().await.push_back(message.clone());
        self.available.notify_one();
        Ok(())
    }

    async fn try_fetch(&self, block: Duration) -> Result<Option<JobMessage>, QueueError> {
        let deadline = Instant::now() + block;
        loop {
            if let Some(message) = self.take().await {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn mark_running(&self, job_id: &str) -> Result<(), QueueError> {
        self.records
            .lock()
            .await
            .entry(job_id.to_string())
            .or_insert(Record::Running);
        Ok(())
    }

    async fn set_result(&self, job_id: &str, outcome: &JobOutcome) -> Result<bool, QueueError> {
        let mut records = self.records.lock().await;
        if let Some(Record::Done(_)) = records.get(job_id) {
            return Ok(false);
        }
        records.insert(
            job_id.to_string(),
            Record::Done(TaskMeta::from_outcome(job_id, outcome)),
        );
        Ok(true)
    }

    async fn acknowledge(&self, message: &JobMessage) -> Result<(), QueueError> {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(pos) = in_flight.iter().position(|m| m == message) {
            in_flight.remove(pos);
        }
        Ok(())
    }

    async fn get_state(&self, job_id: &str) -> Result<JobView, QueueError> {
        Ok(match self.records.lock().await.get(job_id) {
            Some(Record::Done(meta)) => meta.clone().into(),
            Some(Record::Running) => JobView::running(),
            None => JobView::pending(),
        })
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.queue.lock().await.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
