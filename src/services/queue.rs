use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::job::{JobMessage, JobOutcome, JobView, TaskMeta};

const RESULT_KEY_PREFIX: &str = "caption-task-meta-";
const RUNNING_KEY_PREFIX: &str = "caption-task-running-";

/// How long a single blocking pop waits for a message.
pub const FETCH_BLOCK: Duration = Duration::from_secs(5);

/// Reason recorded for a queue entry that carries an id but cannot be decoded.
pub const MALFORMED_MESSAGE: &str = "malformed job message";

/// Durable queue plus result store shared by the gateway and the workers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Push a job onto the queue. Each message is delivered to one consumer.
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError>;

    /// Take the next message, waiting at most `block` for one to arrive.
    ///
    /// Once called, let it run to completion: a message taken by a dropped
    /// call stays in flight with nobody processing it.
    async fn try_fetch(&self, block: Duration) -> Result<Option<JobMessage>, QueueError>;

    /// Wait until a message is available and take it.
    async fn fetch_next(&self) -> Result<JobMessage, QueueError> {
        loop {
            if let Some(message) = self.try_fetch(FETCH_BLOCK).await? {
                return Ok(message);
            }
        }
    }

    /// Record that a worker has started on the job.
    async fn mark_running(&self, job_id: &str) -> Result<(), QueueError>;

    /// Write the terminal outcome. Returns `false` if one was already recorded,
    /// in which case the earlier record is kept.
    async fn set_result(&self, job_id: &str, outcome: &JobOutcome) -> Result<bool, QueueError>;

    /// Drop the in-flight copy of a message once its outcome is stored.
    async fn acknowledge(&self, message: &JobMessage) -> Result<(), QueueError>;

    /// Current view of a job. Unknown ids read as pending.
    async fn get_state(&self, job_id: &str) -> Result<JobView, QueueError>;

    /// Number of messages waiting to be picked up.
    async fn queue_depth(&self) -> Result<u64, QueueError>;

    /// Check store connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed job store. The queue and the results may live in different
/// databases or servers.
pub struct RedisJobStore {
    broker: redis::Client,
    results: redis::Client,
    queue_key: String,
    processing_key: String,
    result_ttl: Duration,
}

impl RedisJobStore {
    pub fn new(
        broker_url: &str,
        result_backend_url: &str,
        queue_name: &str,
        result_ttl: Duration,
    ) -> Result<Self, QueueError> {
        let broker = redis::Client::open(broker_url).map_err(QueueError::Redis)?;
        let results = redis::Client::open(result_backend_url).map_err(QueueError::Redis)?;
        Ok(Self {
            broker,
            results,
            queue_key: queue_name.to_string(),
            processing_key: format!("{queue_name}:processing"),
            result_ttl,
        })
    }

    fn ttl_secs(&self) -> u64 {
        self.result_ttl.as_secs().max(1)
    }

    async fn broker_conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.broker
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    async fn results_conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.results
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError> {
        let mut conn = self.broker_conn().await?;
        let payload = serde_json::to_string(message).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn try_fetch(&self, block: Duration) -> Result<Option<JobMessage>, QueueError> {
        let mut conn = self.broker_conn().await?;

        // Atomic move: exactly one consumer receives each payload.
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_key)
            .arg(&self.processing_key)
            .arg(block.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<JobMessage>(&payload) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                let job_id = recover_job_id(&payload);
                tracing::error!(
                    error = %e,
                    job_id = job_id.as_deref().unwrap_or("unknown"),
                    "Discarding undecodable queue entry"
                );
                if let Some(job_id) = job_id {
                    self.set_result(&job_id, &JobOutcome::failure(MALFORMED_MESSAGE))
                        .await?;
                }
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload)
                    .await
                    .map_err(QueueError::Redis)?;
                Ok(None)
            }
        }
    }

    async fn mark_running(&self, job_id: &str) -> Result<(), QueueError> {
        let mut conn = self.results_conn().await?;
        conn.set_ex::<_, _, ()>(
            format!("{RUNNING_KEY_PREFIX}{job_id}"),
            1,
            self.ttl_secs(),
        )
        .await
        .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn set_result(&self, job_id: &str, outcome: &JobOutcome) -> Result<bool, QueueError> {
        let mut conn = self.results_conn().await?;
        let meta = TaskMeta::from_outcome(job_id, outcome);
        let payload = serde_json::to_string(&meta).map_err(QueueError::Serialize)?;

        // NX keeps the first terminal record.
        let written: Option<String> = redis::cmd("SET")
            .arg(format!("{RESULT_KEY_PREFIX}{job_id}"))
            .arg(&payload)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        conn.del::<_, ()>(format!("{RUNNING_KEY_PREFIX}{job_id}"))
            .await
            .map_err(QueueError::Redis)?;

        Ok(written.is_some())
    }

    async fn acknowledge(&self, message: &JobMessage) -> Result<(), QueueError> {
        let mut conn = self.broker_conn().await?;
        let payload = serde_json::to_string(message).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn get_state(&self, job_id: &str) -> Result<JobView, QueueError> {
        let mut conn = self.results_conn().await?;
        let stored: Option<String> = conn
            .get(format!("{RESULT_KEY_PREFIX}{job_id}"))
            .await
            .map_err(QueueError::Redis)?;

        if let Some(payload) = stored {
            let meta: TaskMeta = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
            return Ok(meta.into());
        }

        let running: bool = conn
            .exists(format!("{RUNNING_KEY_PREFIX}{job_id}"))
            .await
            .map_err(QueueError::Redis)?;

        Ok(if running {
            JobView::running()
        } else {
            JobView::pending()
        })
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.broker_conn().await?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut broker = self.broker_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut broker)
            .await
            .map_err(QueueError::Redis)?;

        let mut results = self.results_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut results)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// Pull the job id out of an entry that does not decode as a [`JobMessage`].
fn recover_job_id(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
