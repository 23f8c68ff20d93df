use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Gateway bind address (e.g., "0.0.0.0:3000"). Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Redis connection string for job state and results
    #[serde(default = "default_result_backend_url")]
    pub result_backend_url: String,

    /// Name of the queue every caption job is routed to
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Timeout for downloading a remote image, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Lifetime of a stored job state record, in seconds
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Upper bound for uploaded or downloaded image bodies
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Number of concurrent job loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Optional Prometheus listener for the worker (e.g., "0.0.0.0:9100")
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,

    /// Cloudflare account ID. Required by the worker once the model loads.
    #[serde(default)]
    pub cf_account_id: Option<String>,

    /// Cloudflare Workers AI API token
    #[serde(default)]
    pub cf_api_token: Option<String>,

    /// Workers AI REST base URL
    #[serde(default = "default_cf_api_base")]
    pub cf_api_base: String,

    /// Image-to-text model identifier
    #[serde(default = "default_caption_model")]
    pub caption_model: String,

    #[serde(default = "default_caption_prompt")]
    pub caption_prompt: String,

    #[serde(default = "default_caption_max_tokens")]
    pub caption_max_tokens: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_broker_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_result_backend_url() -> String {
    "redis://localhost:6379/1".to_string()
}

fn default_queue_name() -> String {
    "captions".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_result_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_cf_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_caption_model() -> String {
    "@cf/llava-hf/llava-1.5-7b-hf".to_string()
}

fn default_caption_prompt() -> String {
    "Describe this image in one sentence.".to_string()
}

fn default_caption_max_tokens() -> u32 {
    64
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}
