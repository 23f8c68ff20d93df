use garde::Validate;
use serde::{Deserialize, Serialize};

/// JSON body for `POST /caption`.
#[derive(Debug, Deserialize, Validate)]
pub struct CaptionRequest {
    /// Remote URL or inline base64 payload (up to 16 MiB of text).
    #[garde(length(min = 1, max = 16777216))]
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Response after submitting a caption job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}
