use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::AppConfig;
use crate::models::job::CaptionResult;
use crate::services::normalizer::DecodedImage;

/// Image-to-text backend. Implementations must be safe to share across jobs.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image: &DecodedImage) -> Result<CaptionResult, InferenceError>;
}

/// Builds a captioner. Called by [`ModelHandle`] on first use.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Captioner>, InferenceError>;
}

/// Lazily loaded captioner owned by a worker process.
///
/// The first caller loads the model; concurrent callers wait for that load
/// instead of starting their own. A failed load is not cached.
pub struct ModelHandle {
    loader: Box<dyn ModelLoader>,
    model: OnceCell<Arc<dyn Captioner>>,
}

impl ModelHandle {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            model: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn Captioner>, InferenceError> {
        self.model
            .get_or_try_init(|| self.loader.load())
            .await
            .map(Arc::clone)
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }
}

/// Settings for the Workers AI image-to-text backend.
#[derive(Debug, Clone)]
pub struct WorkersAiSettings {
    pub api_base: String,
    pub account_id: Option<String>,
    pub api_token: Option<String>,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

impl WorkersAiSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            api_base: config.cf_api_base.clone(),
            account_id: config.cf_account_id.clone(),
            api_token: config.cf_api_token.clone(),
            model: config.caption_model.clone(),
            prompt: config.caption_prompt.clone(),
            max_tokens: config.caption_max_tokens,
        }
    }
}

/// Loads a [`WorkersAiClient`] once credentials are confirmed present.
pub struct WorkersAiLoader {
    settings: WorkersAiSettings,
}

impl WorkersAiLoader {
    pub fn new(settings: WorkersAiSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ModelLoader for WorkersAiLoader {
    async fn load(&self) -> Result<Arc<dyn Captioner>, InferenceError> {
        let s = &self.settings;
        let account_id = s
            .account_id
            .clone()
            .ok_or(InferenceError::MissingCredential("CF_ACCOUNT_ID"))?;
        let api_token = s
            .api_token
            .clone()
            .ok_or(InferenceError::MissingCredential("CF_API_TOKEN"))?;

        tracing::info!(model = %s.model, "Loading caption model client");
        Ok(Arc::new(WorkersAiClient::new(
            &s.api_base,
            &account_id,
            api_token,
            &s.model,
            s.prompt.clone(),
            s.max_tokens,
        )))
    }
}

/// Client for a Cloudflare Workers AI image-to-text model.
pub struct WorkersAiClient {
    http: Client,
    url: String,
    api_token: String,
    prompt: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ImageToTextRequest<'a> {
    image: Vec<u8>,
    prompt: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ImageToTextResponse {
    result: ImageToTextResult,
}

#[derive(Deserialize)]
struct ImageToTextResult {
    description: String,
}

impl WorkersAiClient {
    pub fn new(
        api_base: &str,
        account_id: &str,
        api_token: String,
        model: &str,
        prompt: String,
        max_tokens: u32,
    ) -> Self {
        Self {
            http: Client::new(),
            url: format!(
                "{}/accounts/{}/ai/run/{}",
                api_base.trim_end_matches('/'),
                account_id,
                model
            ),
            api_token,
            prompt,
            max_tokens,
        }
    }
}

#[async_trait]
impl Captioner for WorkersAiClient {
    async fn caption(&self, image: &DecodedImage) -> Result<CaptionResult, InferenceError> {
        let png = image.to_png().map_err(InferenceError::Encode)?;

        let request_body = ImageToTextRequest {
            image: png,
            prompt: &self.prompt,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await
            .map_err(InferenceError::Http)?
            .error_for_status()
            .map_err(InferenceError::Http)?;

        let body: ImageToTextResponse = response.json().await.map_err(InferenceError::Http)?;

        let caption = body.result.description.trim().to_string();
        if caption.is_empty() {
            return Err(InferenceError::EmptyCaption);
        }

        Ok(CaptionResult {
            caption,
            width: image.width(),
            height: image.height(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Failed to encode image for inference: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model returned an empty caption")]
    EmptyCaption,
}
