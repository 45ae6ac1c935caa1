pub mod chat;

pub use chat::ChatCompletionsClient;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub vision_model: String,
    pub image_model: String,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o".into());
        Self {
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            api_key: std::env::var("LLM_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            vision_model: std::env::var("LLM_VISION_MODEL").unwrap_or_else(|_| model.clone()),
            image_model: std::env::var("LLM_IMAGE_MODEL")
                .unwrap_or_else(|_| "dall-e-3".into()),
            temperature: std::env::var("LLM_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.7),
            model,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing completion endpoint")]
    MissingEndpoint,
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One structured-output request. `images` are URLs or `data:` URIs that
/// are attached to the user turn.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub schema_hint: Option<String>,
    pub images: Vec<String>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, hint: impl Into<String>) -> Self {
        self.schema_hint = Some(hint.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the raw text of the first choice. Callers own JSON parsing.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Returns a URL (or `data:` URI) for one generated image.
    async fn generate_image(&self, prompt: &str) -> Result<String, LlmError>;
}
