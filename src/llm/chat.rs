use super::{CompletionProvider, CompletionRequest, LlmConfig, LlmError};
use crate::http::{build_client, snippet};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client for OpenAI-compatible `/chat/completions` and `/images/generations`.
pub struct ChatCompletionsClient {
    http: Client,
    config: LlmConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Self {
        Self::with_client(build_client(), config)
    }

    pub fn with_client(http: Client, config: LlmConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, path: &str) -> Result<String, LlmError> {
        let base = self.config.base_url.trim();
        if base.is_empty() {
            return Err(LlmError::MissingEndpoint);
        }
        Ok(format!("{}/{path}", base.trim_end_matches('/')))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionsClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = self.endpoint("chat/completions")?;

        let mut system = request.system.clone();
        if let Some(hint) = &request.schema_hint {
            system.push_str("\n\nRespond with a JSON object matching:\n");
            system.push_str(hint);
        }

        let (model, user) = if request.images.is_empty() {
            (&self.config.model, MessageContent::Text(request.user.clone()))
        } else {
            let mut parts = vec![ContentPart::Text {
                text: request.user.clone(),
            }];
            parts.extend(request.images.iter().map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            }));
            (&self.config.vision_model, MessageContent::Parts(parts))
        };

        let body = ChatRequest {
            model: model.clone(),
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };

        debug!(
            target = "catalyst.llm",
            model = %body.model,
            images = request.images.len(),
            "chat_completion_request"
        );

        let response = self
            .authorize(self.http.post(url).json(&body))
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        let response = check_status(response).await?;

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("missing message content".into()))
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, LlmError> {
        let url = self.endpoint("images/generations")?;
        let body = ImageRequest {
            model: self.config.image_model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: "1024x1024",
        };

        let response = self
            .authorize(self.http.post(url).json(&body))
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        let response = check_status(response).await?;

        let payload: ImageResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let image = payload
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no image returned".into()))?;
        match (image.url, image.b64_json) {
            (Some(url), _) => Ok(url),
            (None, Some(b64)) => Ok(format!("data:image/png;base64,{b64}")),
            (None, None) => Err(LlmError::InvalidResponse(
                "image entry has neither url nor b64_json".into(),
            )),
        }
    }
}

async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = format!("HTTP {status}: {}", snippet(&body));
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited(detail),
        _ => LlmError::Http(detail),
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    model: String,
    prompt: String,
    n: u8,
    size: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}
