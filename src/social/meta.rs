use super::config::MetaSettings;
use super::credentials::CredentialStore;
use super::media::MediaRef;
use super::{Platform, PlatformPublisher, PublishRequest, PublishResult, compose_text};
use crate::http::{build_client, snippet};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub struct MetaPublisher {
    http: Client,
    settings: MetaSettings,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Debug, Serialize)]
struct MediaPost {
    caption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
}

impl MetaPublisher {
    pub fn new(settings: MetaSettings, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: build_client(),
            settings,
            credentials,
        }
    }
}

#[async_trait]
impl PlatformPublisher for MetaPublisher {
    fn platform(&self) -> Platform {
        Platform::Meta
    }

    async fn publish(&self, request: &PublishRequest) -> PublishResult {
        let platform = Platform::Meta;
        let token = self.credentials.get(platform).await.access_token;
        let (Some(token), Some(page_id)) = (token, self.settings.page_id.as_deref()) else {
            return PublishResult::error(platform, "Meta credentials not configured");
        };

        // the graph API fetches media itself, so only public URLs can be attached
        let image_url = request
            .media
            .as_deref()
            .map(MediaRef::parse)
            .and_then(|media| media.public_url().map(str::to_string));
        let media_attached = image_url.is_some();
        let body = MediaPost {
            caption: compose_text(None, &request.body, &request.hashtags),
            image_url,
        };

        let url = format!(
            "{}/{}/media",
            self.settings.api_root.trim_end_matches('/'),
            urlencoding::encode(page_id)
        );
        let response = match self
            .http
            .post(url)
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return PublishResult::error(platform, format!("Meta posting error: {err}"));
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let mut result = if status.is_success() {
            let post_id = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
            PublishResult::success(platform, post_id)
        } else {
            PublishResult::error(platform, format!("Meta API error: {}", status.as_u16()))
                .with_details(snippet(&text))
        };
        result.media_attached = media_attached && result.is_success();
        result
    }
}
