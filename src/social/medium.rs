use super::config::MediumSettings;
use super::credentials::CredentialStore;
use super::{Platform, PlatformPublisher, PublishRequest, PublishResult};
use crate::http::{build_client, snippet};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const MAX_TAGS: usize = 5;

pub struct MediumPublisher {
    http: Client,
    settings: MediumSettings,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediumPost<'a> {
    title: &'a str,
    content: &'a str,
    content_format: &'static str,
    publish_status: &'static str,
    tags: Vec<String>,
}

impl MediumPublisher {
    pub fn new(settings: MediumSettings, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http: build_client(),
            settings,
            credentials,
        }
    }
}

fn medium_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .take(MAX_TAGS)
        .collect()
}

#[async_trait]
impl PlatformPublisher for MediumPublisher {
    fn platform(&self) -> Platform {
        Platform::Medium
    }

    async fn publish(&self, request: &PublishRequest) -> PublishResult {
        let platform = Platform::Medium;
        let token = self.credentials.get(platform).await.access_token;
        let (Some(token), Some(user_id)) = (token, self.settings.user_id.as_deref()) else {
            return PublishResult::error(platform, "Medium credentials not configured");
        };

        let post = MediumPost {
            title: request.title.as_deref().unwrap_or_default(),
            content: &request.body,
            content_format: "markdown",
            publish_status: "public",
            tags: medium_tags(&request.hashtags),
        };
        let url = format!(
            "{}/v1/users/{}/posts",
            self.settings.api_root.trim_end_matches('/'),
            urlencoding::encode(user_id)
        );

        let response = match self.http.post(url).bearer_auth(&token).json(&post).send().await {
            Ok(response) => response,
            Err(err) => {
                return PublishResult::error(platform, format!("Medium posting error: {err}"));
            }
        };
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            let post_id = serde_json::from_str::<Value>(&text).ok().and_then(|v| {
                v.pointer("/data/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            PublishResult::success(platform, post_id)
        } else {
            PublishResult::error(platform, format!("Medium API error: {}", status.as_u16()))
                .with_details(snippet(&text))
        }
    }
}
