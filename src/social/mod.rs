//! Publishing gateway.
//!
//! Every adapter folds its failures into a [`PublishResult`]; nothing in
//! this module returns an error to the orchestrator.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod linkedin;
pub mod media;
pub mod medium;
pub mod meta;

pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use linkedin::LinkedinPublisher;
pub use medium::MediumPublisher;
pub use meta::MetaPublisher;

use crate::metrics;
use crate::stages::GeneratedContent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{collections::HashSet, fmt, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linkedin,
    Meta,
    Medium,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linkedin => "linkedin",
            Platform::Meta => "meta",
            Platform::Medium => "medium",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Platform::Linkedin => "LinkedIn",
            Platform::Meta => "Meta",
            Platform::Medium => "Medium",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "linkedin" => Ok(Platform::Linkedin),
            "meta" | "facebook" | "instagram" => Ok(Platform::Meta),
            "medium" | "blog" => Ok(Platform::Medium),
            _ => Err(format!("unknown platform: {input}")),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-internal failures. Always folded into a [`PublishResult`].
#[derive(Debug, Error)]
pub enum SocialError {
    #[error("{0}")]
    NotConfigured(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("media upload failed: {0}")]
    Upload(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Success,
    Error,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishResult {
    pub platform: Platform,
    pub status: PublishStatus,
    pub message: String,
    pub post_id: Option<String>,
    pub details: Option<String>,
    pub refresh_attempts: u32,
    pub media_attached: bool,
}

impl PublishResult {
    pub fn success(platform: Platform, post_id: Option<String>) -> Self {
        Self {
            platform,
            status: PublishStatus::Success,
            message: format!("Post published to {}", platform.display_name()),
            post_id,
            details: None,
            refresh_attempts: 0,
            media_attached: false,
        }
    }

    pub fn error(platform: Platform, message: impl Into<String>) -> Self {
        Self {
            platform,
            status: PublishStatus::Error,
            message: message.into(),
            post_id: None,
            details: None,
            refresh_attempts: 0,
            media_attached: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == PublishStatus::Success
    }
}

/// Platform-neutral post. Adapters decide how title, body and tags combine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishRequest {
    pub title: Option<String>,
    pub body: String,
    pub hashtags: Vec<String>,
    pub media: Option<String>,
}

impl PublishRequest {
    pub fn for_platform(
        platform: Platform,
        content: &GeneratedContent,
        media: Option<&str>,
    ) -> Self {
        let media = media.map(str::to_string);
        match platform {
            Platform::Linkedin => Self {
                title: Some(content.linkedin_post.title.clone()),
                body: content.linkedin_post.content.clone(),
                hashtags: content.linkedin_post.hashtags.clone(),
                media,
            },
            Platform::Meta => Self {
                title: None,
                body: content.meta_post.caption.clone(),
                hashtags: content.meta_post.hashtags.clone(),
                media,
            },
            Platform::Medium => Self {
                title: Some(content.blog_post.title.clone()),
                body: content.blog_post.content.clone(),
                hashtags: content.blog_post.seo_keywords.clone(),
                media: None,
            },
        }
    }
}

#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    fn platform(&self) -> Platform;

    async fn publish(&self, request: &PublishRequest) -> PublishResult;
}

#[derive(Clone, Default)]
pub struct PublishingGateway {
    publishers: Vec<Arc<dyn PlatformPublisher>>,
    targets: Vec<Platform>,
}

impl PublishingGateway {
    pub fn new(targets: Vec<Platform>) -> Self {
        Self {
            publishers: Vec::new(),
            targets,
        }
    }

    pub fn register(mut self, publisher: Arc<dyn PlatformPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Platforms that receive content after every successful generation.
    pub fn targets(&self) -> &[Platform] {
        &self.targets
    }

    pub async fn publish(&self, platform: Platform, request: &PublishRequest) -> PublishResult {
        let Some(publisher) = self.publishers.iter().find(|p| p.platform() == platform) else {
            return PublishResult::error(
                platform,
                format!("{} publisher not configured", platform.display_name()),
            );
        };
        let result = publisher.publish(request).await;
        metrics::publish_outcome(platform.as_str(), result.is_success(), result.refresh_attempts);
        if result.is_success() {
            info!(
                target = "catalyst.social",
                platform = platform.as_str(),
                post_id = result.post_id.as_deref().unwrap_or("unknown"),
                refresh_attempts = result.refresh_attempts,
                media_attached = result.media_attached,
                "publish_succeeded"
            );
        } else {
            warn!(
                target = "catalyst.social",
                platform = platform.as_str(),
                message = %result.message,
                refresh_attempts = result.refresh_attempts,
                "publish_failed"
            );
        }
        result
    }

    /// Publishes to every target in order. One attempt per platform.
    pub async fn publish_content(
        &self,
        content: &GeneratedContent,
        media: Option<&str>,
    ) -> Vec<PublishResult> {
        let mut results = Vec::with_capacity(self.targets.len());
        for platform in &self.targets {
            let request = PublishRequest::for_platform(*platform, content, media);
            results.push(self.publish(*platform, &request).await);
        }
        results
    }
}

/// ASCII-only text: typographic quotes and dashes are mapped first, anything
/// else outside ASCII is dropped.
pub fn ascii_text(input: &str) -> String {
    input
        .chars()
        .filter_map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' => Some('"'),
            '\u{2018}' | '\u{2019}' | '\u{201A}' => Some('\''),
            '\u{2013}' | '\u{2014}' => Some('-'),
            '\u{2026}' => Some('.'),
            '\u{00A0}' => Some(' '),
            c if c.is_ascii() => Some(c),
            _ => None,
        })
        .collect()
}

/// `#tag` line with a single leading `#` per tag, duplicates removed.
pub fn hashtag_line(tags: &[String]) -> String {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| tag.trim().trim_start_matches('#').replace(' ', ""))
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title, body and hashtags joined by blank lines.
pub fn compose_text(title: Option<&str>, body: &str, tags: &[String]) -> String {
    let mut parts = Vec::new();
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(title.to_string());
    }
    if !body.trim().is_empty() {
        parts.push(body.trim().to_string());
    }
    let tags = hashtag_line(tags);
    if !tags.is_empty() {
        parts.push(tags);
    }
    parts.join("\n\n")
}
