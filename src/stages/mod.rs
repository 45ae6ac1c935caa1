//! Stage executors.
//!
//! Each executor method performs one bounded round trip against an external
//! collaborator and maps the answer into a typed output. Executors never see
//! the ledger; recording outcomes is the orchestrator's job.

pub mod fixture;
pub mod live;

pub use fixture::FixtureExecutor;
pub use live::LiveExecutor;

use crate::llm::LlmError;
use crate::market::MarketDataError;
use crate::models::AssetKind;
use crate::social::media::MediaError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("completion provider failed: {0}")]
    Completion(#[from] LlmError),
    #[error("market data provider failed: {0}")]
    MarketData(#[from] MarketDataError),
    #[error("media unavailable: {0}")]
    Media(#[from] MediaError),
    #[error("response does not match schema: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    Live,
    Fixture,
}

impl ExecutorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorMode::Live => "live",
            ExecutorMode::Fixture => "fixture",
        }
    }
}

impl std::str::FromStr for ExecutorMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "live" => Ok(ExecutorMode::Live),
            "fixture" | "mock" => Ok(ExecutorMode::Fixture),
            _ => Err(format!("unknown executor mode: {input}")),
        }
    }
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn mode(&self) -> ExecutorMode;

    async fn analyze_vision(&self, input: &VisionInput) -> Result<ProductData, StageError>;

    async fn research_market(&self, input: &ResearchInput) -> Result<MarketData, StageError>;

    async fn generate_content(&self, input: &ContentInput)
    -> Result<GeneratedContent, StageError>;

    async fn generate_images(&self, input: &ImageInput) -> Result<GeneratedImages, StageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionInput {
    pub product_name: String,
    pub brand_name: Option<String>,
    pub description: Option<String>,
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductData {
    pub product_name: String,
    pub category: String,
    #[serde(default)]
    pub primary_colors: Vec<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub key_features: Vec<String>,
    #[serde(default)]
    pub target_demographic: Option<String>,
    #[serde(default)]
    pub visual_style: Option<String>,
    #[serde(default)]
    pub selling_points: Vec<String>,
}

impl ProductData {
    fn validate(self) -> Result<Self, StageError> {
        require_text("product_name", &self.product_name)?;
        require_text("category", &self.category)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchInput {
    pub brand_name: Option<String>,
    pub product: ProductData,
}

impl ResearchInput {
    pub fn search_term(&self) -> String {
        match self.brand_name.as_deref() {
            Some(brand) if !self.product.product_name.contains(brand) => {
                format!("{brand} {}", self.product.product_name)
            }
            _ => self.product.product_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketData {
    pub search_term: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub market_trends: Vec<String>,
    #[serde(default)]
    pub customer_pain_points: Vec<String>,
    #[serde(default)]
    pub pricing_insights: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentInput {
    pub product: ProductData,
    pub market: MarketData,
    pub campaign_goal: Option<String>,
    pub target_audience: Option<String>,
    pub brand_persona: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedinPost {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaPost {
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlogPost {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub seo_keywords: Vec<String>,
}

/// All three variants are mandatory; a response missing one is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedContent {
    pub linkedin_post: LinkedinPost,
    pub meta_post: MetaPost,
    pub blog_post: BlogPost,
}

impl GeneratedContent {
    fn validate(self) -> Result<Self, StageError> {
        require_text("linkedin_post.content", &self.linkedin_post.content)?;
        require_text("meta_post.caption", &self.meta_post.caption)?;
        require_text("blog_post.content", &self.blog_post.content)?;
        Ok(self)
    }

    /// Serialized body per variant, in asset creation order.
    pub fn variants(&self) -> Result<Vec<(AssetKind, String)>, serde_json::Error> {
        Ok(vec![
            (
                AssetKind::LinkedinPost,
                serde_json::to_string(&self.linkedin_post)?,
            ),
            (AssetKind::MetaPost, serde_json::to_string(&self.meta_post)?),
            (AssetKind::BlogPost, serde_json::to_string(&self.blog_post)?),
        ])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInput {
    pub product: ProductData,
    pub market: MarketData,
    pub reference_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedImage {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedImages {
    pub generated_images: Vec<GeneratedImage>,
}

fn require_text(field: &str, value: &str) -> Result<(), StageError> {
    if value.trim().is_empty() {
        Err(StageError::Schema(format!("`{field}` is missing or empty")))
    } else {
        Ok(())
    }
}

/// Unwraps a response that arrived inside a ```json fence.
pub fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

pub(crate) fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, StageError> {
    let cleaned = strip_markdown_fence(raw);
    serde_json::from_str(&cleaned).map_err(|err| StageError::Schema(err.to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::llm::{CompletionProvider, CompletionRequest, LlmError};
    use crate::market::{MarketDataError, MarketDataProvider, MarketSignal};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers by matching a keyword in the system prompt.
    #[derive(Default)]
    pub struct ScriptedCompletions {
        pub overrides: Vec<(&'static str, String)>,
        pub requests: Mutex<Vec<CompletionRequest>>,
        pub image_failure: Option<String>,
    }

    impl ScriptedCompletions {
        pub fn with(mut self, keyword: &'static str, reply: impl Into<String>) -> Self {
            self.overrides.push((keyword, reply.into()));
            self
        }

        pub fn failing_images(mut self, reason: impl Into<String>) -> Self {
            self.image_failure = Some(reason.into());
            self
        }

        pub fn recorded(&self) -> Vec<CompletionRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }

        fn default_reply(system: &str) -> String {
            if system.contains("product analyst") {
                json!({
                    "product_name": "Trail Runner X",
                    "category": "Footwear",
                    "primary_colors": ["Slate"],
                    "key_features": ["Grippy outsole"],
                    "selling_points": ["Light"]
                })
                .to_string()
            } else if system.contains("market analyst") {
                json!({
                    "competitors": ["Summit Pro"],
                    "market_trends": ["Trail running growth"],
                    "customer_pain_points": ["Blisters"],
                    "pricing_insights": {"average_price": "$140"}
                })
                .to_string()
            } else {
                json!({
                    "linkedin_post": {"title": "Meet Trail Runner X", "content": "Built for the mountains.", "hashtags": ["#trail", "running"]},
                    "meta_post": {"caption": "Hit the trail", "hashtags": ["#run"]},
                    "blog_post": {"title": "Why Trail Runner X", "content": "# Trail Runner X\n\nGrip.", "seo_keywords": ["trail shoe"]}
                })
                .to_string()
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletions {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            if let Ok(mut seen) = self.requests.lock() {
                seen.push(request.clone());
            }
            for (keyword, reply) in &self.overrides {
                if request.system.contains(keyword) {
                    return Ok(reply.clone());
                }
            }
            Ok(Self::default_reply(&request.system))
        }

        async fn generate_image(&self, prompt: &str) -> Result<String, LlmError> {
            if let Some(reason) = &self.image_failure {
                return Err(LlmError::Http(reason.clone()));
            }
            Ok(format!("https://img.example/{}.png", prompt.len()))
        }
    }

    pub struct StaticMarket(pub MarketSignal);

    #[async_trait]
    impl MarketDataProvider for StaticMarket {
        async fn search(&self, _term: &str) -> Result<MarketSignal, MarketDataError> {
            Ok(self.0.clone())
        }
    }

    pub struct UnreachableMarket;

    #[async_trait]
    impl MarketDataProvider for UnreachableMarket {
        async fn search(&self, _term: &str) -> Result<MarketSignal, MarketDataError> {
            Err(MarketDataError::Http(
                "error sending request: connection refused".into(),
            ))
        }
    }
}
