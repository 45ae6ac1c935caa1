use super::{
    ContentInput, ExecutorMode, GeneratedContent, GeneratedImage, GeneratedImages, ImageInput,
    MarketData, ProductData, ResearchInput, StageError, StageExecutor, VisionInput, parse_json,
};
use crate::llm::{CompletionProvider, CompletionRequest};
use crate::market::MarketDataProvider;
use crate::social::media::MediaRef;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::debug;

const VISION_PROMPT: &str = r#"
You are a product analyst. Study the product image and notes and describe the product for a marketing team.
Identify the product name, its retail category, dominant colors, material, standout features, the likely
target demographic, the visual style and the strongest selling points. Output JSON only.
"#;

const VISION_SCHEMA: &str = r##"{"product_name": "string", "category": "string", "primary_colors": ["string"], "material": "string", "key_features": ["string"], "target_demographic": "string", "visual_style": "string", "selling_points": ["string"]}"##;

const RESEARCH_PROMPT: &str = r#"
You are a market analyst. Using the product profile and the aggregated search signal, summarise the competitive
landscape: named competitors, current market trends, recurring customer pain points and pricing insights.
An empty search signal is acceptable; rely on the product profile. Output JSON only.
"#;

const RESEARCH_SCHEMA: &str = r##"{"competitors": ["string"], "market_trends": ["string"], "customer_pain_points": ["string"], "pricing_insights": {"average_price": "string", "price_range": "string"}}"##;

const CONTENT_PROMPT: &str = r#"
You are an expert content strategist and copywriter. Create marketing content for three platforms:
LinkedIn (professional, value focused), a long-form blog post (SEO friendly, markdown headings) and
Meta (short engaging caption). Use the key features and selling points from the product profile, weave in
customer pain points from the research and keep the tone consistent with the visual style. Output JSON only.
"#;

const CONTENT_SCHEMA: &str = r##"{"linkedin_post": {"title": "string", "content": "string", "hashtags": ["#tag"]}, "blog_post": {"title": "string", "content": "markdown", "seo_keywords": ["string"]}, "meta_post": {"caption": "string", "hashtags": ["#tag"]}}"##;

/// Network-backed executor.
pub struct LiveExecutor {
    completions: Arc<dyn CompletionProvider>,
    market: Arc<dyn MarketDataProvider>,
}

impl LiveExecutor {
    pub fn new(
        completions: Arc<dyn CompletionProvider>,
        market: Arc<dyn MarketDataProvider>,
    ) -> Self {
        Self {
            completions,
            market,
        }
    }
}

#[derive(Deserialize)]
struct ResearchSynthesis {
    #[serde(default)]
    competitors: Vec<String>,
    #[serde(default)]
    market_trends: Vec<String>,
    #[serde(default)]
    customer_pain_points: Vec<String>,
    #[serde(default)]
    pricing_insights: Map<String, Value>,
}

#[async_trait]
impl StageExecutor for LiveExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::Live
    }

    async fn analyze_vision(&self, input: &VisionInput) -> Result<ProductData, StageError> {
        let notes = json!({
            "product_name": input.product_name,
            "brand_name": input.brand_name,
            "description": input.description,
        });
        let mut request = CompletionRequest::new(VISION_PROMPT, notes.to_string())
            .with_schema(VISION_SCHEMA);
        if let Some(image) = &input.image_ref {
            request = request.with_image(MediaRef::parse(image).inline_url().await?);
        }

        let raw = self.completions.complete(&request).await?;
        parse_json::<ProductData>(&raw)?.validate()
    }

    async fn research_market(&self, input: &ResearchInput) -> Result<MarketData, StageError> {
        let term = input.search_term();
        let signal = self.market.search(&term).await?;
        debug!(
            target = "catalyst.pipeline",
            term = %term,
            features = signal.features.len(),
            "market_signal"
        );

        let prompt = json!({
            "product": input.product,
            "search_term": term,
            "features": signal.features.iter().take(10).collect::<Vec<_>>(),
            "metadata": signal.metadata,
        });
        let request =
            CompletionRequest::new(RESEARCH_PROMPT, prompt.to_string()).with_schema(RESEARCH_SCHEMA);
        let raw = self.completions.complete(&request).await?;
        let synthesis: ResearchSynthesis = parse_json(&raw)?;

        Ok(MarketData {
            search_term: term,
            features: signal.features,
            competitors: synthesis.competitors,
            market_trends: synthesis.market_trends,
            customer_pain_points: synthesis.customer_pain_points,
            pricing_insights: synthesis.pricing_insights,
            metadata: signal.metadata,
        })
    }

    async fn generate_content(
        &self,
        input: &ContentInput,
    ) -> Result<GeneratedContent, StageError> {
        let prompt = json!({
            "product": input.product,
            "market_research": {
                "search_term": input.market.search_term,
                "top_features": input.market.features.iter().take(5).collect::<Vec<_>>(),
                "customer_pain_points": input.market.customer_pain_points,
                "competitors": input.market.competitors,
                "total_reviews": input.market.metadata.get("total_reviews").cloned().unwrap_or(json!(0)),
            },
            "campaign_goal": input.campaign_goal,
            "target_audience": input.target_audience,
            "brand_persona": input.brand_persona,
        });
        let request =
            CompletionRequest::new(CONTENT_PROMPT, prompt.to_string()).with_schema(CONTENT_SCHEMA);
        let raw = self.completions.complete(&request).await?;
        parse_json::<GeneratedContent>(&raw)?.validate()
    }

    async fn generate_images(&self, input: &ImageInput) -> Result<GeneratedImages, StageError> {
        let style = input
            .product
            .visual_style
            .as_deref()
            .unwrap_or("clean studio lighting");
        let shots = [
            (
                "social_media_post",
                format!(
                    "Marketing image for social media featuring {} ({}), {style}, highlighting {}",
                    input.product.product_name,
                    input.product.category,
                    input.product.selling_points.join(", ")
                ),
            ),
            (
                "blog_header",
                format!(
                    "Wide blog header image for {}, {style}, conveying {}",
                    input.product.product_name,
                    input.market.market_trends.first().map(String::as_str).unwrap_or("quality")
                ),
            ),
        ];

        let mut generated = Vec::with_capacity(shots.len());
        for (kind, prompt) in shots {
            let url = self.completions.generate_image(&prompt).await?;
            generated.push(GeneratedImage {
                kind: kind.to_string(),
                url,
                prompt,
            });
        }
        Ok(GeneratedImages {
            generated_images: generated,
        })
    }
}
