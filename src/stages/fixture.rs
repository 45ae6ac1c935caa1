use super::{
    BlogPost, ContentInput, ExecutorMode, GeneratedContent, GeneratedImage, GeneratedImages,
    ImageInput, LinkedinPost, MarketData, MetaPost, ProductData, ResearchInput, StageError,
    StageExecutor, VisionInput,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::warn;

/// Deterministic executor for demos and offline runs.
///
/// This is a degraded mode, never a fallback: it is chosen at startup and
/// every call logs a warning so synthetic output is never mistaken for
/// real analysis.
#[derive(Debug, Clone, Copy)]
pub struct FixtureExecutor;

impl FixtureExecutor {
    pub fn new() -> Self {
        warn!(
            target = "catalyst.pipeline",
            "fixture stage executor active; stage outputs are synthetic"
        );
        Self
    }
}

impl Default for FixtureExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn degraded(stage: &'static str, product: &str) {
    warn!(
        target = "catalyst.pipeline",
        stage = stage,
        product = product,
        "fixture_stage_output"
    );
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl StageExecutor for FixtureExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::Fixture
    }

    async fn analyze_vision(&self, input: &VisionInput) -> Result<ProductData, StageError> {
        degraded("vision_analysis", &input.product_name);
        Ok(ProductData {
            product_name: input.product_name.clone(),
            category: "General Product".into(),
            primary_colors: vec!["Blue".into(), "White".into()],
            material: Some("Premium materials".into()),
            key_features: vec![
                "High quality construction".into(),
                "Modern design".into(),
                "User-friendly interface".into(),
            ],
            target_demographic: Some("General consumers".into()),
            visual_style: Some("Modern and professional".into()),
            selling_points: vec![
                "Quality craftsmanship".into(),
                "Innovative features".into(),
                "Great value".into(),
            ],
        })
    }

    async fn research_market(&self, input: &ResearchInput) -> Result<MarketData, StageError> {
        degraded("market_research", &input.product.product_name);
        Ok(MarketData {
            search_term: input.search_term(),
            features: Vec::new(),
            competitors: vec!["Competitor A".into(), "Competitor B".into()],
            market_trends: vec![
                "Growing demand for quality products".into(),
                "Shift towards sustainable options".into(),
            ],
            customer_pain_points: vec!["Need for better quality".into(), "Looking for value".into()],
            pricing_insights: object(json!({
                "average_price": "$500-$1000",
                "price_range": "Mid to premium"
            })),
            metadata: object(json!({
                "total_results": 10,
                "total_reviews": 50,
                "total_features": 15
            })),
        })
    }

    async fn generate_content(
        &self,
        input: &ContentInput,
    ) -> Result<GeneratedContent, StageError> {
        let name = &input.product.product_name;
        degraded("content_generation", name);
        Ok(GeneratedContent {
            linkedin_post: LinkedinPost {
                title: format!("Introducing {name}"),
                content: format!(
                    "We're excited to announce {name}! This product combines quality, design and \
                     functionality. Perfect for professionals who demand the best."
                ),
                hashtags: vec!["#Innovation".into(), "#Quality".into(), "#NewProduct".into()],
            },
            meta_post: MetaPost {
                caption: format!(
                    "Check out {name}! The perfect blend of style and substance. Available now!"
                ),
                hashtags: vec!["#NewProduct".into(), "#Innovation".into(), "#Quality".into()],
            },
            blog_post: BlogPost {
                title: format!("Introducing {name}: Innovation Meets Design"),
                content: format!(
                    "# {name}\n\nWe're thrilled to introduce {name}, our latest release.\n\n\
                     ## Key Features\n- Premium quality construction\n- Modern, user-friendly design\n\
                     - Exceptional value\n\nExperience the difference today!"
                ),
                seo_keywords: vec!["innovation".into(), "quality".into(), name.to_lowercase()],
            },
        })
    }

    async fn generate_images(&self, input: &ImageInput) -> Result<GeneratedImages, StageError> {
        degraded("image_generation", &input.product.product_name);
        Ok(GeneratedImages {
            generated_images: vec![
                GeneratedImage {
                    kind: "social_media_post".into(),
                    url: "https://via.placeholder.com/1200x630/4A90E2/ffffff?text=Social+Media+Post"
                        .into(),
                    prompt: "Marketing image for social media".into(),
                },
                GeneratedImage {
                    kind: "blog_header".into(),
                    url: "https://via.placeholder.com/1920x1080/7B68EE/ffffff?text=Blog+Header"
                        .into(),
                    prompt: "Blog post header image".into(),
                },
            ],
        })
    }
}
