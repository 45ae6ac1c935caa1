use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Processing,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    /// A finished project may be run again; a processing one may not.
    pub fn can_transition(&self, next: ProjectStatus) -> bool {
        matches!(
            (self, next),
            (ProjectStatus::Draft, ProjectStatus::Processing)
                | (ProjectStatus::Completed, ProjectStatus::Processing)
                | (ProjectStatus::Failed, ProjectStatus::Processing)
                | (ProjectStatus::Processing, ProjectStatus::Completed)
                | (ProjectStatus::Processing, ProjectStatus::Failed)
        )
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "draft" => Ok(ProjectStatus::Draft),
            "processing" => Ok(ProjectStatus::Processing),
            "completed" => Ok(ProjectStatus::Completed),
            "failed" => Ok(ProjectStatus::Failed),
            _ => Err(format!("unknown project status: {input}")),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub product_name: String,
    pub brand_name: Option<String>,
    pub image_ref: Option<String>,
    pub description: Option<String>,
    pub campaign_goal: Option<String>,
    pub target_audience: Option<String>,
    pub brand_persona: Option<String>,
    pub status: ProjectStatus,
    /// The run that last claimed the project. Only that run may settle it.
    pub run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(request: CreateProjectRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_name: request.product_name.trim().to_string(),
            brand_name: non_empty(request.brand_name),
            image_ref: non_empty(request.image_ref),
            description: non_empty(request.description),
            campaign_goal: non_empty(request.campaign_goal),
            target_audience: non_empty(request.target_audience),
            brand_persona: non_empty(request.brand_persona),
            status: ProjectStatus::Draft,
            run_id: None,
            created_at: Utc::now(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub product_name: String,
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub campaign_goal: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub brand_persona: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    VisionAnalysis,
    MarketResearch,
    ContentGeneration,
    ImageGeneration,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::VisionAnalysis => "VISION_ANALYSIS",
            StageKind::MarketResearch => "MARKET_RESEARCH",
            StageKind::ContentGeneration => "CONTENT_GENERATION",
            StageKind::ImageGeneration => "IMAGE_GENERATION",
        }
    }

    /// Short name used in stage reports, log fields and error payloads.
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::VisionAnalysis => "vision_analysis",
            StageKind::MarketResearch => "market_research",
            StageKind::ContentGeneration => "content_generation",
            StageKind::ImageGeneration => "image_generation",
        }
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "VISION_ANALYSIS" => Ok(StageKind::VisionAnalysis),
            "MARKET_RESEARCH" => Ok(StageKind::MarketResearch),
            "CONTENT_GENERATION" => Ok(StageKind::ContentGeneration),
            "IMAGE_GENERATION" => Ok(StageKind::ImageGeneration),
            _ => Err(format!("unknown stage: {input}")),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("unknown job status: {input}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage attempt.
///
/// `output_payload` is present iff the job completed and `error_message`
/// iff it failed. Only the ledger moves a job out of `running`, and a
/// finished job is never touched again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub stage: StageKind,
    pub status: JobStatus,
    pub input_payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    LinkedinPost,
    MetaPost,
    BlogPost,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::LinkedinPost => "linkedin_post",
            AssetKind::MetaPost => "meta_post",
            AssetKind::BlogPost => "blog_post",
        }
    }
}

impl std::str::FromStr for AssetKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "linkedin_post" => Ok(AssetKind::LinkedinPost),
            "meta_post" => Ok(AssetKind::MetaPost),
            "blog_post" => Ok(AssetKind::BlogPost),
            _ => Err(format!("unknown asset type: {input}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: Uuid,
    pub project_id: Uuid,
    pub asset_type: AssetKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(project_id: Uuid, asset_type: AssetKind, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            asset_type,
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
