//! Pipeline orchestrator.
//!
//! Drives one project through its stages strictly in order. Every stage
//! attempt is a ledger job; a failed required stage ends the run and fails
//! the project, while a failed image stage still completes it. Publishing
//! happens inside the content stage and never affects the project's status.
//! Each run claims the project under its own id and stops as soon as it no
//! longer owns it.

pub mod state;

pub use state::{Event, PipelineState};

use crate::ledger::{JobLedger, LedgerError, StoreError};
use crate::metrics;
use crate::models::{
    Asset, CreateProjectRequest, Job, JobStatus, Project, ProjectStatus, StageKind, StageReport,
};
use crate::social::{PublishResult, PublishingGateway};
use crate::stages::{
    ContentInput, GeneratedContent, ImageInput, MarketData, ProductData, ResearchInput,
    StageExecutor, VisionInput,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Pipeline {
    ledger: JobLedger,
    executor: Arc<dyn StageExecutor>,
    gateway: PublishingGateway,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub project_id: Uuid,
    pub status: ProjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<StageKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub jobs: Vec<Job>,
    pub stages: Vec<StageReport>,
    pub publish: Vec<PublishResult>,
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Persistence,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::InvalidInput)
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::NotFound)
    }

    pub fn conflict(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Conflict)
    }

    pub fn persistence(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Persistence)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, message, PipelineErrorKind::Internal)
    }

    fn new(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

fn store_err(stage: &'static str) -> impl Fn(StoreError) -> PipelineError {
    move |err| PipelineError::persistence(stage, err.to_string())
}

fn ledger_err(stage: &'static str) -> impl Fn(LedgerError) -> PipelineError {
    move |err| PipelineError::persistence(stage, err.to_string())
}

/// Outputs handed forward from stage to stage.
#[derive(Default)]
struct Carry {
    product: Option<ProductData>,
    market: Option<MarketData>,
}

#[derive(Default)]
struct Progress {
    stages: Vec<StageReport>,
    publish: Vec<PublishResult>,
}

type StageResult = Result<Result<(), String>, PipelineError>;

impl Pipeline {
    pub fn new(
        ledger: JobLedger,
        executor: Arc<dyn StageExecutor>,
        gateway: PublishingGateway,
    ) -> Self {
        Self {
            ledger,
            executor,
            gateway,
        }
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub async fn create_project(
        &self,
        request: CreateProjectRequest,
    ) -> Result<Project, PipelineError> {
        if request.product_name.trim().is_empty() {
            return Err(PipelineError::invalid_input(
                "create_project",
                "product_name must not be empty",
            ));
        }
        let project = Project::new(request);
        self.ledger
            .store()
            .insert_project(&project)
            .await
            .map_err(store_err("create_project"))?;
        info!(
            target = "catalyst.pipeline",
            project_id = %project.id,
            product = %project.product_name,
            "project_created"
        );
        Ok(project)
    }

    /// Marks a processing project failed. The running pipeline notices before
    /// its next stage and stops; an in-flight stage call is left to finish.
    pub async fn abort(&self, project_id: Uuid) -> Result<Project, PipelineError> {
        let store = self.ledger.store();
        let project = store
            .get_project(project_id)
            .await
            .map_err(store_err("abort"))?
            .ok_or_else(|| PipelineError::not_found("abort", format!("project {project_id}")))?;
        if project.status != ProjectStatus::Processing {
            return Err(PipelineError::conflict(
                "abort",
                format!("project is {}, not processing", project.status),
            ));
        }
        let project = store
            .transition_project(project_id, ProjectStatus::Failed)
            .await
            .map_err(|err| match err {
                StoreError::InvalidTransition { .. } => {
                    PipelineError::conflict("abort", err.to_string())
                }
                other => PipelineError::persistence("abort", other.to_string()),
            })?;
        warn!(target = "catalyst.pipeline", project_id = %project_id, "run_aborted");
        Ok(project)
    }

    /// Runs every stage for `project_id` under a fresh run id.
    ///
    /// A failing stage is not an error here: the report comes back with
    /// status `failed`. `Err` means the run itself broke (store unreachable,
    /// project missing or already running).
    pub async fn run(
        &self,
        project_id: Uuid,
        options: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        self.run_as(project_id, Uuid::new_v4(), options).await
    }

    /// Like [`Pipeline::run`] with a caller-chosen run id. The run only
    /// advances and settles the project while that id still owns it.
    pub async fn run_as(
        &self,
        project_id: Uuid,
        run_id: Uuid,
        options: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        let project = self.begin(project_id, run_id).await?;
        match self.drive(&project, run_id, options).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(
                    target = "catalyst.pipeline",
                    project_id = %project_id,
                    run_id = %run_id,
                    stage = err.stage(),
                    error = %err.detail(),
                    "run_aborted_unexpectedly"
                );
                self.mark_failed(project_id, run_id).await;
                Err(err)
            }
        }
    }

    /// Best-effort move to `failed` after run `run_id` broke. Jobs left
    /// `running` are failed too, unless a newer run has claimed the project.
    pub async fn mark_failed(&self, project_id: Uuid, run_id: Uuid) {
        let store = self.ledger.store();
        let claimed_by_other = match store
            .settle_run(project_id, run_id, ProjectStatus::Failed)
            .await
        {
            Ok(Some(_)) => false,
            Ok(None) => matches!(
                store.get_project(project_id).await,
                Ok(Some(p)) if p.status == ProjectStatus::Processing && p.run_id != Some(run_id)
            ),
            Err(err) => {
                warn!(
                    target = "catalyst.pipeline",
                    project_id = %project_id,
                    error = %err,
                    "mark_failed_skipped"
                );
                false
            }
        };
        if claimed_by_other {
            warn!(
                target = "catalyst.pipeline",
                project_id = %project_id,
                run_id = %run_id,
                "mark_failed_superseded"
            );
            return;
        }
        if let Ok(jobs) = self.ledger.history(project_id).await {
            for job in jobs.iter().filter(|j| j.status == JobStatus::Running) {
                let _ = self.ledger.fail(job, "run interrupted").await;
            }
        }
    }

    async fn begin(&self, project_id: Uuid, run_id: Uuid) -> Result<Project, PipelineError> {
        let store = self.ledger.store();
        let project = store
            .get_project(project_id)
            .await
            .map_err(store_err("start"))?
            .ok_or_else(|| PipelineError::not_found("start", format!("project {project_id}")))?;
        if project.status == ProjectStatus::Processing {
            return Err(PipelineError::conflict(
                "start",
                "project is already processing",
            ));
        }
        store
            .begin_run(project_id, run_id)
            .await
            .map_err(|err| match err {
                StoreError::InvalidTransition { .. } => {
                    PipelineError::conflict("start", err.to_string())
                }
                other => PipelineError::persistence("start", other.to_string()),
            })
    }

    async fn drive(
        &self,
        project: &Project,
        run_id: Uuid,
        options: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        let with_images = project.image_ref.is_some();
        let mut carry = Carry::default();
        let mut progress = Progress::default();
        let mut failure: Option<(StageKind, String)> = None;
        let mut last_stage = StageKind::VisionAnalysis;

        info!(
            target = "catalyst.pipeline",
            project_id = %project.id,
            run_id = %run_id,
            executor = self.executor.mode().as_str(),
            with_images,
            dry_run = options.dry_run,
            "run_started"
        );

        let mut state = transition(PipelineState::Created, Event::Start, with_images)?;
        while let Some(stage) = state.stage() {
            last_stage = stage;
            if self.aborted(project.id, run_id).await? {
                failure = Some((stage, "run aborted".to_string()));
                state = transition(state, Event::Aborted, with_images)?;
                break;
            }

            let outcome = match stage {
                StageKind::VisionAnalysis => {
                    self.vision(project, &mut carry, &mut progress).await?
                }
                StageKind::MarketResearch => {
                    self.research(project, &mut carry, &mut progress).await?
                }
                StageKind::ContentGeneration => {
                    self.content(project, &carry, options, &mut progress).await?
                }
                StageKind::ImageGeneration => {
                    self.images(project, &carry, &mut progress).await?
                }
            };

            let event = match outcome {
                Ok(()) => Event::StageCompleted,
                Err(message) => {
                    failure = Some((stage, message));
                    Event::StageFailed
                }
            };
            state = transition(state, event, with_images)?;
        }

        let status = match self.finish(project.id, run_id, state).await? {
            Some(status) => status,
            None => {
                // aborted while the last stage was in flight
                if failure.is_none() {
                    failure = Some((last_stage, "run aborted".to_string()));
                }
                ProjectStatus::Failed
            }
        };
        let jobs = self
            .ledger
            .history(project.id)
            .await
            .map_err(ledger_err("finish"))?;

        info!(
            target = "catalyst.pipeline",
            project_id = %project.id,
            run_id = %run_id,
            status = %status,
            jobs = jobs.len(),
            failed_stage = failure.as_ref().map(|(s, _)| s.label()).unwrap_or("none"),
            "run_finished"
        );

        let (failed_stage, error) = match failure {
            Some((stage, message)) => (Some(stage), Some(message)),
            None => (None, None),
        };
        Ok(RunReport {
            project_id: project.id,
            status,
            failed_stage,
            error,
            jobs,
            stages: progress.stages,
            publish: progress.publish,
        })
    }

    /// True once the project is no longer `processing` under `run_id`.
    async fn aborted(&self, project_id: Uuid, run_id: Uuid) -> Result<bool, PipelineError> {
        let current = self
            .ledger
            .store()
            .get_project(project_id)
            .await
            .map_err(store_err("abort_check"))?;
        Ok(!matches!(
            current,
            Some(p) if p.status == ProjectStatus::Processing && p.run_id == Some(run_id)
        ))
    }

    /// Writes the terminal project status. `None` when the run lost the
    /// project to an abort or a newer run; the row is left as it is.
    async fn finish(
        &self,
        project_id: Uuid,
        run_id: Uuid,
        state: PipelineState,
    ) -> Result<Option<ProjectStatus>, PipelineError> {
        let target = match state {
            PipelineState::Completed => ProjectStatus::Completed,
            _ => ProjectStatus::Failed,
        };
        let settled = self
            .ledger
            .store()
            .settle_run(project_id, run_id, target)
            .await
            .map_err(store_err("finish"))?;
        Ok(settled.map(|project| project.status))
    }

    async fn open(
        &self,
        project_id: Uuid,
        stage: StageKind,
        input: &impl Serialize,
    ) -> Result<Job, PipelineError> {
        let payload = serde_json::to_value(input)
            .map_err(|err| PipelineError::internal(stage.label(), err.to_string()))?;
        self.ledger
            .start(project_id, stage, payload)
            .await
            .map_err(ledger_err(stage.label()))
    }

    async fn succeed(
        &self,
        job: &Job,
        started: Instant,
        output: Value,
        progress: &mut Progress,
    ) -> StageResult {
        let label = job.stage.label();
        let elapsed_ms = started.elapsed().as_millis();
        self.ledger
            .complete(job, output.clone())
            .await
            .map_err(ledger_err(label))?;
        metrics::stage_elapsed(label, elapsed_ms, true);
        progress
            .stages
            .push(StageReport::new(label, elapsed_ms, output));
        Ok(Ok(()))
    }

    async fn fail(
        &self,
        job: &Job,
        started: Instant,
        message: String,
        progress: &mut Progress,
    ) -> StageResult {
        let label = job.stage.label();
        let elapsed_ms = started.elapsed().as_millis();
        self.ledger
            .fail(job, message.clone())
            .await
            .map_err(ledger_err(label))?;
        metrics::stage_elapsed(label, elapsed_ms, false);
        warn!(
            target = "catalyst.pipeline",
            project_id = %job.project_id,
            stage = label,
            error = %message,
            "stage_failed"
        );
        progress
            .stages
            .push(StageReport::new(label, elapsed_ms, json!({ "error": message })));
        Ok(Err(message))
    }

    /// Serializes a stage output and tags it with the executor mode.
    fn output(&self, stage: StageKind, value: &impl Serialize) -> Result<Value, PipelineError> {
        let mut value = serde_json::to_value(value)
            .map_err(|err| PipelineError::internal(stage.label(), err.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.insert("executor".into(), json!(self.executor.mode().as_str()));
        }
        Ok(value)
    }

    async fn vision(
        &self,
        project: &Project,
        carry: &mut Carry,
        progress: &mut Progress,
    ) -> StageResult {
        let stage = StageKind::VisionAnalysis;
        let input = VisionInput {
            product_name: project.product_name.clone(),
            brand_name: project.brand_name.clone(),
            description: project.description.clone(),
            image_ref: project.image_ref.clone(),
        };
        let job = self.open(project.id, stage, &input).await?;
        let started = Instant::now();
        match self.executor.analyze_vision(&input).await {
            Ok(product) => {
                let output = self.output(stage, &product)?;
                carry.product = Some(product);
                self.succeed(&job, started, output, progress).await
            }
            Err(err) => self.fail(&job, started, err.to_string(), progress).await,
        }
    }

    async fn research(
        &self,
        project: &Project,
        carry: &mut Carry,
        progress: &mut Progress,
    ) -> StageResult {
        let stage = StageKind::MarketResearch;
        let product = carry.product.clone().ok_or_else(|| {
            PipelineError::internal(stage.label(), "vision output missing")
        })?;
        let input = ResearchInput {
            brand_name: project.brand_name.clone(),
            product,
        };
        let job = self.open(project.id, stage, &input).await?;
        let started = Instant::now();
        match self.executor.research_market(&input).await {
            Ok(market) => {
                let output = self.output(stage, &market)?;
                carry.market = Some(market);
                self.succeed(&job, started, output, progress).await
            }
            Err(err) => self.fail(&job, started, err.to_string(), progress).await,
        }
    }

    async fn content(
        &self,
        project: &Project,
        carry: &Carry,
        options: RunOptions,
        progress: &mut Progress,
    ) -> StageResult {
        let stage = StageKind::ContentGeneration;
        let (Some(product), Some(market)) = (carry.product.clone(), carry.market.clone()) else {
            return Err(PipelineError::internal(
                stage.label(),
                "vision or research output missing",
            ));
        };
        let input = ContentInput {
            product,
            market,
            campaign_goal: project.campaign_goal.clone(),
            target_audience: project.target_audience.clone(),
            brand_persona: project.brand_persona.clone(),
        };
        let job = self.open(project.id, stage, &input).await?;
        let started = Instant::now();
        let content = match self.executor.generate_content(&input).await {
            Ok(content) => content,
            Err(err) => return self.fail(&job, started, err.to_string(), progress).await,
        };

        if let Err(err) = self.materialize(project.id, &content).await {
            // the job must not stay running behind a fatal error
            let _ = self.ledger.fail(&job, err.detail().to_string()).await;
            return Err(err);
        }

        let publish = if options.dry_run {
            json!({ "skipped": "dry_run" })
        } else {
            let results = self
                .gateway
                .publish_content(&content, project.image_ref.as_deref())
                .await;
            let mut by_platform = Map::new();
            for result in &results {
                by_platform.insert(
                    result.platform.as_str().to_string(),
                    serde_json::to_value(result)
                        .map_err(|err| PipelineError::internal(stage.label(), err.to_string()))?,
                );
            }
            progress.publish.extend(results);
            Value::Object(by_platform)
        };

        let output = json!({
            "content": content,
            "publish": publish,
            "executor": self.executor.mode().as_str(),
        });
        self.succeed(&job, started, output, progress).await
    }

    async fn materialize(
        &self,
        project_id: Uuid,
        content: &GeneratedContent,
    ) -> Result<(), PipelineError> {
        let stage = StageKind::ContentGeneration.label();
        let variants = content
            .variants()
            .map_err(|err| PipelineError::internal(stage, err.to_string()))?;
        for (kind, body) in variants {
            self.ledger
                .store()
                .insert_asset(&Asset::new(project_id, kind, body))
                .await
                .map_err(store_err(stage))?;
        }
        Ok(())
    }

    async fn images(
        &self,
        project: &Project,
        carry: &Carry,
        progress: &mut Progress,
    ) -> StageResult {
        let stage = StageKind::ImageGeneration;
        let (Some(product), Some(market), Some(reference)) = (
            carry.product.clone(),
            carry.market.clone(),
            project.image_ref.clone(),
        ) else {
            return Err(PipelineError::internal(
                stage.label(),
                "image generation entered without inputs",
            ));
        };
        let input = ImageInput {
            product,
            market,
            reference_image: reference,
        };
        let job = self.open(project.id, stage, &input).await?;
        let started = Instant::now();
        match self.executor.generate_images(&input).await {
            Ok(images) => {
                let output = self.output(stage, &images)?;
                self.succeed(&job, started, output, progress).await
            }
            Err(err) => self.fail(&job, started, err.to_string(), progress).await,
        }
    }
}

fn transition(
    state: PipelineState,
    event: Event,
    with_images: bool,
) -> Result<PipelineState, PipelineError> {
    state.advance(event, with_images).ok_or_else(|| {
        PipelineError::internal(
            "pipeline",
            format!("no transition from {state:?} on {event:?}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryStore, Store};
    use crate::market::MarketSignal;
    use crate::models::AssetKind;
    use crate::social::{Platform, PlatformPublisher, PublishRequest, PublishStatus};
    use crate::stages::testing::{ScriptedCompletions, StaticMarket, UnreachableMarket};
    use crate::stages::{
        ExecutorMode, FixtureExecutor, GeneratedImages, LiveExecutor, StageError,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct StubPublisher {
        succeed: bool,
        calls: AtomicUsize,
        seen: Mutex<Vec<PublishRequest>>,
    }

    impl StubPublisher {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PlatformPublisher for StubPublisher {
        fn platform(&self) -> Platform {
            Platform::Linkedin
        }

        async fn publish(&self, request: &PublishRequest) -> PublishResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            if self.succeed {
                let mut result =
                    PublishResult::success(Platform::Linkedin, Some("urn:li:share:1".into()));
                result.refresh_attempts = 1;
                result
            } else {
                PublishResult::error(Platform::Linkedin, "LinkedIn API error: 500")
            }
        }
    }

    fn live(market_up: bool) -> Arc<dyn StageExecutor> {
        if market_up {
            Arc::new(LiveExecutor::new(
                Arc::new(ScriptedCompletions::default()),
                Arc::new(StaticMarket(MarketSignal::default())),
            ))
        } else {
            Arc::new(LiveExecutor::new(
                Arc::new(ScriptedCompletions::default()),
                Arc::new(UnreachableMarket),
            ))
        }
    }

    fn gateway(publisher: Arc<StubPublisher>) -> PublishingGateway {
        PublishingGateway::new(vec![Platform::Linkedin]).register(publisher)
    }

    fn request(image: Option<&str>) -> CreateProjectRequest {
        CreateProjectRequest {
            product_name: "Trail Runner X".into(),
            brand_name: Some("Northpeak".into()),
            image_ref: image.map(str::to_string),
            description: Some("Lightweight trail shoe".into()),
            campaign_goal: Some("launch".into()),
            target_audience: None,
            brand_persona: None,
        }
    }

    fn stages_of(jobs: &[Job]) -> Vec<StageKind> {
        jobs.iter().map(|j| j.stage).collect()
    }

    #[tokio::test]
    async fn full_run_creates_jobs_assets_and_publishes() {
        let publisher = StubPublisher::new(true);
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger.clone(), live(true), gateway(publisher.clone()));

        let project = pipeline
            .create_project(request(Some("https://cdn.example/shoe.jpg")))
            .await
            .unwrap();
        let report = pipeline.run(project.id, RunOptions::default()).await.unwrap();

        assert_eq!(report.status, ProjectStatus::Completed);
        assert_eq!(
            stages_of(&report.jobs),
            vec![
                StageKind::VisionAnalysis,
                StageKind::MarketResearch,
                StageKind::ContentGeneration,
                StageKind::ImageGeneration
            ]
        );
        for job in &report.jobs {
            assert_eq!(job.status, JobStatus::Completed);
            assert!(job.output_payload.is_some());
            assert!(job.error_message.is_none());
        }

        let vision = report.jobs[0].output_payload.as_ref().unwrap();
        assert!(vision["product_name"].is_string());
        assert!(vision["category"].is_string());
        assert_eq!(vision["executor"], "live");

        let assets = ledger.store().assets_for_project(project.id).await.unwrap();
        let kinds: Vec<AssetKind> = assets.iter().map(|a| a.asset_type).collect();
        assert_eq!(
            kinds,
            vec![AssetKind::LinkedinPost, AssetKind::MetaPost, AssetKind::BlogPost]
        );

        let content = report.jobs[2].output_payload.as_ref().unwrap();
        assert_eq!(content["publish"]["linkedin"]["status"], "success");
        assert_eq!(content["publish"]["linkedin"]["refresh_attempts"], 1);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
        let seen = publisher.seen.lock().unwrap().clone();
        assert_eq!(seen[0].media.as_deref(), Some("https://cdn.example/shoe.jpg"));
        assert_eq!(report.publish.len(), 1);
        assert_eq!(report.stages.len(), 4);
    }

    #[tokio::test]
    async fn research_network_error_halts_the_run() {
        let publisher = StubPublisher::new(true);
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger.clone(), live(false), gateway(publisher.clone()));

        let project = pipeline.create_project(request(None)).await.unwrap();
        let report = pipeline.run(project.id, RunOptions::default()).await.unwrap();

        assert_eq!(report.status, ProjectStatus::Failed);
        assert_eq!(report.failed_stage, Some(StageKind::MarketResearch));
        assert_eq!(
            stages_of(&report.jobs),
            vec![StageKind::VisionAnalysis, StageKind::MarketResearch]
        );
        let research = &report.jobs[1];
        assert_eq!(research.status, JobStatus::Failed);
        assert!(research.output_payload.is_none());
        assert!(
            research
                .error_message
                .as_deref()
                .unwrap()
                .contains("connection refused")
        );

        let stored = ledger.store().get_project(project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Failed);
        assert!(ledger.store().assets_for_project(project.id).await.unwrap().is_empty());
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn image_stage_is_skipped_without_reference() {
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger, live(true), gateway(StubPublisher::new(true)));

        let project = pipeline.create_project(request(None)).await.unwrap();
        let report = pipeline.run(project.id, RunOptions::default()).await.unwrap();

        assert_eq!(report.status, ProjectStatus::Completed);
        assert!(
            !report
                .jobs
                .iter()
                .any(|j| j.stage == StageKind::ImageGeneration)
        );
        assert_eq!(report.jobs.len(), 3);
    }

    #[tokio::test]
    async fn image_failure_still_completes_the_project() {
        let executor = Arc::new(LiveExecutor::new(
            Arc::new(ScriptedCompletions::default().failing_images("image model unavailable")),
            Arc::new(StaticMarket(MarketSignal::default())),
        ));
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger.clone(), executor, gateway(StubPublisher::new(true)));

        let project = pipeline
            .create_project(request(Some("https://cdn.example/shoe.jpg")))
            .await
            .unwrap();
        let report = pipeline.run(project.id, RunOptions::default()).await.unwrap();

        assert_eq!(report.status, ProjectStatus::Completed);
        assert_eq!(report.failed_stage, Some(StageKind::ImageGeneration));
        assert!(report.error.unwrap().contains("image model unavailable"));
        let statuses: Vec<JobStatus> = report.jobs.iter().map(|j| j.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Completed,
                JobStatus::Completed,
                JobStatus::Completed,
                JobStatus::Failed
            ]
        );

        let stored = ledger.store().get_project(project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Completed);
        assert_eq!(ledger.store().assets_for_project(project.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn publish_failure_keeps_project_completed() {
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger, live(true), gateway(StubPublisher::new(false)));

        let project = pipeline.create_project(request(None)).await.unwrap();
        let report = pipeline.run(project.id, RunOptions::default()).await.unwrap();

        assert_eq!(report.status, ProjectStatus::Completed);
        assert_eq!(report.publish[0].status, PublishStatus::Error);
        let content = report.jobs[2].output_payload.as_ref().unwrap();
        assert_eq!(content["publish"]["linkedin"]["message"], "LinkedIn API error: 500");
    }

    #[tokio::test]
    async fn dry_run_skips_publishing() {
        let publisher = StubPublisher::new(true);
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger, live(true), gateway(publisher.clone()));

        let project = pipeline.create_project(request(None)).await.unwrap();
        let report = pipeline
            .run(project.id, RunOptions { dry_run: true })
            .await
            .unwrap();

        assert_eq!(report.status, ProjectStatus::Completed);
        assert!(report.publish.is_empty());
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
        let content = report.jobs[2].output_payload.as_ref().unwrap();
        assert_eq!(content["publish"]["skipped"], "dry_run");
    }

    #[tokio::test]
    async fn vision_schema_failure_stops_before_research() {
        let executor = Arc::new(LiveExecutor::new(
            Arc::new(
                ScriptedCompletions::default().with("product analyst", r#"{"category": "Shoes"}"#),
            ),
            Arc::new(StaticMarket(MarketSignal::default())),
        ));
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger, executor, gateway(StubPublisher::new(true)));

        let project = pipeline.create_project(request(None)).await.unwrap();
        let report = pipeline.run(project.id, RunOptions::default()).await.unwrap();
        assert_eq!(report.failed_stage, Some(StageKind::VisionAnalysis));
        assert_eq!(report.jobs.len(), 1);
        assert!(report.error.unwrap().contains("schema"));
    }

    #[tokio::test]
    async fn rerun_appends_new_jobs() {
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let failing = Pipeline::new(ledger.clone(), live(false), gateway(StubPublisher::new(true)));
        let project = failing.create_project(request(None)).await.unwrap();
        let first = failing.run(project.id, RunOptions::default()).await.unwrap();
        assert_eq!(first.status, ProjectStatus::Failed);

        let healthy = Pipeline::new(ledger.clone(), live(true), gateway(StubPublisher::new(true)));
        let second = healthy.run(project.id, RunOptions::default()).await.unwrap();
        assert_eq!(second.status, ProjectStatus::Completed);
        assert_eq!(second.jobs.len(), 2 + 3);
        assert_eq!(second.jobs[1].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn running_project_is_a_conflict_and_missing_is_not_found() {
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger.clone(), live(true), gateway(StubPublisher::new(true)));
        let project = pipeline.create_project(request(None)).await.unwrap();
        ledger
            .store()
            .transition_project(project.id, ProjectStatus::Processing)
            .await
            .unwrap();

        let err = pipeline.run(project.id, RunOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Conflict);

        let err = pipeline.run(Uuid::new_v4(), RunOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::NotFound);

        let err = pipeline
            .create_project(CreateProjectRequest {
                product_name: "   ".into(),
                ..request(None)
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }

    /// Aborts its own project while the vision stage is in flight.
    struct AbortDuringVision {
        inner: FixtureExecutor,
        store: Arc<dyn Store>,
        project: Mutex<Option<Uuid>>,
    }

    #[async_trait]
    impl StageExecutor for AbortDuringVision {
        fn mode(&self) -> ExecutorMode {
            ExecutorMode::Fixture
        }

        async fn analyze_vision(&self, input: &VisionInput) -> Result<ProductData, StageError> {
            let id = self.project.lock().ok().and_then(|p| *p);
            if let Some(id) = id {
                let _ = self.store.transition_project(id, ProjectStatus::Failed).await;
            }
            self.inner.analyze_vision(input).await
        }

        async fn research_market(&self, input: &ResearchInput) -> Result<MarketData, StageError> {
            self.inner.research_market(input).await
        }

        async fn generate_content(
            &self,
            input: &ContentInput,
        ) -> Result<GeneratedContent, StageError> {
            self.inner.generate_content(input).await
        }

        async fn generate_images(
            &self,
            input: &ImageInput,
        ) -> Result<GeneratedImages, StageError> {
            self.inner.generate_images(input).await
        }
    }

    #[tokio::test]
    async fn abort_stops_before_the_next_stage() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let executor = Arc::new(AbortDuringVision {
            inner: FixtureExecutor::new(),
            store: store.clone(),
            project: Mutex::new(None),
        });
        let pipeline = Pipeline::new(
            JobLedger::new(store.clone()),
            executor.clone(),
            gateway(StubPublisher::new(true)),
        );
        let project = pipeline.create_project(request(None)).await.unwrap();
        *executor.project.lock().unwrap() = Some(project.id);

        let report = pipeline.run(project.id, RunOptions::default()).await.unwrap();
        assert_eq!(report.status, ProjectStatus::Failed);
        assert_eq!(report.failed_stage, Some(StageKind::MarketResearch));
        assert_eq!(report.error.as_deref(), Some("run aborted"));
        assert_eq!(stages_of(&report.jobs), vec![StageKind::VisionAnalysis]);
        assert_eq!(report.jobs[0].output_payload.as_ref().unwrap()["executor"], "fixture");
    }

    /// Parks the first vision call until released; later calls pass through.
    #[derive(Default)]
    struct HoldFirstVision {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl StageExecutor for HoldFirstVision {
        fn mode(&self) -> ExecutorMode {
            ExecutorMode::Fixture
        }

        async fn analyze_vision(&self, input: &VisionInput) -> Result<ProductData, StageError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            FixtureExecutor.analyze_vision(input).await
        }

        async fn research_market(&self, input: &ResearchInput) -> Result<MarketData, StageError> {
            FixtureExecutor.research_market(input).await
        }

        async fn generate_content(
            &self,
            input: &ContentInput,
        ) -> Result<GeneratedContent, StageError> {
            FixtureExecutor.generate_content(input).await
        }

        async fn generate_images(
            &self,
            input: &ImageInput,
        ) -> Result<GeneratedImages, StageError> {
            FixtureExecutor.generate_images(input).await
        }
    }

    #[tokio::test]
    async fn aborted_run_stays_stopped_after_a_rerun() {
        let executor = Arc::new(HoldFirstVision::default());
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(
            ledger.clone(),
            executor.clone(),
            gateway(StubPublisher::new(true)),
        );
        let project = pipeline.create_project(request(None)).await.unwrap();
        let dry = RunOptions { dry_run: true };

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            let id = project.id;
            async move { pipeline.run(id, dry).await }
        });
        executor.entered.notified().await;
        pipeline.abort(project.id).await.unwrap();

        let second = pipeline.run(project.id, dry).await.unwrap();
        assert_eq!(second.status, ProjectStatus::Completed);

        executor.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, ProjectStatus::Failed);
        assert_eq!(first.stages.len(), 1);
        assert_eq!(first.failed_stage, Some(StageKind::MarketResearch));
        assert_eq!(first.error.as_deref(), Some("run aborted"));

        // the stale run added nothing past its own vision job
        let jobs = ledger.history(project.id).await.unwrap();
        assert_eq!(
            stages_of(&jobs),
            vec![
                StageKind::VisionAnalysis,
                StageKind::VisionAnalysis,
                StageKind::MarketResearch,
                StageKind::ContentGeneration
            ]
        );
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
        let stored = ledger.store().get_project(project.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Completed);
    }

    #[tokio::test]
    async fn abort_requires_a_processing_project() {
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger.clone(), live(true), gateway(StubPublisher::new(true)));
        let project = pipeline.create_project(request(None)).await.unwrap();

        let err = pipeline.abort(project.id).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Conflict);

        ledger
            .store()
            .transition_project(project.id, ProjectStatus::Processing)
            .await
            .unwrap();
        let aborted = pipeline.abort(project.id).await.unwrap();
        assert_eq!(aborted.status, ProjectStatus::Failed);
    }

    /// Delegates to a memory store but refuses asset writes.
    struct AssetlessStore(MemoryStore);

    #[async_trait]
    impl Store for AssetlessStore {
        async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
            self.0.insert_project(project).await
        }
        async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
            self.0.get_project(id).await
        }
        async fn transition_project(
            &self,
            id: Uuid,
            to: ProjectStatus,
        ) -> Result<Project, StoreError> {
            self.0.transition_project(id, to).await
        }
        async fn begin_run(&self, id: Uuid, run_id: Uuid) -> Result<Project, StoreError> {
            self.0.begin_run(id, run_id).await
        }
        async fn settle_run(
            &self,
            id: Uuid,
            run_id: Uuid,
            to: ProjectStatus,
        ) -> Result<Option<Project>, StoreError> {
            self.0.settle_run(id, run_id, to).await
        }
        async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
            self.0.insert_job(job).await
        }
        async fn close_job(&self, job: &Job) -> Result<(), StoreError> {
            self.0.close_job(job).await
        }
        async fn jobs_for_project(&self, project_id: Uuid) -> Result<Vec<Job>, StoreError> {
            self.0.jobs_for_project(project_id).await
        }
        async fn insert_asset(&self, _asset: &Asset) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("disk full".into()))
        }
        async fn assets_for_project(&self, project_id: Uuid) -> Result<Vec<Asset>, StoreError> {
            self.0.assets_for_project(project_id).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_fails_job_and_project() {
        let store: Arc<dyn Store> = Arc::new(AssetlessStore(MemoryStore::new()));
        let ledger = JobLedger::new(store);
        let pipeline = Pipeline::new(ledger.clone(), live(true), gateway(StubPublisher::new(true)));
        let project = pipeline.create_project(request(None)).await.unwrap();

        let err = pipeline.run(project.id, RunOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::Persistence);
        assert!(err.detail().contains("disk full"));

        let status = ledger.status(project.id).await.unwrap().unwrap();
        assert_eq!(status.project_status, ProjectStatus::Failed);
        assert_eq!(status.counts.running, 0);
        let content = status.jobs.last().unwrap();
        assert_eq!(content.stage, StageKind::ContentGeneration);
        assert_eq!(content.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn status_reads_are_stable() {
        let ledger = JobLedger::new(Arc::new(MemoryStore::new()));
        let pipeline = Pipeline::new(ledger.clone(), live(true), gateway(StubPublisher::new(true)));
        let project = pipeline.create_project(request(None)).await.unwrap();
        pipeline.run(project.id, RunOptions::default()).await.unwrap();

        let first = ledger.status(project.id).await.unwrap().unwrap();
        let second = ledger.status(project.id).await.unwrap().unwrap();
        assert_eq!(first.jobs, second.jobs);
        assert_eq!(first.counts.completed, 3);
        assert_eq!(first.counts.total, 3);
    }
}
