mod config;
mod http;
mod jobs;
mod ledger;
mod llm;
mod market;
mod metrics;
mod models;
mod pipeline;
mod social;
mod stages;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::AppConfig;
use eyre::WrapErr;
use jobs::{QueueError, RunInfo, RunQueue};
use ledger::StatusReport;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, Asset, CreateProjectRequest, Project};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind, RunOptions, RunReport};
use serde::Serialize;
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "catalyst.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env().wrap_err("invalid configuration")?;
    let pipeline = config.build_pipeline().wrap_err("failed to assemble pipeline")?;
    let (queue, _dispatcher) =
        RunQueue::spawn(pipeline.clone(), config.queue_capacity, config.run_retention);
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(load_openapi()),
        prometheus,
        config: Arc::new(config.clone()),
    };

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(
        target = "catalyst.api",
        executor = config.executor.as_str(),
        platforms = ?config.publish_platforms,
        "listening on {addr}"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: RunQueue,
    openapi: Arc<Value>,
    prometheus: PrometheusHandle,
    config: Arc<AppConfig>,
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let body_limit = state.config.request_max_bytes;

    let projects = Router::new()
        .route("/", post(create_project))
        .route("/{id}", get(get_project))
        .route("/{id}/run", post(run_project))
        .route("/{id}/abort", post(abort_project))
        .route("/{id}/status", get(project_status))
        .route("/{id}/assets", get(project_assets));

    let jobs = Router::new()
        .route("/projects/{id}/run", post(enqueue_run))
        .route("/{id}", get(get_run));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .nest("/projects", projects)
        .nest("/jobs", jobs)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

fn load_openapi() -> Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "catalyst-api-rs",
        "executor": state.config.executor.as_str(),
    }))
}

fn header_matches(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| presented == expected)
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Some(key) = &state.config.openapi_key
        && !header_matches(&headers, "X-Docs-Key", key)
    {
        return Err(AppError::Unauthorized("docs"));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> impl IntoResponse {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Catalyst API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    if let Some(secret) = &state.config.metrics_key
        && !header_matches(&headers, "X-Metrics-Key", secret)
    {
        return Err(AppError::Unauthorized("metrics"));
    }
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    ))
}

fn parse_id(stage: &'static str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::Pipeline(PipelineError::invalid_input(stage, "invalid_id")))
}

async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    metrics::inc_requests("/projects");
    let project = state.pipeline.create_project(payload).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, AppError> {
    metrics::inc_requests("/projects/{id}");
    let id = parse_id("projects", &id)?;
    let project = state
        .pipeline
        .ledger()
        .store()
        .get_project(id)
        .await
        .map_err(|err| PipelineError::persistence("projects", err.to_string()))?
        .ok_or_else(|| PipelineError::not_found("projects", format!("project {id}")))?;
    Ok(Json(project))
}

/// Runs every stage synchronously and answers with the full report.
///
/// - Method: `POST`
/// - Path: `/projects/{id}/run?dry_run=true|false`
/// - Response: `RunReport`; a failed stage is still `200` with
///   `status: failed`
async fn run_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(options): Query<RunOptions>,
) -> Result<Json<RunReport>, AppError> {
    metrics::inc_requests("/projects/{id}/run");
    let id = parse_id("start", &id)?;
    let report = jobs::run_isolated(&state.pipeline, id, Uuid::new_v4(), options).await?;
    Ok(Json(report))
}

async fn abort_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, AppError> {
    metrics::inc_requests("/projects/{id}/abort");
    let id = parse_id("abort", &id)?;
    Ok(Json(state.pipeline.abort(id).await?))
}

async fn project_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, AppError> {
    metrics::inc_requests("/projects/{id}/status");
    let id = parse_id("status", &id)?;
    let report = state
        .pipeline
        .ledger()
        .status(id)
        .await
        .map_err(|err| PipelineError::persistence("status", err.to_string()))?
        .ok_or_else(|| PipelineError::not_found("status", format!("project {id}")))?;
    Ok(Json(report))
}

async fn project_assets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Asset>>, AppError> {
    metrics::inc_requests("/projects/{id}/assets");
    let id = parse_id("assets", &id)?;
    let store = state.pipeline.ledger().store();
    if store
        .get_project(id)
        .await
        .map_err(|err| PipelineError::persistence("assets", err.to_string()))?
        .is_none()
    {
        return Err(PipelineError::not_found("assets", format!("project {id}")).into());
    }
    let assets = store
        .assets_for_project(id)
        .await
        .map_err(|err| PipelineError::persistence("assets", err.to_string()))?;
    Ok(Json(assets))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: Uuid,
}

async fn enqueue_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(options): Query<RunOptions>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    metrics::inc_requests("/jobs/projects/{id}/run");
    let id = parse_id("enqueue", &id)?;
    if state
        .pipeline
        .ledger()
        .store()
        .get_project(id)
        .await
        .map_err(|err| PipelineError::persistence("enqueue", err.to_string()))?
        .is_none()
    {
        return Err(PipelineError::not_found("enqueue", format!("project {id}")).into());
    }
    let job_id = state.queue.enqueue(id, options).await?;
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunInfo>, AppError> {
    let id = parse_id("jobs", &id)?;
    state
        .queue
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| PipelineError::not_found("jobs", "not_found").into())
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Queue(QueueError),
    Unauthorized(&'static str),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<QueueError> for AppError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PipelineErrorKind::Conflict => StatusCode::CONFLICT,
                    PipelineErrorKind::Persistence | PipelineErrorKind::Internal => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (
                    status,
                    ApiError {
                        error: err.stage().to_string(),
                        detail: Some(err.detail().to_string()),
                    },
                )
            }
            AppError::Queue(err) => {
                let status = match err {
                    QueueError::InFlight(_) => StatusCode::CONFLICT,
                    QueueError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                };
                (
                    status,
                    ApiError {
                        error: "enqueue".into(),
                        detail: Some(err.to_string()),
                    },
                )
            }
            AppError::Unauthorized(area) => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: area.into(),
                    detail: Some("unauthorized".into()),
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
