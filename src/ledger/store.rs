use crate::models::{Asset, Job, Project, ProjectStatus};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("job `{0}` is not running")]
    JobClosed(Uuid),
    #[error("project `{id}` cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: ProjectStatus,
        to: ProjectStatus,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Row-level persistence for projects, jobs and assets.
///
/// Implementations must be safe to share between concurrent pipeline runs
/// of different projects. Every method is a single atomic step; nothing
/// here locks across projects.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;

    /// Moves a project to `to` if `ProjectStatus::can_transition` allows it,
    /// returning the updated row.
    async fn transition_project(
        &self,
        id: Uuid,
        to: ProjectStatus,
    ) -> Result<Project, StoreError>;

    /// Moves a project to `processing` on behalf of `run_id` and records
    /// that run as its owner. Fails like `transition_project` when the
    /// current status does not allow it.
    async fn begin_run(&self, id: Uuid, run_id: Uuid) -> Result<Project, StoreError>;

    /// Moves a `processing` project owned by `run_id` to `to`. Returns
    /// `None`, leaving the row untouched, once the run no longer owns it
    /// (aborted, or claimed by a newer run).
    async fn settle_run(
        &self,
        id: Uuid,
        run_id: Uuid,
        to: ProjectStatus,
    ) -> Result<Option<Project>, StoreError>;

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Persists the terminal state of `job`. Fails with
    /// [`StoreError::JobClosed`] unless the stored row is still `running`.
    async fn close_job(&self, job: &Job) -> Result<(), StoreError>;

    /// All jobs of a project in creation order.
    async fn jobs_for_project(&self, project_id: Uuid) -> Result<Vec<Job>, StoreError>;

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError>;

    async fn assets_for_project(&self, project_id: Uuid) -> Result<Vec<Asset>, StoreError>;
}
