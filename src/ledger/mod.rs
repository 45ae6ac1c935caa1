//! Job ledger: the durable record of every stage attempt.
//!
//! The ledger only ever appends jobs and closes them once. Nothing is rolled
//! back after a failed run, so the status surface always reflects the last
//! known state of every job, error text included.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{Store, StoreError};

use crate::models::{Job, JobStatus, ProjectStatus, StageKind};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("job `{id}` is {status}, expected running")]
    NotRunning { id: Uuid, status: JobStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn Store>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl JobCounts {
    pub fn tally(jobs: &[Job]) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
            counts.total += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub project_id: Uuid,
    pub project_status: ProjectStatus,
    pub counts: JobCounts,
    pub jobs: Vec<Job>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Records the start of a stage. Jobs are born `running`: stages execute
    /// synchronously, so nothing ever waits in `pending`.
    pub async fn start(
        &self,
        project_id: Uuid,
        stage: StageKind,
        input: Value,
    ) -> Result<Job, LedgerError> {
        let job = Job {
            id: Uuid::new_v4(),
            project_id,
            stage,
            status: JobStatus::Running,
            input_payload: input,
            output_payload: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.store.insert_job(&job).await?;
        debug!(
            target = "catalyst.ledger",
            project_id = %project_id,
            job_id = %job.id,
            stage = stage.label(),
            "job_started"
        );
        Ok(job)
    }

    pub async fn complete(&self, job: &Job, output: Value) -> Result<Job, LedgerError> {
        ensure_running(job)?;
        let closed = Job {
            status: JobStatus::Completed,
            output_payload: Some(output),
            error_message: None,
            completed_at: Some(Utc::now()),
            ..job.clone()
        };
        self.store.close_job(&closed).await?;
        info!(
            target = "catalyst.ledger",
            project_id = %closed.project_id,
            job_id = %closed.id,
            stage = closed.stage.label(),
            "job_completed"
        );
        Ok(closed)
    }

    pub async fn fail(&self, job: &Job, error: impl Into<String>) -> Result<Job, LedgerError> {
        ensure_running(job)?;
        let closed = Job {
            status: JobStatus::Failed,
            output_payload: None,
            error_message: Some(error.into()),
            completed_at: Some(Utc::now()),
            ..job.clone()
        };
        self.store.close_job(&closed).await?;
        info!(
            target = "catalyst.ledger",
            project_id = %closed.project_id,
            job_id = %closed.id,
            stage = closed.stage.label(),
            error = closed.error_message.as_deref().unwrap_or_default(),
            "job_failed"
        );
        Ok(closed)
    }

    pub async fn history(&self, project_id: Uuid) -> Result<Vec<Job>, LedgerError> {
        Ok(self.store.jobs_for_project(project_id).await?)
    }

    /// Read-only snapshot for polling clients; `None` for unknown projects.
    pub async fn status(&self, project_id: Uuid) -> Result<Option<StatusReport>, LedgerError> {
        let Some(project) = self.store.get_project(project_id).await? else {
            return Ok(None);
        };
        let jobs = self.history(project_id).await?;
        Ok(Some(StatusReport {
            project_id,
            project_status: project.status,
            counts: JobCounts::tally(&jobs),
            jobs,
        }))
    }
}

fn ensure_running(job: &Job) -> Result<(), LedgerError> {
    if job.status == JobStatus::Running {
        Ok(())
    } else {
        Err(LedgerError::NotRunning {
            id: job.id,
            status: job.status,
        })
    }
}
