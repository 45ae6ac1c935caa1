use super::store::{Store, StoreError};
use crate::models::{Asset, Job, JobStatus, Project, ProjectStatus};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Process-local store used when no database is configured.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    // per-project vectors keep creation order without a global sequence
    jobs: HashMap<Uuid, Vec<Job>>,
    assets: HashMap<Uuid, Vec<Asset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        guard.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.projects.get(&id).cloned())
    }

    async fn transition_project(
        &self,
        id: Uuid,
        to: ProjectStatus,
    ) -> Result<Project, StoreError> {
        let mut guard = self.inner.lock().await;
        let project = guard
            .projects
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "project",
                id,
            })?;
        if !project.status.can_transition(to) {
            return Err(StoreError::InvalidTransition {
                id,
                from: project.status,
                to,
            });
        }
        project.status = to;
        Ok(project.clone())
    }

    async fn begin_run(&self, id: Uuid, run_id: Uuid) -> Result<Project, StoreError> {
        let mut guard = self.inner.lock().await;
        let project = guard
            .projects
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "project",
                id,
            })?;
        if !project.status.can_transition(ProjectStatus::Processing) {
            return Err(StoreError::InvalidTransition {
                id,
                from: project.status,
                to: ProjectStatus::Processing,
            });
        }
        project.status = ProjectStatus::Processing;
        project.run_id = Some(run_id);
        Ok(project.clone())
    }

    async fn settle_run(
        &self,
        id: Uuid,
        run_id: Uuid,
        to: ProjectStatus,
    ) -> Result<Option<Project>, StoreError> {
        let mut guard = self.inner.lock().await;
        let project = guard
            .projects
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "project",
                id,
            })?;
        if project.status != ProjectStatus::Processing
            || project.run_id != Some(run_id)
            || !project.status.can_transition(to)
        {
            return Ok(None);
        }
        project.status = to;
        Ok(Some(project.clone()))
    }

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        guard
            .jobs
            .entry(job.project_id)
            .or_default()
            .push(job.clone());
        Ok(())
    }

    async fn close_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let stored = guard
            .jobs
            .get_mut(&job.project_id)
            .and_then(|jobs| jobs.iter_mut().find(|j| j.id == job.id))
            .ok_or(StoreError::NotFound {
                entity: "job",
                id: job.id,
            })?;
        if stored.status != JobStatus::Running {
            return Err(StoreError::JobClosed(job.id));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn jobs_for_project(&self, project_id: Uuid) -> Result<Vec<Job>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.jobs.get(&project_id).cloned().unwrap_or_default())
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        guard
            .assets
            .entry(asset.project_id)
            .or_default()
            .push(asset.clone());
        Ok(())
    }

    async fn assets_for_project(&self, project_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.assets.get(&project_id).cloned().unwrap_or_default())
    }
}
