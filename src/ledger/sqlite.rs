//! SQLite-backed [`Store`].
//!
//! A single `rusqlite` connection is shared behind a mutex; SQLite serialises
//! writers anyway, and every call runs on the blocking pool so the async
//! runtime never waits on disk I/O.

use super::store::{Store, StoreError};
use crate::models::{Asset, AssetKind, Job, JobStatus, Project, ProjectStatus, StageKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::{
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    product_name TEXT NOT NULL,
    brand_name TEXT,
    image_ref TEXT,
    description TEXT,
    campaign_goal TEXT,
    target_audience TEXT,
    brand_persona TEXT,
    status TEXT NOT NULL,
    run_id TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS jobs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    project_id TEXT NOT NULL REFERENCES projects(id),
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    input_payload TEXT NOT NULL,
    output_payload TEXT,
    error_message TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(project_id, seq);
CREATE TABLE IF NOT EXISTS assets (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    project_id TEXT NOT NULL REFERENCES projects(id),
    asset_type TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_assets_project ON assets(project_id, seq);
"#;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Corrupt(format!("{}: {err}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        migrate(&conn)?;
        info!(target = "catalyst.ledger", path = %path.display(), "sqlite_store_opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|err| StoreError::Join(err.to_string()))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let project = project.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO projects (id, product_name, brand_name, image_ref, description,
                 campaign_goal, target_audience, brand_persona, status, run_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    project.id.to_string(),
                    project.product_name,
                    project.brand_name,
                    project.image_ref,
                    project.description,
                    project.campaign_goal,
                    project.target_audience,
                    project.brand_persona,
                    project.status.as_str(),
                    project.run_id.map(|r| r.to_string()),
                    project.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        self.call(move |conn| load_project(conn, id)).await
    }

    async fn transition_project(
        &self,
        id: Uuid,
        to: ProjectStatus,
    ) -> Result<Project, StoreError> {
        self.call(move |conn| {
            let mut project = load_project(conn, id)?.ok_or(StoreError::NotFound {
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
            conn.execute(
                "UPDATE projects SET status = ?2 WHERE id = ?1 AND status = ?3",
                params![id.to_string(), to.as_str(), project.status.as_str()],
            )?;
            project.status = to;
            Ok(project)
        })
        .await
    }

    async fn begin_run(&self, id: Uuid, run_id: Uuid) -> Result<Project, StoreError> {
        self.call(move |conn| {
            let mut project = load_project(conn, id)?.ok_or(StoreError::NotFound {
                entity: "project",
                id,
            })?;
            let to = ProjectStatus::Processing;
            if !project.status.can_transition(to) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: project.status,
                    to,
                });
            }
            let changed = conn.execute(
                "UPDATE projects SET status = ?2, run_id = ?3 WHERE id = ?1 AND status = ?4",
                params![
                    id.to_string(),
                    to.as_str(),
                    run_id.to_string(),
                    project.status.as_str()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: project.status,
                    to,
                });
            }
            project.status = to;
            project.run_id = Some(run_id);
            Ok(project)
        })
        .await
    }

    async fn settle_run(
        &self,
        id: Uuid,
        run_id: Uuid,
        to: ProjectStatus,
    ) -> Result<Option<Project>, StoreError> {
        self.call(move |conn| {
            if !ProjectStatus::Processing.can_transition(to) {
                return Ok(None);
            }
            let changed = conn.execute(
                "UPDATE projects SET status = ?3
                 WHERE id = ?1 AND run_id = ?2 AND status = 'processing'",
                params![id.to_string(), run_id.to_string(), to.as_str()],
            )?;
            let project = load_project(conn, id)?.ok_or(StoreError::NotFound {
                entity: "project",
                id,
            })?;
            Ok((changed == 1).then_some(project))
        })
        .await
    }

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let job = job.clone();
        self.call(move |conn| {
            let output = job
                .output_payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                "INSERT INTO jobs (id, project_id, job_type, status, input_payload,
                 output_payload, error_message, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.id.to_string(),
                    job.project_id.to_string(),
                    job.stage.as_str(),
                    job.status.as_str(),
                    serde_json::to_string(&job.input_payload)?,
                    output,
                    job.error_message,
                    job.started_at.to_rfc3339(),
                    job.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn close_job(&self, job: &Job) -> Result<(), StoreError> {
        let job = job.clone();
        self.call(move |conn| {
            let output = job
                .output_payload
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let changed = conn.execute(
                "UPDATE jobs SET status = ?2, output_payload = ?3, error_message = ?4,
                 completed_at = ?5
                 WHERE id = ?1 AND status = 'running'",
                params![
                    job.id.to_string(),
                    job.status.as_str(),
                    output,
                    job.error_message,
                    job.completed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            if changed == 1 {
                return Ok(());
            }
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM jobs WHERE id = ?1",
                    params![job.id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match exists {
                Some(_) => Err(StoreError::JobClosed(job.id)),
                None => Err(StoreError::NotFound {
                    entity: "job",
                    id: job.id,
                }),
            }
        })
        .await
    }

    async fn jobs_for_project(&self, project_id: Uuid) -> Result<Vec<Job>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, job_type, status, input_payload, output_payload,
                 error_message, started_at, completed_at
                 FROM jobs WHERE project_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![project_id.to_string()], RawJob::from_row)?;
            let mut jobs = Vec::new();
            for raw in rows {
                jobs.push(raw?.into_job()?);
            }
            Ok(jobs)
        })
        .await
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let asset = asset.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO assets (id, project_id, asset_type, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    asset.id.to_string(),
                    asset.project_id.to_string(),
                    asset.asset_type.as_str(),
                    asset.content,
                    asset.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn assets_for_project(&self, project_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, asset_type, content, created_at
                 FROM assets WHERE project_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![project_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            let mut assets = Vec::new();
            for row in rows {
                let (id, project_id, asset_type, content, created_at) = row?;
                assets.push(Asset {
                    id: parse_uuid(&id)?,
                    project_id: parse_uuid(&project_id)?,
                    asset_type: asset_type.parse::<AssetKind>().map_err(StoreError::Corrupt)?,
                    content,
                    created_at: parse_time(&created_at)?,
                });
            }
            Ok(assets)
        })
        .await
    }
}

/// Adds columns introduced after the first schema to existing databases.
fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('projects')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if !columns.iter().any(|c| c == "run_id") {
        conn.execute_batch("ALTER TABLE projects ADD COLUMN run_id TEXT;")?;
        info!(target = "catalyst.ledger", column = "run_id", "sqlite_column_added");
    }
    Ok(())
}

fn load_project(conn: &Connection, id: Uuid) -> Result<Option<Project>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, product_name, brand_name, image_ref, description, campaign_goal,
             target_audience, brand_persona, status, run_id, created_at
             FROM projects WHERE id = ?1",
            params![id.to_string()],
            RawProject::from_row,
        )
        .optional()?;
    raw.map(RawProject::into_project).transpose()
}

struct RawProject {
    id: String,
    product_name: String,
    brand_name: Option<String>,
    image_ref: Option<String>,
    description: Option<String>,
    campaign_goal: Option<String>,
    target_audience: Option<String>,
    brand_persona: Option<String>,
    status: String,
    run_id: Option<String>,
    created_at: String,
}

impl RawProject {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            product_name: row.get("product_name")?,
            brand_name: row.get("brand_name")?,
            image_ref: row.get("image_ref")?,
            description: row.get("description")?,
            campaign_goal: row.get("campaign_goal")?,
            target_audience: row.get("target_audience")?,
            brand_persona: row.get("brand_persona")?,
            status: row.get("status")?,
            run_id: row.get("run_id")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_project(self) -> Result<Project, StoreError> {
        Ok(Project {
            id: parse_uuid(&self.id)?,
            product_name: self.product_name,
            brand_name: self.brand_name,
            image_ref: self.image_ref,
            description: self.description,
            campaign_goal: self.campaign_goal,
            target_audience: self.target_audience,
            brand_persona: self.brand_persona,
            status: self.status.parse::<ProjectStatus>().map_err(StoreError::Corrupt)?,
            run_id: self.run_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

struct RawJob {
    id: String,
    project_id: String,
    job_type: String,
    status: String,
    input_payload: String,
    output_payload: Option<String>,
    error_message: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            project_id: row.get("project_id")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            input_payload: row.get("input_payload")?,
            output_payload: row.get("output_payload")?,
            error_message: row.get("error_message")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        Ok(Job {
            id: parse_uuid(&self.id)?,
            project_id: parse_uuid(&self.project_id)?,
            stage: self.job_type.parse::<StageKind>().map_err(StoreError::Corrupt)?,
            status: self.status.parse::<JobStatus>().map_err(StoreError::Corrupt)?,
            input_payload: serde_json::from_str(&self.input_payload)?,
            output_payload: self
                .output_payload
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            error_message: self.error_message,
            started_at: parse_time(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|err| StoreError::Corrupt(format!("uuid {raw}: {err}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("timestamp {raw}: {err}")))
}
