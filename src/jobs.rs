use crate::pipeline::{Pipeline, PipelineError, RunOptions, RunReport};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Background runs. One dispatcher drains the channel and spawns a task per
/// run, so different projects proceed concurrently while a project never
/// has two runs in flight. Finished runs stay readable for `retention`.
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<QueuedRun>,
    runs: Arc<Mutex<HashMap<Uuid, RunInfo>>>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    retention: Duration,
}

struct QueuedRun {
    id: Uuid,
    project_id: Uuid,
    options: RunOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Finished { report: RunReport },
    Failed { error: String, stage: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(flatten)]
    pub state: RunState,
    #[serde(skip)]
    finished_at: Option<Instant>,
}

#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    #[error("project `{0}` already has a queued or running run")]
    InFlight(Uuid),
    #[error("run queue is not accepting work")]
    Closed,
}

impl RunQueue {
    pub fn spawn(
        pipeline: Pipeline,
        capacity: usize,
        retention: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<QueuedRun>(capacity.max(1));
        let runs = Arc::new(Mutex::new(HashMap::new()));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let queue = Self {
            tx,
            runs,
            in_flight,
            retention,
        };

        let dispatcher = queue.clone();
        let handle = tokio::spawn(async move {
            while let Some(run) = rx.recv().await {
                let queue = dispatcher.clone();
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    queue.set_state(run.id, RunState::Running).await;
                    let state = match run_isolated(&pipeline, run.project_id, run.id, run.options)
                        .await
                    {
                        Ok(report) => RunState::Finished { report },
                        Err(err) => RunState::Failed {
                            error: err.detail().to_string(),
                            stage: err.stage().to_string(),
                        },
                    };
                    queue.set_state(run.id, state).await;
                    queue.in_flight.lock().await.remove(&run.project_id);
                });
            }
        });

        (queue, handle)
    }

    pub async fn enqueue(&self, project_id: Uuid, options: RunOptions) -> Result<Uuid, QueueError> {
        if !self.in_flight.lock().await.insert(project_id) {
            return Err(QueueError::InFlight(project_id));
        }
        let id = Uuid::new_v4();
        {
            let mut runs = self.runs.lock().await;
            self.prune(&mut runs);
            runs.insert(
                id,
                RunInfo {
                    id,
                    project_id,
                    state: RunState::Queued,
                    finished_at: None,
                },
            );
        }
        if self
            .tx
            .send(QueuedRun {
                id,
                project_id,
                options,
            })
            .await
            .is_err()
        {
            self.runs.lock().await.remove(&id);
            self.in_flight.lock().await.remove(&project_id);
            return Err(QueueError::Closed);
        }
        info!(
            target = "catalyst.jobs",
            run_id = %id,
            project_id = %project_id,
            "run_enqueued"
        );
        Ok(id)
    }

    /// `None` for unknown runs and for finished runs past retention.
    pub async fn get(&self, id: Uuid) -> Option<RunInfo> {
        let mut runs = self.runs.lock().await;
        self.prune(&mut runs);
        runs.get(&id).cloned()
    }

    async fn set_state(&self, id: Uuid, state: RunState) {
        let mut runs = self.runs.lock().await;
        if let Some(info) = runs.get_mut(&id) {
            if matches!(state, RunState::Finished { .. } | RunState::Failed { .. }) {
                info.finished_at = Some(Instant::now());
            }
            info.state = state;
        }
        self.prune(&mut runs);
    }

    fn prune(&self, runs: &mut HashMap<Uuid, RunInfo>) {
        let before = runs.len();
        runs.retain(|_, info| info.finished_at.is_none_or(|at| at.elapsed() < self.retention));
        let evicted = before - runs.len();
        if evicted > 0 {
            debug!(target = "catalyst.jobs", evicted, "finished_runs_evicted");
        }
    }
}

/// Runs the pipeline as `run_id` on its own task so a panic inside a stage
/// surfaces as an error instead of tearing down the caller. A panicked run
/// leaves the project `failed`.
pub async fn run_isolated(
    pipeline: &Pipeline,
    project_id: Uuid,
    run_id: Uuid,
    options: RunOptions,
) -> Result<RunReport, PipelineError> {
    let task = pipeline.clone();
    match tokio::spawn(async move { task.run_as(project_id, run_id, options).await }).await {
        Ok(result) => result,
        Err(join) => {
            error!(
                target = "catalyst.jobs",
                project_id = %project_id,
                error = %join,
                "run_panicked"
            );
            pipeline.mark_failed(project_id, run_id).await;
            Err(PipelineError::internal("run", "pipeline run panicked"))
        }
    }
}
