use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use trainer::{
    Emitter, EpochMetrics, LogLine, TrainerEngine, TrainerErr, TrainingController, TrainingEvent,
    TrainingOptions,
};
use uuid::Uuid;

use crate::error::BackendErr;

/// What the backend is asked to train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub model_id: String,
    pub options: TrainingOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl RemoteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResult {
    pub final_loss: f32,
    pub final_accuracy: f32,
    pub blob_reference: Option<String>,
}

/// A backend run as reported by a status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub status: RemoteState,
    pub progress: f32,
    pub current_epoch: usize,
    /// Log lines produced since the previous poll.
    #[serde(default)]
    pub logs: Vec<LogLine>,
    /// Every epoch finished so far.
    #[serde(default)]
    pub epoch_metrics: Vec<EpochMetrics>,
    pub result: Option<RemoteResult>,
    pub error: Option<String>,
}

impl RemoteStatus {
    fn queued() -> Self {
        Self {
            status: RemoteState::Queued,
            progress: 0.,
            current_epoch: 0,
            logs: Vec::new(),
            epoch_metrics: Vec::new(),
            result: None,
            error: None,
        }
    }
}

/// A remote service that runs training jobs on behalf of the client.
#[async_trait]
pub trait BackendService: Send + Sync {
    /// Starts a run and returns its backend id.
    async fn start(&self, request: &BackendRequest) -> Result<String, BackendErr>;

    async fn pause(&self, id: &str) -> Result<(), BackendErr>;

    async fn resume(&self, id: &str) -> Result<(), BackendErr>;

    async fn stop(&self, id: &str) -> Result<(), BackendErr>;

    async fn status(&self, id: &str) -> Result<RemoteStatus, BackendErr>;
}

#[derive(Debug)]
struct Job {
    controller: TrainingController,
    status: RemoteStatus,
    /// Polls left that answer `NotFound` before the job becomes visible.
    hidden_polls: usize,
}

type Jobs = Arc<Mutex<HashMap<String, Job>>>;

/// A backend that trains in process with its own `TrainerEngine`.
///
/// Jobs can be kept invisible to the first few status polls to reproduce the window
/// between a run starting and the backend reporting it. A job is forgotten once a poll
/// has reported its terminal status.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    engine: TrainerEngine,
    hidden_polls: usize,
    jobs: Jobs,
}

impl LocalBackend {
    pub fn new(engine: TrainerEngine) -> Self {
        Self {
            engine,
            hidden_polls: 0,
            jobs: Jobs::default(),
        }
    }

    /// Hides every new job from its first `polls` status requests.
    pub fn with_hidden_polls(mut self, polls: usize) -> Self {
        self.hidden_polls = polls;
        self
    }

    fn with_job<T>(&self, id: &str, f: impl FnOnce(&mut Job) -> T) -> Result<T, BackendErr> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| BackendErr::NotFound(id.to_string()))?;
        Ok(f(job))
    }
}

fn record(jobs: &Jobs, id: &str, event: &TrainingEvent) {
    let mut jobs = jobs.lock();
    let Some(job) = jobs.get_mut(id) else {
        return;
    };

    let status = &mut job.status;
    match event {
        TrainingEvent::Progress(update) => {
            if status.status == RemoteState::Queued {
                status.status = RemoteState::Running;
            }
            status.progress = update.progress;
            status.current_epoch = update.epoch;
        }
        TrainingEvent::EpochComplete(metrics) => status.epoch_metrics.push(metrics.clone()),
        TrainingEvent::Log(line) => status.logs.push(line.clone()),
    }
}

#[async_trait]
impl BackendService for LocalBackend {
    async fn start(&self, request: &BackendRequest) -> Result<String, BackendErr> {
        request
            .options
            .validate()
            .map_err(|e| BackendErr::Rejected(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let controller = TrainingController::new();

        self.jobs.lock().insert(
            id.clone(),
            Job {
                controller: controller.clone(),
                status: RemoteStatus::queued(),
                hidden_polls: self.hidden_polls,
            },
        );

        let mut emitter = Emitter::new(id.clone());
        {
            let jobs = Arc::clone(&self.jobs);
            let id = id.clone();
            emitter.subscribe(move |event: &TrainingEvent| record(&jobs, &id, event));
        }

        let engine = self.engine.clone();
        let jobs = Arc::clone(&self.jobs);
        let options = request.options;
        let job_id = id.clone();

        tokio::spawn(async move {
            let outcome = engine.run(&options, &controller, &mut emitter).await;

            let mut jobs = jobs.lock();
            let Some(job) = jobs.get_mut(&job_id) else {
                return;
            };

            let status = &mut job.status;
            match outcome {
                Ok(result) => {
                    status.status = RemoteState::Completed;
                    status.progress = 100.;
                    status.result = Some(RemoteResult {
                        final_loss: result.metadata.final_loss,
                        final_accuracy: result.metadata.final_accuracy,
                        blob_reference: None,
                    });
                }
                Err(TrainerErr::Cancelled { .. }) => status.status = RemoteState::Stopped,
                Err(e) => {
                    status.status = RemoteState::Failed;
                    status.error = Some(e.to_string());
                }
            }

            debug!(job = job_id.as_str(); "backend job finished");
        });

        Ok(id)
    }

    async fn pause(&self, id: &str) -> Result<(), BackendErr> {
        self.with_job(id, |job| {
            if job.controller.pause() {
                job.status.status = RemoteState::Paused;
            }
        })
    }

    async fn resume(&self, id: &str) -> Result<(), BackendErr> {
        self.with_job(id, |job| {
            if job.controller.resume() {
                job.status.status = RemoteState::Running;
            }
        })
    }

    async fn stop(&self, id: &str) -> Result<(), BackendErr> {
        self.with_job(id, |job| job.controller.abort())
    }

    async fn status(&self, id: &str) -> Result<RemoteStatus, BackendErr> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| BackendErr::NotFound(id.to_string()))?;

        if job.hidden_polls > 0 {
            job.hidden_polls -= 1;
            return Err(BackendErr::NotFound(id.to_string()));
        }

        let mut status = job.status.clone();
        status.logs = std::mem::take(&mut job.status.logs);

        if status.status.is_terminal() {
            jobs.remove(id);
            debug!(job = id; "terminal status reported, job evicted");
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use machine_learning::{ModelType, OptimizerKind};
    use trainer::{EngineConfig, Hyperparameters};

    use super::*;

    fn backend() -> LocalBackend {
        LocalBackend::new(TrainerEngine::new(EngineConfig {
            samples: 40,
            batch_delay: Duration::ZERO,
            ..Default::default()
        }))
    }

    fn request(epochs: usize) -> BackendRequest {
        BackendRequest {
            model_id: "m".into(),
            options: TrainingOptions::new(
                ModelType::Mlp,
                Hyperparameters {
                    epochs,
                    batch_size: 8,
                    learning_rate: 0.01,
                    optimizer: OptimizerKind::Sgd,
                },
            )
            .with_seed(1),
        }
    }

    async fn wait_for_terminal(backend: &LocalBackend, id: &str) -> RemoteStatus {
        loop {
            let status = backend.status(id).await.unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn job_runs_to_completion() {
        let backend = backend();
        let id = backend.start(&request(2)).await.unwrap();

        let status = wait_for_terminal(&backend, &id).await;
        assert_eq!(status.status, RemoteState::Completed);
        assert_eq!(status.epoch_metrics.len(), 2);
        assert!(status.result.is_some());
    }

    #[tokio::test]
    async fn finished_jobs_are_evicted_once_reported() {
        let backend = backend();
        let first = backend.start(&request(1)).await.unwrap();
        let second = backend.start(&request(1)).await.unwrap();

        wait_for_terminal(&backend, &first).await;
        assert_eq!(backend.jobs.lock().len(), 1);
        assert!(backend.status(&first).await.unwrap_err().is_not_found());

        wait_for_terminal(&backend, &second).await;
        assert!(backend.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn invalid_request_is_rejected() {
        let mut req = request(1);
        req.options.hyperparameters.epochs = 0;

        let err = backend().start(&req).await.unwrap_err();
        assert!(matches!(err, BackendErr::Rejected(_)));
    }

    #[tokio::test]
    async fn hidden_jobs_answer_not_found_first() {
        let backend = backend().with_hidden_polls(2);
        let id = backend.start(&request(1)).await.unwrap();

        assert!(backend.status(&id).await.unwrap_err().is_not_found());
        assert!(backend.status(&id).await.unwrap_err().is_not_found());
        assert!(backend.status(&id).await.is_ok());
    }

    #[tokio::test]
    async fn stop_ends_a_paused_job() {
        let backend = backend();
        let id = backend.start(&request(50)).await.unwrap();

        backend.pause(&id).await.unwrap();
        assert_eq!(backend.status(&id).await.unwrap().status, RemoteState::Paused);

        backend.stop(&id).await.unwrap();
        let status = wait_for_terminal(&backend, &id).await;
        assert_eq!(status.status, RemoteState::Stopped);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let err = backend().pause("nope").await.unwrap_err();
        assert_eq!(err, BackendErr::NotFound("nope".into()));
    }
}
