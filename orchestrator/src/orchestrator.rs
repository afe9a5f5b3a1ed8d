use std::sync::Arc;

use log::{info, warn};
use machine_learning::ModelType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use trainer::{
    Emitter, ResultMetadata, TrainerEngine, TrainerErr, TrainingController, TrainingEvent,
    TrainingOptions, TrainingResult,
};

use crate::{
    backend::{BackendRequest, BackendService},
    blob::{BlobReceipt, BlobStore},
    config::{OrchestratorConfig, RetryPolicy},
    error::{BlobErr, OrchestratorErr},
    registry::{MemoryStore, SessionRegistry, SessionStore},
    session::{Completion, SessionStatus, SessionUpdate},
    sync::BackendSync,
};

pub type Result<T> = std::result::Result<T, OrchestratorErr>;

/// The document uploaded to the blob store once a run finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub session_id: String,
    pub model_type: ModelType,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
    pub metadata: ResultMetadata,
}

/// Drives local training runs and keeps the registry in step with them.
///
/// Only one local run is driven at a time, the controller is shared by whoever holds
/// the orchestrator.
pub struct Orchestrator<B: BlobStore, S: SessionStore + 'static = MemoryStore> {
    config: OrchestratorConfig,
    engine: TrainerEngine,
    controller: TrainingController,
    registry: Arc<SessionRegistry<S>>,
    blobs: B,
    sync: Option<BackendSync<S>>,
    running: Mutex<Option<String>>,
}

impl<B: BlobStore, S: SessionStore + 'static> Orchestrator<B, S> {
    /// Creates a new `Orchestrator`.
    ///
    /// # Arguments
    /// * `config` - The runtime settings.
    /// * `registry` - Where sessions are recorded.
    /// * `blobs` - Where model artifacts are uploaded.
    pub fn new(config: OrchestratorConfig, registry: Arc<SessionRegistry<S>>, blobs: B) -> Self {
        Self {
            engine: TrainerEngine::new(config.engine_config()),
            config,
            controller: TrainingController::new(),
            registry,
            blobs,
            sync: None,
            running: Mutex::default(),
        }
    }

    /// Enables delegation of runs to `backend`.
    pub fn with_backend(mut self, backend: Arc<dyn BackendService>) -> Self {
        let sync = BackendSync::new(backend, Arc::clone(&self.registry), self.config.sync_config());
        self.sync = Some(sync);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<S>> {
        &self.registry
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn controller(&self) -> &TrainingController {
        &self.controller
    }

    pub fn sync(&self) -> Option<&BackendSync<S>> {
        self.sync.as_ref()
    }

    /// Runs a local training loop for an existing session.
    ///
    /// The session moves to `Training`, mirrors every progress and epoch event, then goes
    /// through `Uploading` to `Completed` once the artifact is stored. Validation errors and
    /// failed uploads fail the session, a stop sends it back to `Idle`.
    ///
    /// # Arguments
    /// * `session_id` - A session previously created in the registry.
    /// * `options` - What to train and how.
    /// * `emitter` - Extra observers of the run, the registry observer is added to it.
    ///
    /// # Returns
    /// The result of the run.
    ///
    /// # Errors
    /// `Busy` while another local run is driven, the controller of that run is left alone.
    pub async fn start_training(
        &self,
        session_id: &str,
        options: TrainingOptions,
        mut emitter: Emitter,
    ) -> Result<TrainingResult> {
        {
            let mut running = self.running.lock();
            if let Some(busy) = running.as_deref() {
                return Err(OrchestratorErr::Busy(busy.to_string()));
            }

            self.registry
                .update_session(session_id, SessionUpdate::status(SessionStatus::Training))?;
            self.controller.reset();
            *running = Some(session_id.to_string());
        }

        emitter.subscribe(registry_observer(Arc::clone(&self.registry), session_id));

        info!(session = session_id; "starting local training");
        let outcome = self.engine.run(&options, &self.controller, &mut emitter).await;
        *self.running.lock() = None;

        let result = match outcome {
            Ok(result) => result,
            Err(e @ TrainerErr::Cancelled { .. }) => {
                info!(session = session_id; "training stopped: {e}");
                self.registry
                    .update_session(session_id, SessionUpdate::status(SessionStatus::Idle))?;
                return Err(e.into());
            }
            Err(e) => {
                self.registry.fail_session(session_id, e.to_string())?;
                return Err(e.into());
            }
        };

        self.registry
            .update_session(session_id, SessionUpdate::status(SessionStatus::Uploading))?;

        let receipt = match self.upload_artifact(session_id, &result).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.registry.fail_session(session_id, e.to_string())?;
                return Err(e);
            }
        };

        self.registry.complete_session(
            session_id,
            Completion {
                loss: result.metadata.final_loss,
                accuracy: result.metadata.final_accuracy,
                blob_reference: Some(receipt.blob_id),
            },
        )?;

        Ok(result)
    }

    /// Pauses the local run, the loop stops at its next checkpoint.
    ///
    /// # Returns
    /// Whether the run was paused by this call.
    pub fn pause(&self) -> bool {
        self.transition(self.controller.pause(), SessionStatus::Paused)
    }

    /// Resumes a paused local run.
    ///
    /// # Returns
    /// Whether the run was resumed by this call.
    pub fn resume(&self) -> bool {
        self.transition(self.controller.resume(), SessionStatus::Training)
    }

    /// Aborts the local run, it ends with a cancellation at its next checkpoint.
    pub fn stop(&self) {
        self.controller.abort();
    }

    pub fn is_paused(&self) -> bool {
        self.controller.is_paused()
    }

    pub fn is_aborted(&self) -> bool {
        self.controller.is_aborted()
    }

    /// Starts a run on the backend and hands the new session to the background sync.
    ///
    /// # Returns
    /// The id of the local session.
    ///
    /// # Errors
    /// `InvalidConfig` without a backend, `Trainer` for invalid options and `Backend` if
    /// the backend refused to start, in which case the session is failed.
    pub async fn delegate(&self, model_id: &str, options: TrainingOptions) -> Result<String> {
        let sync = self
            .sync
            .as_ref()
            .ok_or_else(|| OrchestratorErr::InvalidConfig("no backend configured".into()))?;

        options.validate()?;

        let session_id =
            self.registry
                .create_session(model_id, options.model_type, options.hyperparameters);

        self.registry
            .update_session(&session_id, SessionUpdate::status(SessionStatus::Preparing))?;

        let request = BackendRequest {
            model_id: model_id.to_string(),
            options,
        };

        let backend_id = match sync.backend().start(&request).await {
            Ok(id) => id,
            Err(e) => {
                self.registry.fail_session(&session_id, e.to_string())?;
                return Err(e.into());
            }
        };

        self.registry.update_session(
            &session_id,
            SessionUpdate {
                backend_id: Some(backend_id.clone()),
                ..Default::default()
            },
        )?;

        info!(session = session_id.as_str(), backend = backend_id.as_str(); "session delegated");
        sync.track(session_id.clone(), backend_id);
        Ok(session_id)
    }

    /// Pauses a delegated run on the backend.
    pub async fn pause_delegated(&self, session_id: &str) -> Result<()> {
        let (sync, backend_id) = self.delegated(session_id)?;
        Ok(sync.backend().pause(&backend_id).await?)
    }

    /// Resumes a delegated run on the backend.
    pub async fn resume_delegated(&self, session_id: &str) -> Result<()> {
        let (sync, backend_id) = self.delegated(session_id)?;
        Ok(sync.backend().resume(&backend_id).await?)
    }

    /// Stops a delegated run on the backend.
    pub async fn stop_delegated(&self, session_id: &str) -> Result<()> {
        let (sync, backend_id) = self.delegated(session_id)?;
        Ok(sync.backend().stop(&backend_id).await?)
    }

    fn delegated(&self, session_id: &str) -> Result<(&BackendSync<S>, String)> {
        let sync = self
            .sync
            .as_ref()
            .ok_or_else(|| OrchestratorErr::InvalidConfig("no backend configured".into()))?;

        let backend_id = self
            .registry
            .get_session(session_id)
            .and_then(|s| s.backend_id)
            .ok_or_else(|| {
                OrchestratorErr::InvalidConfig(format!("session {session_id} is not delegated"))
            })?;

        Ok((sync, backend_id))
    }

    fn transition(&self, changed: bool, status: SessionStatus) -> bool {
        if !changed {
            return false;
        }

        if let Some(id) = self.running.lock().as_deref()
            && let Err(e) = self.registry.update_session(id, SessionUpdate::status(status))
        {
            warn!(session = id; "failed to record {status}: {e}");
        }

        true
    }

    /// Uploads the artifact of a run, retrying network failures with exponential backoff.
    async fn upload_artifact(&self, session_id: &str, result: &TrainingResult) -> Result<BlobReceipt> {
        let artifact = ModelArtifact {
            session_id: session_id.to_string(),
            model_type: result.metadata.model_type,
            weights: result.weights.clone(),
            biases: result.biases.clone(),
            metadata: result.metadata.clone(),
        };
        let bytes = serde_json::to_vec(&artifact)?;

        Ok(upload_with_retry(
            &self.blobs,
            bytes,
            self.config.retention_epochs,
            self.config.retry_policy(),
        )
        .await?)
    }
}

/// Uploads `bytes`, retrying only network failures.
pub async fn upload_with_retry<B: BlobStore>(
    blobs: &B,
    bytes: Vec<u8>,
    retention_epochs: u32,
    policy: RetryPolicy,
) -> std::result::Result<BlobReceipt, BlobErr> {
    let mut attempt = 0;

    loop {
        match blobs.upload_blob(bytes.clone(), retention_epochs).await {
            Ok(receipt) => return Ok(receipt),
            Err(BlobErr::Network(detail)) if attempt < policy.retries => {
                let delay = policy.delay(attempt);
                warn!(attempt = attempt + 1; "upload failed, retrying in {delay:?}: {detail}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn registry_observer<S: SessionStore + 'static>(
    registry: Arc<SessionRegistry<S>>,
    session_id: &str,
) -> impl FnMut(&TrainingEvent) + Send + 'static {
    let id = session_id.to_string();

    move |event: &TrainingEvent| {
        let update = match event {
            TrainingEvent::Progress(p) => SessionUpdate {
                progress: Some(p.progress),
                current_epoch: Some(p.epoch),
                loss: Some(p.loss),
                accuracy: Some(p.accuracy),
                ..Default::default()
            },
            TrainingEvent::EpochComplete(metrics) => SessionUpdate {
                epoch_metrics: Some(metrics.clone()),
                ..Default::default()
            },
            TrainingEvent::Log(_) => return,
        };

        if let Err(e) = registry.update_session(&id, update) {
            warn!(session = id.as_str(); "failed to record training event: {e}");
        }
    }
}
