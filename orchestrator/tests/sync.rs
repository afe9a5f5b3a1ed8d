use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use machine_learning::{ModelType, OptimizerKind};
use orchestrator::{
    BackendErr, BackendRequest, BackendService, BackendSync, LocalBackend, MemoryBlobStore,
    Orchestrator, OrchestratorConfig, OrchestratorErr, RemoteStatus, SessionRegistry,
    SessionStatus, SessionUpdate, SyncConfig, SyncOutcome,
};
use trainer::{EngineConfig, Hyperparameters, TrainerEngine, TrainingOptions};

/// A backend that never learns about any run.
#[derive(Default)]
struct AmnesicBackend {
    polls: AtomicUsize,
}

#[async_trait]
impl BackendService for AmnesicBackend {
    async fn start(&self, _: &BackendRequest) -> Result<String, BackendErr> {
        Ok("remote-1".into())
    }

    async fn pause(&self, id: &str) -> Result<(), BackendErr> {
        Err(BackendErr::NotFound(id.into()))
    }

    async fn resume(&self, id: &str) -> Result<(), BackendErr> {
        Err(BackendErr::NotFound(id.into()))
    }

    async fn stop(&self, id: &str) -> Result<(), BackendErr> {
        Err(BackendErr::NotFound(id.into()))
    }

    async fn status(&self, id: &str) -> Result<RemoteStatus, BackendErr> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Err(BackendErr::NotFound(id.into()))
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        samples: 40,
        batch_delay_ms: 0,
        poll_interval_ms: 5,
        max_not_found: 3,
        ..Default::default()
    }
}

fn options(epochs: usize) -> TrainingOptions {
    TrainingOptions::new(
        ModelType::Cnn,
        Hyperparameters {
            epochs,
            batch_size: 8,
            learning_rate: 0.05,
            optimizer: OptimizerKind::RmsProp,
        },
    )
    .with_seed(9)
}

fn local_backend(hidden_polls: usize) -> Arc<LocalBackend> {
    let engine = TrainerEngine::new(EngineConfig {
        samples: 40,
        batch_delay: Duration::from_millis(1),
        ..Default::default()
    });

    Arc::new(LocalBackend::new(engine).with_hidden_polls(hidden_polls))
}

#[tokio::test]
async fn delegated_run_is_mirrored_until_completion() {
    let orch = Orchestrator::new(
        config(),
        Arc::new(SessionRegistry::in_memory()),
        MemoryBlobStore::default(),
    )
    .with_backend(local_backend(2));

    let id = orch.delegate("model", options(3)).await.unwrap();

    let session = orch.registry().get_session(&id).unwrap();
    assert!(session.backend_id.is_some());

    let outcomes = orch.sync().unwrap().join().await;
    assert_eq!(outcomes, vec![SyncOutcome::Completed]);

    let session = orch.registry().get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.epoch_metrics.len(), 3);
    assert_eq!(orch.registry().history().len(), 1);
}

#[tokio::test]
async fn delegated_run_completes_while_a_local_session_is_active() {
    let orch = Orchestrator::new(
        config(),
        Arc::new(SessionRegistry::in_memory()),
        MemoryBlobStore::default(),
    )
    .with_backend(local_backend(0));

    let hp = options(1).hyperparameters;
    let local = orch.registry().create_session("local", ModelType::Cnn, hp);
    orch.registry()
        .update_session(&local, SessionUpdate::status(SessionStatus::Training))
        .unwrap();

    let id = orch.delegate("model", options(2)).await.unwrap();
    let outcomes = orch.sync().unwrap().join().await;
    assert_eq!(outcomes, vec![SyncOutcome::Completed]);

    let session = orch.registry().get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.epoch_metrics.len(), 2);
    assert_eq!(orch.registry().history().len(), 1);
    assert_eq!(orch.registry().active_session().unwrap().id, local);
}

#[tokio::test]
async fn not_found_past_the_budget_fails_the_session() {
    let backend = Arc::new(AmnesicBackend::default());
    let orch = Orchestrator::new(
        config(),
        Arc::new(SessionRegistry::in_memory()),
        MemoryBlobStore::default(),
    )
    .with_backend(backend.clone());

    let id = orch.delegate("model", options(1)).await.unwrap();
    let outcomes = orch.sync().unwrap().join().await;

    assert_eq!(outcomes, vec![SyncOutcome::Failed]);
    assert_eq!(backend.polls.load(Ordering::SeqCst), 4);

    let session = orch.registry().get_session(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.error.is_some());
}

#[tokio::test]
async fn delegated_stop_returns_the_session_to_idle() {
    let orch = Orchestrator::new(
        config(),
        Arc::new(SessionRegistry::in_memory()),
        MemoryBlobStore::default(),
    )
    .with_backend(local_backend(0));

    let id = orch.delegate("model", options(200)).await.unwrap();
    orch.pause_delegated(&id).await.unwrap();
    orch.stop_delegated(&id).await.unwrap();

    let outcomes = orch.sync().unwrap().join().await;
    assert_eq!(outcomes, vec![SyncOutcome::Stopped]);
    assert_eq!(
        orch.registry().get_session(&id).unwrap().status,
        SessionStatus::Idle
    );
}

#[tokio::test]
async fn shutdown_cancels_pending_polls() {
    let registry = Arc::new(SessionRegistry::in_memory());
    let sync = BackendSync::new(
        Arc::new(AmnesicBackend::default()),
        Arc::clone(&registry),
        SyncConfig {
            poll_interval: Duration::from_secs(60),
            max_not_found: 8,
        },
    );

    let hp = options(1).hyperparameters;
    let id = registry.create_session("m", ModelType::Cnn, hp);
    sync.track(id.clone(), "remote-1".into());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sync.shutdown().await, vec![SyncOutcome::Cancelled]);
    assert_eq!(
        registry.get_session(&id).unwrap().status,
        SessionStatus::Idle
    );
}

#[tokio::test]
async fn delegation_needs_a_backend() {
    let orch = Orchestrator::new(
        config(),
        Arc::new(SessionRegistry::in_memory()),
        MemoryBlobStore::default(),
    );

    let err = orch.delegate("model", options(1)).await.unwrap_err();
    assert!(matches!(err, OrchestratorErr::InvalidConfig(_)));
    assert!(orch.registry().sessions().is_empty());
}
