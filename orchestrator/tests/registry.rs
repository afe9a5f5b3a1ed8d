use std::{collections::HashSet, sync::Arc, thread};

use machine_learning::{ModelType, OptimizerKind};
use orchestrator::{
    Completion, JsonFileStore, RegistryErr, SessionRegistry, SessionStatus, SessionUpdate,
};
use trainer::Hyperparameters;

fn hp() -> Hyperparameters {
    Hyperparameters {
        epochs: 3,
        batch_size: 32,
        learning_rate: 0.001,
        optimizer: OptimizerKind::Sgd,
    }
}

#[test]
fn concurrent_creates_never_collide() {
    let registry = Arc::new(SessionRegistry::in_memory());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..25)
                    .map(|i| registry.create_session(format!("m{t}-{i}"), ModelType::Mlp, hp()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(ids.len(), 200);
    assert_eq!(registry.sessions().len(), 200);
}

#[test]
fn concurrent_activations_leave_one_active_session() {
    let registry = Arc::new(SessionRegistry::in_memory());
    let ids: Vec<_> = (0..16)
        .map(|i| registry.create_session(format!("m{i}"), ModelType::Cnn, hp()))
        .collect();

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry.update_session(&id, SessionUpdate::status(SessionStatus::Training))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let accepted = results.iter().filter(|r| r.is_ok()).count();

    assert_eq!(accepted, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RegistryErr::ActiveSessionExists(_)))
    );

    let active = registry
        .sessions()
        .into_iter()
        .filter(|s| s.status.is_active())
        .count();
    assert_eq!(active, 1);
}

#[test]
fn terminal_sessions_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");

    let (done, failed) = {
        let registry = SessionRegistry::open(JsonFileStore::new(&path)).unwrap();
        let done = registry.create_session("a", ModelType::Transformer, hp());
        let failed = registry.create_session("b", ModelType::Rnn, hp());
        let live = registry.create_session("c", ModelType::Mlp, hp());

        registry
            .update_session(&live, SessionUpdate::status(SessionStatus::Training))
            .unwrap();
        registry
            .complete_session(
                &done,
                Completion {
                    loss: 0.1,
                    accuracy: 0.95,
                    blob_reference: Some("blob-1".into()),
                },
            )
            .unwrap();
        registry.fail_session(&failed, "backend unreachable").unwrap();

        (done, failed)
    };

    let registry = SessionRegistry::open(JsonFileStore::new(&path)).unwrap();

    let ids: HashSet<_> = registry.sessions().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, HashSet::from([done.clone(), failed.clone()]));
    assert!(registry.active_session().is_none());

    let history = registry.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].session_id, done);
    assert_eq!(history[0].blob_reference.as_deref(), Some("blob-1"));
    assert_eq!(registry.stats().completed_count, 1);
    assert!((registry.average_accuracy() - 0.95).abs() < 1e-6);

    let failed = registry.get_session(&failed).unwrap();
    assert_eq!(failed.error.as_deref(), Some("backend unreachable"));
}
