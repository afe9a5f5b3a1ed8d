use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use machine_learning::{ModelType, OptimizerKind};
use trainer::{
    EngineConfig, Emitter, Hyperparameters, TrainerEngine, TrainerErr, TrainingController,
    TrainingEvent, TrainingOptions,
};

fn engine() -> TrainerEngine {
    TrainerEngine::new(EngineConfig {
        samples: 100,
        batch_delay: Duration::ZERO,
        ..Default::default()
    })
}

fn options(model_type: ModelType, epochs: usize, batch_size: usize) -> TrainingOptions {
    TrainingOptions::new(
        model_type,
        Hyperparameters {
            epochs,
            batch_size,
            learning_rate: 0.01,
            optimizer: OptimizerKind::Sgd,
        },
    )
    .with_seed(17)
}

#[tokio::test]
async fn emits_one_epoch_event_per_epoch_in_order() {
    let controller = TrainingController::new();
    let mut emitter = Emitter::new("epochs");
    let mut rx = emitter.subscribe_channel();

    let result = engine()
        .run(&options(ModelType::Cnn, 3, 10), &controller, &mut emitter)
        .await
        .unwrap();

    let mut epochs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TrainingEvent::EpochComplete(metrics) = event {
            epochs.push(metrics.epoch);
        }
    }

    assert_eq!(epochs, vec![1, 2, 3]);
    assert_eq!(result.epoch_metrics.len(), 3);
}

#[tokio::test]
async fn progress_events_are_ordered_and_reach_one_hundred() {
    let controller = TrainingController::new();
    let mut emitter = Emitter::new("progress");
    let mut rx = emitter.subscribe_channel();

    engine()
        .run(&options(ModelType::Rnn, 2, 10), &controller, &mut emitter)
        .await
        .unwrap();

    let mut progress = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let TrainingEvent::Progress(update) = event {
            assert_eq!(update.total_batches, 8);
            progress.push(update.progress);
        }
    }

    assert_eq!(progress.len(), 16);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!((progress[15] - 100.).abs() < 1e-3);
}

#[tokio::test]
async fn pause_holds_progress_until_resume() {
    let controller = TrainingController::new();
    let stamps: Arc<Mutex<Vec<DateTime<Utc>>>> = Arc::default();

    let mut emitter = Emitter::new("pause");
    {
        let controller = controller.clone();
        let stamps = Arc::clone(&stamps);
        emitter.subscribe(move |event: &TrainingEvent| {
            if let TrainingEvent::Progress(update) = event {
                let mut stamps = stamps.lock().unwrap();
                stamps.push(update.timestamp);
                if stamps.len() == 3 {
                    controller.pause();
                }
            }
        });
    }

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let opts = options(ModelType::Mlp, 2, 10);
            engine().run(&opts, &controller, &mut emitter).await
        })
    };

    while !controller.is_paused() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stamps.lock().unwrap().len(), 3);

    let resumed_at = Utc::now();
    assert!(controller.resume());

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.epoch_metrics.len(), 2);

    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 16);
    assert!(stamps[3..].iter().all(|t| *t >= resumed_at));
}

#[tokio::test]
async fn abort_stops_at_the_next_checkpoint() {
    let controller = TrainingController::new();
    let events: Arc<Mutex<Vec<TrainingEvent>>> = Arc::default();

    let mut emitter = Emitter::new("abort");
    {
        let controller = controller.clone();
        let events = Arc::clone(&events);
        let mut progress = 0;
        emitter.subscribe(move |event: &TrainingEvent| {
            events.lock().unwrap().push(event.clone());
            if matches!(event, TrainingEvent::Progress(_)) {
                progress += 1;
                if progress == 3 {
                    controller.abort();
                }
            }
        });
    }

    let err = engine()
        .run(&options(ModelType::Mlp, 2, 10), &controller, &mut emitter)
        .await
        .unwrap_err();

    assert_eq!(err, TrainerErr::Cancelled { epoch: 1, batch: 3 });

    let events = events.lock().unwrap();
    let Some(TrainingEvent::Progress(last)) = events.last() else {
        panic!("the last event should be the progress that triggered the abort");
    };
    assert_eq!(last.batch, 3);
}

#[tokio::test]
async fn abort_releases_a_paused_run() {
    let controller = TrainingController::new();
    controller.pause();

    let run = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let opts = options(ModelType::Mlp, 1, 10);
            engine()
                .run(&opts, &controller, &mut Emitter::new("paused"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!run.is_finished());

    controller.abort();
    let err = run.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn two_epoch_mlp_run() {
    let engine = TrainerEngine::new(EngineConfig {
        batch_delay: Duration::ZERO,
        ..Default::default()
    });
    let controller = TrainingController::new();
    let opts = options(ModelType::Mlp, 2, 32);

    let result = engine
        .run(&opts, &controller, &mut Emitter::new("mlp"))
        .await
        .unwrap();

    assert_eq!(result.epoch_metrics.len(), 2);
    assert_eq!(result.metadata.total_epochs, 2);
    assert_eq!(result.metadata.parameter_count, 1024);
    assert_eq!(result.gradients.len(), 1024);
    assert_eq!(result.weights.len(), 1024);
    assert!(result.metadata.best_validation_accuracy.is_some());
}
