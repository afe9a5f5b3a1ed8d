use std::{env, sync::Arc};

use anyhow::{Context, bail};
use log::{debug, info, warn};
use machine_learning::{ModelType, OptimizerKind};
use orchestrator::{
    JsonFileStore, LocalBackend, MemoryBlobStore, MemoryStore, Orchestrator, OrchestratorConfig,
    SessionRegistry, SessionStore,
};
use tokio::signal;
use trainer::{
    Emitter, Hyperparameters, LogLevel, TrainerEngine, TrainingEvent, TrainingOptions,
};

const USAGE: &str = "usage: training-sim [--delegate] [mlp|cnn|rnn|transformer] [epochs] \
                     [batch_size] [learning_rate] [sgd|adam|rmsprop]";

type Orch<S> = Orchestrator<MemoryBlobStore, S>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let delegate = match args.iter().position(|a| a == "--delegate") {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    };

    let options = parse_options(&args)?;

    let config = match env::var("TRAINING_SIM_CONFIG") {
        Ok(path) => OrchestratorConfig::from_file(&path)?,
        Err(_) => OrchestratorConfig::default(),
    }
    .with_env()?;

    match config.store_path.clone() {
        Some(path) => {
            info!("persisting sessions to {}", path.display());
            let registry = SessionRegistry::open(JsonFileStore::new(path))?;
            run(config, registry, options, delegate).await
        }
        None => {
            let registry = SessionRegistry::open(MemoryStore::new())?;
            run(config, registry, options, delegate).await
        }
    }
}

fn parse_options(args: &[String]) -> anyhow::Result<TrainingOptions> {
    if args.len() > 5 {
        bail!("{USAGE}");
    }

    let arg = |i: usize, default: &str| args.get(i).cloned().unwrap_or_else(|| default.into());

    let model_type: ModelType = arg(0, "mlp").parse().map_err(anyhow::Error::msg)?;
    let epochs: usize = arg(1, "5").parse().context("epochs")?;
    let batch_size: usize = arg(2, "32").parse().context("batch size")?;
    let learning_rate: f32 = arg(3, "0.01").parse().context("learning rate")?;
    let optimizer: OptimizerKind = arg(4, "adam").parse().map_err(anyhow::Error::msg)?;

    let mut options = TrainingOptions::new(
        model_type,
        Hyperparameters {
            epochs,
            batch_size,
            learning_rate,
            optimizer,
        },
    );

    if let Ok(seed) = env::var("TRAINING_SIM_SEED") {
        options = options.with_seed(seed.parse().context("TRAINING_SIM_SEED")?);
    }

    options.validate().context(USAGE)?;
    Ok(options)
}

async fn run<S: SessionStore + 'static>(
    config: OrchestratorConfig,
    registry: SessionRegistry<S>,
    options: TrainingOptions,
    delegate: bool,
) -> anyhow::Result<()> {
    let backend = LocalBackend::new(TrainerEngine::new(config.engine_config()));
    let orch = Arc::new(
        Orchestrator::new(config, Arc::new(registry), MemoryBlobStore::default())
            .with_backend(Arc::new(backend)),
    );

    let id = if delegate {
        run_delegated(&orch, options).await?
    } else {
        run_local(&orch, options).await?
    };

    if let Some(session) = orch.registry().get_session(&id) {
        info!(
            "session {id}: {} after {} epoch(s), loss {:.4}, accuracy {:.2}%",
            session.status,
            session.current_epoch,
            session.loss,
            session.accuracy * 100.
        );
        if let Some(error) = session.error {
            warn!("session {id} failed: {error}");
        }
        if let Some(blob) = session.blob_reference {
            info!("model artifact stored as {blob}");
        }
    }

    let stats = orch.registry().stats();
    info!(
        "{} completed session(s), average accuracy {:.2}%, average loss {:.4}",
        stats.completed_count,
        orch.registry().average_accuracy() * 100.,
        orch.registry().average_loss()
    );

    Ok(())
}

async fn run_local<S: SessionStore + 'static>(
    orch: &Arc<Orch<S>>,
    options: TrainingOptions,
) -> anyhow::Result<String> {
    let id = orch
        .registry()
        .create_session("cli", options.model_type, options.hyperparameters);

    let mut emitter = Emitter::new(id.clone());
    let mut events = emitter.subscribe_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let mut training = {
        let orch = Arc::clone(orch);
        let id = id.clone();
        tokio::spawn(async move { orch.start_training(&id, options, emitter).await })
    };

    let outcome = tokio::select! {
        joined = &mut training => joined?,
        _ = signal::ctrl_c() => {
            warn!("received SIGINT, stopping training");
            orch.stop();
            training.await?
        }
    };

    printer.await?;

    if let Err(e) = outcome {
        warn!("training did not complete: {e}");
    }

    Ok(id)
}

async fn run_delegated<S: SessionStore + 'static>(
    orch: &Arc<Orch<S>>,
    options: TrainingOptions,
) -> anyhow::Result<String> {
    let id = orch.delegate("cli", options).await?;
    info!("session {id} delegated to the backend");

    let Some(sync) = orch.sync() else {
        bail!("no backend sync configured");
    };

    let join = sync.join();
    tokio::pin!(join);

    let outcomes = tokio::select! {
        outcomes = &mut join => outcomes,
        _ = signal::ctrl_c() => {
            warn!("received SIGINT, stopping the delegated run");
            orch.stop_delegated(&id).await?;
            join.await
        }
    };

    debug!("backend sync finished: {outcomes:?}");
    Ok(id)
}

fn print_event(event: &TrainingEvent) {
    match event {
        TrainingEvent::Progress(p) => debug!(
            "epoch {} batch {}/{}: loss {:.4}, accuracy {:.4}, {:.1}%",
            p.epoch, p.batch, p.total_batches, p.loss, p.accuracy, p.progress
        ),
        TrainingEvent::EpochComplete(m) => debug!(
            "epoch {} done in {:?} at lr {}",
            m.epoch, m.duration, m.learning_rate
        ),
        TrainingEvent::Log(line) => match line.level {
            LogLevel::Error => eprintln!("[{}] {}", line.level, line.message),
            _ => println!("[{}] {}", line.level, line.message),
        },
    }
}
