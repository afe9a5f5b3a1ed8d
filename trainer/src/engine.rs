use std::time::Instant;

use chrono::Utc;
use log::{debug, info};
use machine_learning::{
    GradientSet, ModelMetadata, ModelState, Optimizer, aggregate, initialize, surrogate,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    EngineConfig, Result, TrainerErr, TrainingOptions,
    controller::TrainingController,
    curves::Curves,
    events::{Emitter, LogLevel, TrainingEvent},
    metrics::{EpochMetrics, ProgressUpdate, ResultMetadata, TrainingResult},
    schedule::LrSchedule,
    state::{EngineState, EpochAccumulator, History},
};

/// Upper bound on the synthetic samples whose gradients are averaged per batch.
const MAX_SAMPLES_PER_BATCH: usize = 4;

/// Runs simulated training loops.
///
/// The engine holds no per run state, a single instance may drive many runs one after the other.
#[derive(Debug, Clone, Default)]
pub struct TrainerEngine {
    config: EngineConfig,
}

impl TrainerEngine {
    /// Creates a new `TrainerEngine`.
    ///
    /// # Arguments
    /// * `config` - The execution bounds shared by every run.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one training loop to completion.
    ///
    /// The gate of `controller` is checked before every batch, a pause suspends the loop
    /// until resumed and an abort ends it with `TrainerErr::Cancelled`. Every event is
    /// delivered through `emitter` before the next batch starts.
    ///
    /// # Arguments
    /// * `options` - What to train and how.
    /// * `controller` - The pause/resume/abort gate of this run.
    /// * `emitter` - Where progress, epoch and log events go.
    ///
    /// # Returns
    /// The trained parameters, the histories and the run metadata.
    ///
    /// # Errors
    /// `InvalidOptions` before the loop starts, `Cancelled` on abort, `Ml` if a step fails.
    pub async fn run(
        &self,
        options: &TrainingOptions,
        controller: &TrainingController,
        emitter: &mut Emitter,
    ) -> Result<TrainingResult> {
        options.validate()?;

        let started = Instant::now();
        let model_type = options.model_type;
        let hp = options.hyperparameters;
        let profile = model_type.profile();
        let curves = Curves::new(profile, hp.optimizer);
        let schedule = LrSchedule::new(
            hp.learning_rate,
            self.config.decay_rate,
            self.config.decay_steps,
        );

        let total_batches = self
            .config
            .total_batches(hp.batch_size, options.validation_split);
        let total_steps = (hp.epochs * total_batches) as f32;
        let validate = options.validation_split > 0.;

        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let params = initialize(&mut rng, profile.param_count, profile.bias_count)?;
        let shape = vec![profile.param_count];
        let mut state = EngineState::new(ModelState::new(params.weights, shape), params.biases);
        let mut optimizer = hp.optimizer.build(state.model.len());
        let mut bias_optimizer = hp.optimizer.build(state.biases.len());

        let mut history = History::default();
        let mut epoch_metrics = Vec::with_capacity(hp.epochs);

        let model_name = model_type.to_string();
        info!(
            session = emitter.session(), model = model_name.as_str(), epochs = hp.epochs;
            "starting training run"
        );
        emitter.log(
            LogLevel::Info,
            format!(
                "Starting {model_type} training: {} epochs, {total_batches} batches per epoch, {} optimizer",
                hp.epochs, hp.optimizer
            ),
        );

        for epoch_idx in 0..hp.epochs {
            let epoch = epoch_idx + 1;
            let epoch_started = Instant::now();
            let learning_rate = schedule.rate(epoch_idx);
            let mut acc = EpochAccumulator::default();

            for batch in 0..total_batches {
                checkpoint(controller, epoch, batch).await?;
                self.simulate_work().await;

                let done = (epoch_idx * total_batches + batch + 1) as f32;
                let run_progress = done / total_steps;

                let loss = curves.loss(&mut rng, run_progress, learning_rate);
                let accuracy = curves.accuracy(&mut rng, run_progress);
                acc.push(loss, accuracy);
                history.loss.push(loss);
                history.accuracy.push(accuracy);

                let samples = hp.batch_size.min(MAX_SAMPLES_PER_BATCH);
                state.grads = self.batch_gradient(&mut rng, state.model.weights(), accuracy, samples)?;
                state.model = state
                    .model
                    .apply(optimizer.as_mut(), &state.grads, learning_rate)?;
                state.biases = step_biases(
                    bias_optimizer.as_mut(),
                    &state.biases,
                    &state.grads,
                    learning_rate,
                )?;
                state.inc_step();

                emitter.emit(TrainingEvent::Progress(ProgressUpdate {
                    epoch,
                    batch: batch + 1,
                    total_batches,
                    loss,
                    accuracy,
                    learning_rate,
                    progress: run_progress * 100.,
                    timestamp: Utc::now(),
                }));
            }

            let (train_loss, train_accuracy) = acc.mean();
            let (validation_loss, validation_accuracy) = if validate {
                let progress = epoch as f32 / hp.epochs as f32;
                let loss = curves.validation_loss(&mut rng, progress, learning_rate);
                let accuracy = curves.validation_accuracy(&mut rng, progress);
                history.validation_loss.push(loss);
                history.validation_accuracy.push(accuracy);
                (Some(loss), Some(accuracy))
            } else {
                (None, None)
            };

            let timestamp = Utc::now();
            state.model = state.model.clone().with_metadata(ModelMetadata {
                accuracy: train_accuracy,
                loss: train_loss,
                epoch,
                timestamp,
            });

            let metrics = EpochMetrics {
                epoch,
                train_loss,
                train_accuracy,
                validation_loss,
                validation_accuracy,
                learning_rate,
                duration: epoch_started.elapsed(),
                timestamp,
            };

            debug!(epoch = epoch, step = state.step; "epoch finished");
            emitter.emit(TrainingEvent::EpochComplete(metrics.clone()));
            emitter.log(LogLevel::Info, epoch_summary(&metrics, hp.epochs));
            epoch_metrics.push(metrics);
        }

        let final_loss = history.loss.last().copied().unwrap_or_default();
        let final_accuracy = history.accuracy.last().copied().unwrap_or_default();
        let best_validation_accuracy = history
            .validation_accuracy
            .iter()
            .copied()
            .reduce(f32::max);

        emitter.log(
            LogLevel::Success,
            format!(
                "Training completed: final loss {final_loss:.4}, final accuracy {:.2}%",
                final_accuracy * 100.
            ),
        );

        let metadata = ResultMetadata {
            model_type,
            total_epochs: hp.epochs,
            parameter_count: state.model.len(),
            model_version: state.model.version(),
            final_loss,
            final_accuracy,
            best_validation_accuracy,
            total_duration: started.elapsed(),
        };

        let (validation_loss_history, validation_accuracy_history) = if validate {
            (
                Some(history.validation_loss),
                Some(history.validation_accuracy),
            )
        } else {
            (None, None)
        };

        Ok(TrainingResult {
            gradients: state.grads,
            weights: state.model.into_weights(),
            biases: state.biases,
            loss_history: history.loss,
            accuracy_history: history.accuracy,
            validation_loss_history,
            validation_accuracy_history,
            epoch_metrics,
            metadata,
        })
    }

    async fn simulate_work(&self) {
        if self.config.batch_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.batch_delay).await;
        }
    }

    /// Averages the surrogate gradient over `samples` random inputs.
    fn batch_gradient<R: Rng>(
        &self,
        rng: &mut R,
        weights: &[f32],
        target: f32,
        samples: usize,
    ) -> Result<Vec<f32>> {
        let width = self.config.input_width.max(1);

        let sets = (0..samples.max(1))
            .map(|_| {
                let input: Vec<f32> = (0..width).map(|_| rng.random_range(-1.0f32..1.0)).collect();
                surrogate::compute_gradient(weights, &input, target).map(GradientSet::new)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(aggregate(&sets, None)?)
    }
}

/// The gate check run before every batch.
async fn checkpoint(controller: &TrainingController, epoch: usize, batch: usize) -> Result<()> {
    if controller.is_aborted() {
        return Err(TrainerErr::Cancelled { epoch, batch });
    }

    if controller.is_paused() {
        debug!(epoch = epoch, batch = batch; "training paused");
        controller.wait_if_paused().await;
    }

    if controller.is_aborted() {
        return Err(TrainerErr::Cancelled { epoch, batch });
    }

    Ok(())
}

/// Runs the bias optimizer with the weight gradient averaged over one chunk per bias.
fn step_biases(
    optimizer: &mut (dyn Optimizer + Send),
    biases: &[f32],
    grads: &[f32],
    learning_rate: f32,
) -> Result<Vec<f32>> {
    if biases.is_empty() || grads.is_empty() {
        return Ok(biases.to_vec());
    }

    let chunk = (grads.len() / biases.len()).max(1);
    let bias_grads: Vec<f32> = grads
        .chunks(chunk)
        .cycle()
        .take(biases.len())
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect();

    Ok(optimizer.update_weights(biases, &bias_grads, learning_rate)?)
}

fn epoch_summary(metrics: &EpochMetrics, epochs: usize) -> String {
    let mut line = format!(
        "Epoch {}/{}: loss {:.4}, accuracy {:.2}%",
        metrics.epoch,
        epochs,
        metrics.train_loss,
        metrics.train_accuracy * 100.
    );

    if let (Some(loss), Some(accuracy)) = (metrics.validation_loss, metrics.validation_accuracy) {
        line.push_str(&format!(
            ", val loss {loss:.4}, val accuracy {:.2}%",
            accuracy * 100.
        ));
    }

    line
}
