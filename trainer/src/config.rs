use std::{num::NonZeroUsize, time::Duration};

use machine_learning::{ModelType, OptimizerKind};
use serde::{Deserialize, Serialize};

use crate::{Result, TrainerErr};

/// The user facing knobs of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperparameters {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub optimizer: OptimizerKind,
}

/// Everything needed to start a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingOptions {
    pub model_type: ModelType,
    #[serde(flatten)]
    pub hyperparameters: Hyperparameters,
    #[serde(default = "default_validation_split")]
    pub validation_split: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_validation_split() -> f32 {
    TrainingOptions::DEFAULT_VALIDATION_SPLIT
}

impl TrainingOptions {
    pub const DEFAULT_VALIDATION_SPLIT: f32 = 0.2;

    /// Creates new options with the default validation split and no seed.
    pub fn new(model_type: ModelType, hyperparameters: Hyperparameters) -> Self {
        Self {
            model_type,
            hyperparameters,
            validation_split: Self::DEFAULT_VALIDATION_SPLIT,
            seed: None,
        }
    }

    pub fn with_validation_split(mut self, validation_split: f32) -> Self {
        self.validation_split = validation_split;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks the options before a run starts.
    ///
    /// # Returns
    /// An `InvalidOptions` error describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        let Hyperparameters {
            epochs,
            batch_size,
            learning_rate,
            ..
        } = self.hyperparameters;

        if epochs == 0 {
            return Err(invalid("epochs must be at least 1"));
        }

        if batch_size == 0 {
            return Err(invalid("batch size must be at least 1"));
        }

        if !learning_rate.is_finite() || learning_rate <= 0. {
            return Err(invalid(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }

        if !(0. ..1.).contains(&self.validation_split) {
            return Err(invalid(format!(
                "validation split must be in [0, 1), got {}",
                self.validation_split
            )));
        }

        Ok(())
    }
}

fn invalid(detail: impl Into<String>) -> TrainerErr {
    TrainerErr::InvalidOptions(detail.into())
}

/// Immutable execution bounds for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The size of the simulated dataset, split between training and validation.
    pub samples: usize,
    /// Simulated work per batch.
    pub batch_delay: Duration,
    pub decay_rate: f32,
    pub decay_steps: NonZeroUsize,
    /// Width of the synthetic input fed to the surrogate gradient.
    pub input_width: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samples: 1000,
            batch_delay: Duration::from_millis(20),
            decay_rate: 0.95,
            decay_steps: NonZeroUsize::MIN,
            input_width: 32,
        }
    }
}

impl EngineConfig {
    /// Returns the amount of batches per epoch for the given options.
    ///
    /// # Arguments
    /// * `batch_size` - The size of each batch, must be non zero.
    /// * `validation_split` - The fraction of samples held out for validation.
    pub fn total_batches(&self, batch_size: usize, validation_split: f32) -> usize {
        let train_samples = ((self.samples as f32) * (1. - validation_split)).floor() as usize;
        train_samples.max(1).div_ceil(batch_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TrainingOptions {
        TrainingOptions::new(
            ModelType::Mlp,
            Hyperparameters {
                epochs: 2,
                batch_size: 32,
                learning_rate: 0.01,
                optimizer: OptimizerKind::Sgd,
            },
        )
    }

    #[test]
    fn valid_options() {
        assert!(options().validate().is_ok());
        assert!(options().with_validation_split(0.).validate().is_ok());
    }

    #[test]
    fn rejects_each_invalid_field() {
        let mut zero_epochs = options();
        zero_epochs.hyperparameters.epochs = 0;

        let mut zero_batch = options();
        zero_batch.hyperparameters.batch_size = 0;

        let mut negative_lr = options();
        negative_lr.hyperparameters.learning_rate = -0.1;

        let mut nan_lr = options();
        nan_lr.hyperparameters.learning_rate = f32::NAN;

        let full_split = options().with_validation_split(1.);

        for options in [zero_epochs, zero_batch, negative_lr, nan_lr, full_split] {
            let err = options.validate().unwrap_err();
            assert!(err.is_validation(), "{options:?}");
        }
    }

    #[test]
    fn batches_per_epoch() {
        let config = EngineConfig::default();

        // 800 training samples.
        assert_eq!(config.total_batches(32, 0.2), 25);
        assert_eq!(config.total_batches(30, 0.2), 27);
        // 1000 training samples.
        assert_eq!(config.total_batches(1000, 0.), 1);
        assert_eq!(config.total_batches(5000, 0.), 1);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let json = r#"{
            "modelType": "CNN",
            "epochs": 3,
            "batchSize": 16,
            "learningRate": 0.001,
            "optimizer": "RMSProp"
        }"#;

        let options: TrainingOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.model_type, ModelType::Cnn);
        assert_eq!(options.hyperparameters.optimizer, OptimizerKind::RmsProp);
        assert_eq!(options.validation_split, TrainingOptions::DEFAULT_VALIDATION_SPLIT);
        assert_eq!(options.seed, None);
    }
}
