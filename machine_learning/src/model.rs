use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, optimization::Optimizer};

/// The closed set of simulated model architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    #[serde(rename = "MLP")]
    Mlp,
    #[serde(rename = "CNN")]
    Cnn,
    #[serde(rename = "RNN")]
    Rnn,
    Transformer,
}

/// The constants that shape a simulated run of a given `ModelType`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelProfile {
    pub param_count: usize,
    pub bias_count: usize,
    pub convergence_rate: f32,
    pub max_accuracy: f32,
}

impl ModelType {
    pub const ALL: [ModelType; 4] = [
        ModelType::Mlp,
        ModelType::Cnn,
        ModelType::Rnn,
        ModelType::Transformer,
    ];

    /// Returns the constant profile of this architecture.
    ///
    /// Transformers converge the fastest and reach the highest ceiling, RNNs the slowest.
    pub const fn profile(self) -> ModelProfile {
        match self {
            ModelType::Mlp => ModelProfile {
                param_count: 1024,
                bias_count: 32,
                convergence_rate: 3.0,
                max_accuracy: 0.92,
            },
            ModelType::Cnn => ModelProfile {
                param_count: 4096,
                bias_count: 64,
                convergence_rate: 3.5,
                max_accuracy: 0.95,
            },
            ModelType::Rnn => ModelProfile {
                param_count: 2048,
                bias_count: 64,
                convergence_rate: 2.5,
                max_accuracy: 0.88,
            },
            ModelType::Transformer => ModelProfile {
                param_count: 8192,
                bias_count: 128,
                convergence_rate: 4.0,
                max_accuracy: 0.97,
            },
        }
    }

    pub const fn param_count(self) -> usize {
        self.profile().param_count
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelType::Mlp => "MLP",
            ModelType::Cnn => "CNN",
            ModelType::Rnn => "RNN",
            ModelType::Transformer => "Transformer",
        };

        f.write_str(s)
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mlp" => Ok(ModelType::Mlp),
            "cnn" => Ok(ModelType::Cnn),
            "rnn" => Ok(ModelType::Rnn),
            "transformer" => Ok(ModelType::Transformer),
            other => Err(format!("unknown model type: {other}")),
        }
    }
}

/// Snapshot of the training metrics at the time a `ModelState` was produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub accuracy: f32,
    pub loss: f32,
    pub epoch: usize,
    pub timestamp: DateTime<Utc>,
}

/// An immutable version of a model's parameters.
///
/// Updating a state never mutates it, `apply` returns the next version instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    weights: Vec<f32>,
    shape: Vec<usize>,
    version: u64,
    metadata: Option<ModelMetadata>,
}

impl ModelState {
    /// Creates the first version of a model state.
    ///
    /// # Arguments
    /// * `weights` - The flat parameters of the model.
    /// * `shape` - The logical shape of `weights`.
    ///
    /// # Returns
    /// A new `ModelState` with version `0`.
    pub fn new(weights: Vec<f32>, shape: Vec<usize>) -> Self {
        Self {
            weights,
            shape,
            version: 0,
            metadata: None,
        }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_ref()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Produces the next version of this state by running one optimizer step.
    ///
    /// # Arguments
    /// * `optimizer` - The update rule to apply.
    /// * `grad` - The gradient for this step.
    /// * `learning_rate` - The learning rate for this step.
    ///
    /// # Returns
    /// The next `ModelState` or a `SizeMismatch` error if `grad` doesn't match the weights.
    pub fn apply<O>(&self, optimizer: &mut O, grad: &[f32], learning_rate: f32) -> Result<Self>
    where
        O: Optimizer + ?Sized,
    {
        let weights = optimizer.update_weights(&self.weights, grad, learning_rate)?;

        Ok(Self {
            weights,
            shape: self.shape.clone(),
            version: self.version + 1,
            metadata: self.metadata,
        })
    }

    /// Attaches metadata to this state.
    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Consumes the state returning its weights.
    pub fn into_weights(self) -> Vec<f32> {
        self.weights
    }
}
