use std::time::Duration;

use chrono::{DateTime, Utc};
use machine_learning::ModelType;
use serde::{Deserialize, Serialize};

/// Emitted once per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub epoch: usize,
    pub batch: usize,
    pub total_batches: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub learning_rate: f32,
    /// Completion of the whole run, in `[0, 100]`.
    pub progress: f32,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once per epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub validation_loss: Option<f32>,
    pub validation_accuracy: Option<f32>,
    pub learning_rate: f32,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub model_type: ModelType,
    pub total_epochs: usize,
    pub parameter_count: usize,
    pub model_version: u64,
    pub final_loss: f32,
    pub final_accuracy: f32,
    pub best_validation_accuracy: Option<f32>,
    pub total_duration: Duration,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingResult {
    /// The gradient of the last step.
    pub gradients: Vec<f32>,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
    /// One entry per batch.
    pub loss_history: Vec<f32>,
    /// One entry per batch.
    pub accuracy_history: Vec<f32>,
    /// One entry per epoch, only when validation is enabled.
    pub validation_loss_history: Option<Vec<f32>>,
    /// One entry per epoch, only when validation is enabled.
    pub validation_accuracy_history: Option<Vec<f32>>,
    pub epoch_metrics: Vec<EpochMetrics>,
    pub metadata: ResultMetadata,
}
