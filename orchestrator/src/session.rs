use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use machine_learning::ModelType;
use serde::{Deserialize, Serialize};
use trainer::{EpochMetrics, Hyperparameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Preparing,
    Training,
    Paused,
    Uploading,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Whether the status occupies the single active slot of a registry.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Training | Self::Paused | Self::Uploading)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Training => "training",
            Self::Paused => "paused",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };

        f.write_str(s)
    }
}

/// One training session as the registry's consumers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSession {
    pub id: String,
    pub model_id: String,
    pub model_type: ModelType,
    pub status: SessionStatus,
    /// In `[0, 100]`.
    pub progress: f32,
    pub current_epoch: usize,
    pub total_epochs: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub hyperparameters: Hyperparameters,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub blob_reference: Option<String>,
    pub error: Option<String>,
    /// The id of the run on the backend, when delegated.
    pub backend_id: Option<String>,
    #[serde(default)]
    pub epoch_metrics: Vec<EpochMetrics>,
}

impl TrainingSession {
    pub(crate) fn new(
        id: String,
        model_id: String,
        model_type: ModelType,
        hyperparameters: Hyperparameters,
    ) -> Self {
        Self {
            id,
            model_id,
            model_type,
            status: SessionStatus::Idle,
            progress: 0.,
            current_epoch: 0,
            total_epochs: hyperparameters.epochs,
            loss: 0.,
            accuracy: 0.,
            hyperparameters,
            start_time: Utc::now(),
            end_time: None,
            blob_reference: None,
            error: None,
            backend_id: None,
            epoch_metrics: Vec::new(),
        }
    }

    /// Wall time between the start and the end of the session, zero while still running.
    pub fn duration(&self) -> Duration {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
            .unwrap_or_default()
    }

    pub(crate) fn apply(&mut self, update: SessionUpdate) {
        let SessionUpdate {
            status,
            progress,
            current_epoch,
            loss,
            accuracy,
            blob_reference,
            error,
            backend_id,
            epoch_metrics,
        } = update;

        if let Some(status) = status {
            self.status = status;
        }
        if let Some(progress) = progress {
            self.progress = progress.clamp(0., 100.);
        }
        if let Some(epoch) = current_epoch {
            self.current_epoch = epoch;
        }
        if let Some(loss) = loss {
            self.loss = loss;
        }
        if let Some(accuracy) = accuracy {
            self.accuracy = accuracy;
        }
        if blob_reference.is_some() {
            self.blob_reference = blob_reference;
        }
        if error.is_some() {
            self.error = error;
        }
        if backend_id.is_some() {
            self.backend_id = backend_id;
        }
        if let Some(metrics) = epoch_metrics {
            self.epoch_metrics.push(metrics);
        }
    }
}

/// A partial update of a session, `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub progress: Option<f32>,
    pub current_epoch: Option<usize>,
    pub loss: Option<f32>,
    pub accuracy: Option<f32>,
    pub blob_reference: Option<String>,
    pub error: Option<String>,
    pub backend_id: Option<String>,
    /// Appended to the session's epoch metrics.
    pub epoch_metrics: Option<EpochMetrics>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// The final numbers of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub loss: f32,
    pub accuracy: f32,
    pub blob_reference: Option<String>,
}

/// An append only record of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub model_type: ModelType,
    pub final_loss: f32,
    pub final_accuracy: f32,
    pub duration: Duration,
    pub blob_reference: Option<String>,
}

/// Aggregates over the whole registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub completed_count: usize,
    pub total_duration: Duration,
}

#[cfg(test)]
mod tests {
    use machine_learning::OptimizerKind;

    use super::*;

    fn session() -> TrainingSession {
        TrainingSession::new(
            "id".into(),
            "model".into(),
            ModelType::Rnn,
            Hyperparameters {
                epochs: 4,
                batch_size: 8,
                learning_rate: 0.01,
                optimizer: OptimizerKind::RmsProp,
            },
        )
    }

    #[test]
    fn new_session_is_idle() {
        let s = session();
        assert_eq!(s.status, SessionStatus::Idle);
        assert_eq!(s.progress, 0.);
        assert_eq!(s.total_epochs, 4);
        assert_eq!(s.duration(), Duration::ZERO);
    }

    #[test]
    fn partial_update_only_touches_given_fields() {
        let mut s = session();
        s.apply(SessionUpdate {
            progress: Some(140.),
            loss: Some(0.3),
            ..Default::default()
        });

        assert_eq!(s.progress, 100.);
        assert_eq!(s.loss, 0.3);
        assert_eq!(s.accuracy, 0.);
        assert_eq!(s.status, SessionStatus::Idle);
    }

    #[test]
    fn active_statuses() {
        use SessionStatus::*;

        let active: Vec<_> = [Idle, Preparing, Training, Paused, Uploading, Completed, Failed]
            .into_iter()
            .filter(|s| s.is_active())
            .collect();

        assert_eq!(active, vec![Training, Paused, Uploading]);
    }

    #[test]
    fn history_entry_uses_camel_case() {
        let entry = HistoryEntry {
            session_id: "a".into(),
            timestamp: Utc::now(),
            model_type: ModelType::Cnn,
            final_loss: 0.1,
            final_accuracy: 0.95,
            duration: Duration::from_secs(3),
            blob_reference: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["finalAccuracy"].as_f64().unwrap() as f32, 0.95);
        assert_eq!(json["modelType"], "CNN");
    }
}
