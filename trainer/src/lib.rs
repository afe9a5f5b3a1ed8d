pub mod config;
pub mod controller;
pub mod curves;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod schedule;
pub mod state;

pub use config::{EngineConfig, Hyperparameters, TrainingOptions};
pub use controller::{GateState, TrainingController};
pub use engine::TrainerEngine;
pub use error::{Result, TrainerErr};
pub use events::{Emitter, LogLevel, LogLine, Observer, TrainingEvent};
pub use metrics::{EpochMetrics, ProgressUpdate, ResultMetadata, TrainingResult};
pub use schedule::LrSchedule;
