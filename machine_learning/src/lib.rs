pub mod aggregation;
pub mod error;
pub mod initialization;
pub mod model;
pub mod optimization;
pub mod surrogate;

pub use aggregation::{GradientSet, aggregate};
pub use error::{MlErr, Result};
pub use initialization::{InitialParams, initialize};
pub use model::{ModelMetadata, ModelProfile, ModelState, ModelType};
pub use optimization::{Adam, GradientDescent, Optimizer, OptimizerKind, RmsProp, update};
