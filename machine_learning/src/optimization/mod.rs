mod adam;
mod gradient_descent;
mod optimizer;
mod rms_prop;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use optimizer::Optimizer;
pub use rms_prop::RmsProp;

use crate::Result;

/// The closed set of update rules a session can pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "SGD")]
    Sgd,
    Adam,
    #[serde(rename = "RMSProp")]
    RmsProp,
}

impl OptimizerKind {
    /// Builds a fresh optimizer of this kind.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters the optimizer will update.
    ///
    /// # Returns
    /// A boxed optimizer with zeroed state.
    pub fn build(self, len: usize) -> Box<dyn Optimizer + Send> {
        match self {
            OptimizerKind::Sgd => Box::new(GradientDescent::new()),
            OptimizerKind::Adam => Box::new(Adam::new()),
            OptimizerKind::RmsProp => Box::new(RmsProp::new(len)),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizerKind::Sgd => "SGD",
            OptimizerKind::Adam => "Adam",
            OptimizerKind::RmsProp => "RMSProp",
        };

        f.write_str(s)
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            other => Err(format!("unknown optimizer: {other}")),
        }
    }
}

/// Stateless single update step.
///
/// Stateful rules start from zeroed state, so an `RMSProp` step here uses an empty cache.
///
/// # Arguments
/// * `weights` - The current weights.
/// * `grad` - The gradient for this step.
/// * `kind` - The update rule.
/// * `learning_rate` - The step size.
///
/// # Returns
/// The updated weights or a `SizeMismatch` error.
pub fn update(
    weights: &[f32],
    grad: &[f32],
    kind: OptimizerKind,
    learning_rate: f32,
) -> Result<Vec<f32>> {
    kind.build(weights.len())
        .update_weights(weights, grad, learning_rate)
}
