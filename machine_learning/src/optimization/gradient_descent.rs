use super::Optimizer;
use crate::{Result, error::check_len};

/// Plain stochastic gradient descent, `w' = w - lr * g`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradientDescent;

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for GradientDescent {
    fn update_weights(
        &mut self,
        weights: &[f32],
        grad: &[f32],
        learning_rate: f32,
    ) -> Result<Vec<f32>> {
        check_len("gradient", "weights", grad.len(), weights.len())?;

        let updated = weights
            .iter()
            .zip(grad)
            .map(|(w, g)| w - learning_rate * g)
            .collect();

        Ok(updated)
    }
}
