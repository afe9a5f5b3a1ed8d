use super::Optimizer;
use crate::{Result, error::check_len};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// Simplified Adam.
///
/// The moment estimates are recomputed from zero on every call, one bias-free step of
/// `m = (1 - b1) g` and `v = (1 - b2) g^2`. No state survives between steps.
#[derive(Debug, Default, Clone, Copy)]
pub struct Adam;

impl Adam {
    /// Creates a new `Adam` optimizer.
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for Adam {
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
            .map(|(w, g)| {
                let m = (1. - BETA1) * g;
                let v = (1. - BETA2) * g * g;
                w - learning_rate * m / (v.sqrt() + EPSILON)
            })
            .collect();

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_steps_are_identical() {
        let mut optimizer = Adam::new();

        let a = optimizer.update_weights(&[1.], &[0.3], 0.01).unwrap();
        let b = optimizer.update_weights(&[1.], &[0.3], 0.01).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_gradient_leaves_weights() {
        let mut optimizer = Adam::new();
        let weights = optimizer.update_weights(&[0.7, -0.2], &[0., 0.], 0.5).unwrap();
        assert_eq!(weights, [0.7, -0.2]);
    }
}
