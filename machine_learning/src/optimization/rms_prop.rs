use super::Optimizer;
use crate::{Result, error::check_len};

const DECAY: f32 = 0.9;
const EPSILON: f32 = 1e-8;

/// RMSProp, keeps a running average of squared gradients between steps.
#[derive(Debug, Clone)]
pub struct RmsProp {
    cache: Box<[f32]>,
}

impl RmsProp {
    /// Creates a new `RmsProp` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    ///
    /// # Returns
    /// A new `RmsProp` instance with an empty cache.
    pub fn new(len: usize) -> Self {
        Self {
            cache: vec![0.; len].into_boxed_slice(),
        }
    }

    pub fn cache(&self) -> &[f32] {
        &self.cache
    }
}

impl Optimizer for RmsProp {
    fn update_weights(
        &mut self,
        weights: &[f32],
        grad: &[f32],
        learning_rate: f32,
    ) -> Result<Vec<f32>> {
        check_len("gradient", "weights", grad.len(), weights.len())?;
        check_len("weights", "rmsprop cache", weights.len(), self.cache.len())?;

        let updated = weights
            .iter()
            .zip(grad)
            .zip(self.cache.iter_mut())
            .map(|((w, g), c)| {
                *c = DECAY * *c + (1. - DECAY) * g * g;
                w - learning_rate * g / (c.sqrt() + EPSILON)
            })
            .collect();

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_accumulates_between_steps() {
        let mut optimizer = RmsProp::new(1);

        let first = optimizer.update_weights(&[0.], &[1.], 0.1).unwrap();
        assert!((optimizer.cache()[0] - 0.1).abs() < 1e-7);

        let second = optimizer.update_weights(&first, &[1.], 0.1).unwrap();
        assert!((optimizer.cache()[0] - 0.19).abs() < 1e-7);

        // A larger cache means a smaller step.
        let first_step = -first[0];
        let second_step = first[0] - second[0];
        assert!(second_step < first_step);
    }

    #[test]
    fn rejects_cache_of_another_size() {
        let mut optimizer = RmsProp::new(3);
        assert!(optimizer.update_weights(&[0.], &[1.], 0.1).is_err());
    }
}
