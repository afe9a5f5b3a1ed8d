use crate::Result;

/// Defines the strategy for updating model weights based on calculated gradients.
pub trait Optimizer {
    /// Computes the next state of `weights` given a gradient, leaving `weights` untouched.
    ///
    /// # Arguments
    /// * `weights` - The current weights.
    /// * `grad` - A reference to the model's gradient.
    /// * `learning_rate` - The step size for this update, it may change between calls.
    ///
    /// # Returns
    /// The new weights, or an error if there's a mismatch in the sizes of `grad` and `weights`.
    fn update_weights(
        &mut self,
        weights: &[f32],
        grad: &[f32],
        learning_rate: f32,
    ) -> Result<Vec<f32>>;
}
