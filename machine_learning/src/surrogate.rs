//! Deliberately tiny stand-ins for a model's forward and backward passes.
//!
//! They produce numbers with the right shapes for the rest of the pipeline to update and
//! aggregate, nothing here learns anything meaningful.

use crate::{MlErr, Result, error::check_len};

pub fn sigmoid(z: f32) -> f32 {
    1. / (1. + (-z).exp())
}

/// Dot product of `weights` and `input` truncated to the shortest of both, through a sigmoid.
pub fn forward(weights: &[f32], input: &[f32]) -> f32 {
    let z = weights.iter().zip(input).map(|(w, x)| w * x).sum();
    sigmoid(z)
}

/// Computes the gradient of the squared error of `forward` with respect to every weight.
///
/// Weights past the input's length reuse the input cyclically, so the gradient always has
/// the same length as `weights`.
///
/// # Arguments
/// * `weights` - The model's weights.
/// * `input` - A single input sample.
/// * `target` - The expected output for `input`.
///
/// # Returns
/// The gradient, or an error if `input` is empty.
pub fn compute_gradient(weights: &[f32], input: &[f32], target: f32) -> Result<Vec<f32>> {
    if input.is_empty() {
        return Err(MlErr::EmptyInput { what: "input" });
    }

    let y_pred = forward(weights, input);
    let delta = (y_pred - target) * y_pred * (1. - y_pred);

    let grad = (0..weights.len())
        .map(|i| delta * input[i % input.len()])
        .collect();

    Ok(grad)
}

/// Mean squared error of `forward` over a set of samples.
///
/// # Arguments
/// * `weights` - The model's weights.
/// * `inputs` - The input samples.
/// * `targets` - One expected output per sample.
///
/// # Returns
/// The loss, or an error if there are no samples or `targets` doesn't match `inputs`.
pub fn evaluate(weights: &[f32], inputs: &[Vec<f32>], targets: &[f32]) -> Result<f32> {
    if inputs.is_empty() {
        return Err(MlErr::EmptyInput { what: "sample" });
    }

    check_len("targets", "inputs", targets.len(), inputs.len())?;

    let total: f32 = inputs
        .iter()
        .zip(targets)
        .map(|(x, y)| (forward(weights, x) - y).powi(2))
        .sum();

    Ok(total / inputs.len() as f32)
}
