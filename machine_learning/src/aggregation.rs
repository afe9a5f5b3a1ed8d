use rayon::prelude::*;

use crate::{MlErr, Result, error::check_len};

/// The amount of output elements each parallel task sums.
const CHUNK_SIZE: usize = 1024;

/// A gradient contributed by a single participant, optionally weighted.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientSet {
    pub values: Vec<f32>,
    pub weight: Option<f32>,
}

impl GradientSet {
    /// Creates a new unweighted `GradientSet`.
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            weight: None,
        }
    }

    /// Creates a new `GradientSet` with a relative weight.
    pub fn weighted(values: Vec<f32>, weight: f32) -> Self {
        Self {
            values,
            weight: Some(weight),
        }
    }
}

impl From<Vec<f32>> for GradientSet {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Combines several gradients into a single weighted elementwise sum.
///
/// Weights are taken from `weights` if given, otherwise from each set (missing ones count
/// as `1`). They are normalized to sum `1`, so without any weights this is the plain mean.
///
/// # Arguments
/// * `sets` - The gradients to combine, all of the same length.
/// * `weights` - Optional explicit weights, one per set.
///
/// # Returns
/// The aggregated gradient, or an error if there are no sets, the lengths differ or the
/// weights are invalid.
pub fn aggregate(sets: &[GradientSet], weights: Option<&[f32]>) -> Result<Vec<f32>> {
    let Some(first) = sets.first() else {
        return Err(MlErr::EmptyInput {
            what: "gradient set",
        });
    };

    let len = first.values.len();
    for set in sets {
        check_len("gradient set", "first gradient set", set.values.len(), len)?;
    }

    let weights = normalized_weights(sets, weights)?;
    let mut out = vec![0.; len];

    out.par_chunks_mut(CHUNK_SIZE)
        .enumerate()
        .for_each(|(i, chunk)| {
            let start = i * CHUNK_SIZE;
            let end = start + chunk.len();

            for (set, w) in sets.iter().zip(&weights) {
                chunk
                    .iter_mut()
                    .zip(&set.values[start..end])
                    .for_each(|(acc, g)| *acc += w * g);
            }
        });

    Ok(out)
}

fn normalized_weights(sets: &[GradientSet], explicit: Option<&[f32]>) -> Result<Vec<f32>> {
    let raw: Vec<f32> = match explicit {
        Some(weights) => {
            check_len("weights", "gradient sets", weights.len(), sets.len())?;
            weights.to_vec()
        }
        None => sets.iter().map(|set| set.weight.unwrap_or(1.)).collect(),
    };

    if let Some(w) = raw.iter().find(|w| !w.is_finite() || **w < 0.) {
        return Err(MlErr::InvalidAggregationWeights(format!(
            "every weight must be finite and non negative, got {w}"
        )));
    }

    let total: f32 = raw.iter().sum();
    if total <= 0. {
        return Err(MlErr::InvalidAggregationWeights(
            "the weights must not sum zero".into(),
        ));
    }

    Ok(raw.into_iter().map(|w| w / total).collect())
}
