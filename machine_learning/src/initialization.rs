use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{MlErr, Result};

/// Half width of the uniform range biases are sampled from.
pub const BIAS_RANGE: f32 = 0.01;

/// A `ParamGen` generates values for the initial state of the model's parameters.
pub trait ParamGen {
    /// Should sample at most `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// An option whether the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}

/// A parameter generator that follows a certain probabilistic distribution.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: R,
    distribution: D,
    remaining: usize,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    /// Creates a new `RandParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `distribution` - The distribution to sample the random numbers from.
    /// * `limit` - The maximum amount of numbers to generate.
    pub fn new(rng: R, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Creates a new `RandParamGen` parameter generator with a uniform distribution.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `limit` - The maximum amount of numbers to generate.
    /// * `low` - The inclusive lower limit.
    /// * `high` - The inclusive upper limit.
    ///
    /// # Returns
    /// An error if the range is invalid (low >= high).
    pub fn uniform(rng: R, limit: usize, low: f32, high: f32) -> Result<Self> {
        if !(low < high) {
            return Err(MlErr::InvalidRange { low, high });
        }

        let distribution =
            Uniform::new_inclusive(low, high).map_err(|_| MlErr::InvalidRange { low, high })?;

        Ok(Self::new(rng, distribution, limit))
    }

    /// Creates a new `RandParamGen` using the scaled uniform initialization,
    /// every sample falls in `[-sqrt(2 / fan_in), sqrt(2 / fan_in)]`.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `limit` - The maximum amount of numbers to generate.
    /// * `fan_in` - The number of input units in the weight tensor.
    ///
    /// # Returns
    /// An error if `fan_in` is zero.
    pub fn xavier(rng: R, limit: usize, fan_in: usize) -> Result<Self> {
        if fan_in == 0 {
            return Err(MlErr::EmptyInput { what: "weight" });
        }

        let scale = (2. / fan_in as f32).sqrt();
        Self::uniform(rng, limit, -scale, scale)
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn sample(&mut self, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;

        let sample = (0..n)
            .map(|_| self.distribution.sample(&mut self.rng))
            .collect();

        Some(sample)
    }
}

/// The freshly initialized parameters of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialParams {
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

/// Initializes the parameters of a model.
///
/// # Arguments
/// * `rng` - A random number generator.
/// * `size` - The amount of weights.
/// * `biases` - The amount of biases.
///
/// # Returns
/// The sampled weights and biases, or an error if `size` is zero.
pub fn initialize<R: Rng>(rng: &mut R, size: usize, biases: usize) -> Result<InitialParams> {
    let weights = RandParamGen::xavier(&mut *rng, size, size)?
        .sample(size)
        .unwrap_or_default();

    let biases = RandParamGen::uniform(&mut *rng, biases, -BIAS_RANGE, BIAS_RANGE)?
        .sample(biases)
        .unwrap_or_default();

    Ok(InitialParams { weights, biases })
}
