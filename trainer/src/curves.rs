//! Synthetic, internally consistent loss and accuracy curves.

use machine_learning::{ModelProfile, OptimizerKind};
use rand::Rng;

const LOSS_FLOOR: f32 = 0.001;
const LOSS_SCALE: f32 = 2.0;
const LOSS_DECAY: f32 = 3.5;
const ACCURACY_BASE: f32 = 0.3;
const ACCURACY_FLOOR: f32 = 0.25;
const ACCURACY_NOISE: f32 = 0.02;

pub const VALIDATION_LOSS_FACTOR: f32 = 1.1;
pub const VALIDATION_ACCURACY_FACTOR: f32 = 0.95;

/// How much each optimizer narrows the loss curve.
pub fn optimizer_factor(optimizer: OptimizerKind) -> f32 {
    match optimizer {
        OptimizerKind::Adam => 0.9,
        OptimizerKind::Sgd => 1.1,
        OptimizerKind::RmsProp => 1.0,
    }
}

/// The noiseless loss at a fractional `progress` of the run.
pub fn base_loss(progress: f32, optimizer: OptimizerKind) -> f32 {
    LOSS_SCALE * (-LOSS_DECAY * progress).exp() * optimizer_factor(optimizer)
}

/// The noiseless accuracy at a fractional `progress` of the run.
pub fn base_accuracy(progress: f32, profile: &ModelProfile) -> f32 {
    let saturation = 1. - (-profile.convergence_rate * progress).exp();
    ACCURACY_BASE + (profile.max_accuracy - ACCURACY_BASE) * saturation
}

/// Generates noisy samples of the curves for one model and optimizer.
#[derive(Debug, Clone, Copy)]
pub struct Curves {
    profile: ModelProfile,
    optimizer: OptimizerKind,
}

impl Curves {
    pub fn new(profile: ModelProfile, optimizer: OptimizerKind) -> Self {
        Self { profile, optimizer }
    }

    /// Samples the loss at `progress`.
    ///
    /// The noise is uniform in `[-b, b]` with `b = 0.05 * learning_rate * 100`.
    pub fn loss<R: Rng>(&self, rng: &mut R, progress: f32, learning_rate: f32) -> f32 {
        let bound = 0.05 * learning_rate * 100.;
        let noise = symmetric(rng, bound);
        (base_loss(progress, self.optimizer) + noise).max(LOSS_FLOOR)
    }

    /// Samples the accuracy at `progress`, clamped to `[0.25, max_accuracy]`.
    pub fn accuracy<R: Rng>(&self, rng: &mut R, progress: f32) -> f32 {
        let noise = symmetric(rng, ACCURACY_NOISE);
        (base_accuracy(progress, &self.profile) + noise)
            .clamp(ACCURACY_FLOOR, self.profile.max_accuracy)
    }

    pub fn validation_loss<R: Rng>(&self, rng: &mut R, progress: f32, learning_rate: f32) -> f32 {
        self.loss(rng, progress, learning_rate) * VALIDATION_LOSS_FACTOR
    }

    pub fn validation_accuracy<R: Rng>(&self, rng: &mut R, progress: f32) -> f32 {
        self.accuracy(rng, progress) * VALIDATION_ACCURACY_FACTOR
    }
}

fn symmetric<R: Rng>(rng: &mut R, bound: f32) -> f32 {
    if !(bound > 0.) || !bound.is_finite() {
        return 0.;
    }

    rng.random_range(-bound..=bound)
}
