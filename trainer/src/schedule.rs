use std::num::NonZeroUsize;

/// Step decay learning rate schedule.
///
/// `rate(epoch) = initial * decay_rate ^ floor(epoch / decay_steps)`, with `epoch` counted
/// from zero so the first epoch trains at the initial rate.
#[derive(Debug, Clone, Copy)]
pub struct LrSchedule {
    initial: f32,
    decay_rate: f32,
    decay_steps: NonZeroUsize,
}

impl LrSchedule {
    pub fn new(initial: f32, decay_rate: f32, decay_steps: NonZeroUsize) -> Self {
        Self {
            initial,
            decay_rate,
            decay_steps,
        }
    }

    /// Returns the learning rate for a zero based epoch index.
    #[inline]
    pub fn rate(&self, epoch: usize) -> f32 {
        let decays = (epoch / self.decay_steps.get()) as i32;
        self.initial * self.decay_rate.powi(decays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_every_epoch_by_default() {
        let s = LrSchedule::new(0.1, 0.95, NonZeroUsize::MIN);

        assert_eq!(s.rate(0), 0.1);
        assert!((s.rate(1) - 0.095).abs() < 1e-7);
        assert!((s.rate(2) - 0.09025).abs() < 1e-7);
    }

    #[test]
    fn decays_in_steps() {
        let s = LrSchedule::new(1., 0.5, NonZeroUsize::new(3).unwrap());

        assert_eq!(s.rate(0), 1.);
        assert_eq!(s.rate(2), 1.);
        assert_eq!(s.rate(3), 0.5);
        assert_eq!(s.rate(5), 0.5);
        assert_eq!(s.rate(6), 0.25);
    }
}
