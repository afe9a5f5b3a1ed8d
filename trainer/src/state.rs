use machine_learning::ModelState;

/// The mutable state of one run, reused across steps.
#[derive(Debug)]
pub struct EngineState {
    pub step: u64,

    /// Current version of the weights.
    pub model: ModelState,

    pub biases: Vec<f32>,

    /// Gradient of the last step.
    pub grads: Vec<f32>,
}

impl EngineState {
    pub fn new(model: ModelState, biases: Vec<f32>) -> Self {
        let grads = vec![0.0; model.len()];

        Self {
            step: 0,
            model,
            biases,
            grads,
        }
    }

    #[inline]
    pub fn inc_step(&mut self) {
        self.step += 1;
    }
}

/// Running sums for a single epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpochAccumulator {
    loss: f32,
    accuracy: f32,
    batches: usize,
}

impl EpochAccumulator {
    #[inline]
    pub fn push(&mut self, loss: f32, accuracy: f32) {
        self.loss += loss;
        self.accuracy += accuracy;
        self.batches += 1;
    }

    /// Returns the mean loss and accuracy, zeros when nothing was pushed.
    pub fn mean(&self) -> (f32, f32) {
        if self.batches == 0 {
            return (0., 0.);
        }

        let n = self.batches as f32;
        (self.loss / n, self.accuracy / n)
    }
}

/// Per batch and per epoch series collected during a run.
#[derive(Debug, Default, Clone)]
pub struct History {
    pub loss: Vec<f32>,
    pub accuracy: Vec<f32>,
    pub validation_loss: Vec<f32>,
    pub validation_accuracy: Vec<f32>,
}
