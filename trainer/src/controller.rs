use std::sync::Arc;

use log::debug;
use tokio::sync::watch;

/// The position of the gate a training loop passes through at every checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Running,
    Paused,
    Aborted,
}

/// Cooperative pause/resume/abort gate shared between a training loop and its owner.
///
/// The controller never interrupts work in flight, the loop observes it through
/// `wait_if_paused` and `is_aborted` at each checkpoint. Clones share the same gate.
#[derive(Debug, Clone)]
pub struct TrainingController {
    gate: Arc<watch::Sender<GateState>>,
}

impl Default for TrainingController {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingController {
    /// Creates a new running `TrainingController`.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(GateState::Running);
        Self {
            gate: Arc::new(gate),
        }
    }

    pub fn state(&self) -> GateState {
        *self.gate.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == GateState::Paused
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == GateState::Aborted
    }

    /// Closes the gate. No-op unless running.
    ///
    /// # Returns
    /// Whether the gate was closed by this call.
    pub fn pause(&self) -> bool {
        let changed = self.gate.send_if_modified(|state| {
            if *state != GateState::Running {
                return false;
            }

            *state = GateState::Paused;
            true
        });

        if changed {
            debug!("training gate paused");
        }

        changed
    }

    /// Opens the gate. No-op unless paused.
    ///
    /// # Returns
    /// Whether the gate was opened by this call.
    pub fn resume(&self) -> bool {
        let changed = self.gate.send_if_modified(|state| {
            if *state != GateState::Paused {
                return false;
            }

            *state = GateState::Running;
            true
        });

        if changed {
            debug!("training gate resumed");
        }

        changed
    }

    /// Marks the run as aborted, releasing anyone waiting on a closed gate.
    pub fn abort(&self) {
        let changed = self.gate.send_if_modified(|state| {
            if *state == GateState::Aborted {
                return false;
            }

            *state = GateState::Aborted;
            true
        });

        if changed {
            debug!("training gate aborted");
        }
    }

    /// Clears both the pause and the abort flags before a new run.
    pub fn reset(&self) {
        self.gate.send_replace(GateState::Running);
    }

    /// Waits until the gate is no longer paused, that is until `resume` or `abort`.
    ///
    /// Returns immediately when the gate is open.
    pub async fn wait_if_paused(&self) {
        let mut rx = self.gate.subscribe();

        // The sender lives as long as `self`, the only error case can't happen here.
        let _ = rx.wait_for(|state| *state != GateState::Paused).await;
    }
}
