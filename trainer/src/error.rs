use std::{error::Error, fmt};

use machine_learning::MlErr;

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainerErr>;

/// Trainer runtime failures.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainerErr {
    /// The training options were rejected before the loop started.
    InvalidOptions(String),
    /// The gradient pipeline rejected its input during a step.
    Ml(MlErr),
    /// The run was aborted, detected at the checkpoint before `batch` of `epoch`.
    Cancelled { epoch: usize, batch: usize },
}

impl TrainerErr {
    /// Whether this error belongs to the validation family, which fails a session.
    pub fn is_validation(&self) -> bool {
        matches!(self, TrainerErr::InvalidOptions(_) | TrainerErr::Ml(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TrainerErr::Cancelled { .. })
    }
}

impl fmt::Display for TrainerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerErr::InvalidOptions(detail) => write!(f, "invalid training options: {detail}"),
            TrainerErr::Ml(e) => write!(f, "gradient pipeline error: {e}"),
            TrainerErr::Cancelled { epoch, batch } => {
                write!(f, "training cancelled at epoch {epoch}, batch {batch}")
            }
        }
    }
}

impl Error for TrainerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainerErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for TrainerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}
