use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
///
/// Every variant describes invalid input, the pipeline has no runtime failures of its own.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyInput {
        what: &'static str,
    },
    InvalidAggregationWeights(String),
    InvalidRange {
        low: f32,
        high: f32,
    },
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => {
                format!(
                    "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
                )
            }
            MlErr::EmptyInput { what } => format!("Expected at least one {what}, got none"),
            MlErr::InvalidAggregationWeights(detail) => {
                format!("Invalid aggregation weights: {detail}")
            }
            MlErr::InvalidRange { low, high } => {
                format!("Invalid sampling range, low ({low}) must be lower than high ({high})")
            }
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {}

/// Checks that two buffers share the same length.
///
/// # Arguments
/// * `a`, `b` - Names of the buffers, used in the error message.
/// * `got` - The length of `a`.
/// * `expected` - The length of `b`.
///
/// # Returns
/// A `SizeMismatch` error if the lengths differ.
pub(crate) fn check_len(a: &'static str, b: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            a,
            b,
            got,
            expected,
        });
    }

    Ok(())
}
