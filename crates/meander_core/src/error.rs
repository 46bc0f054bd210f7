use thiserror::Error;

/// Failure kinds surfaced by systems, drivers and trajectory lookups.
///
/// Vector-field faults of any shape (a missing parameter, an index out of
/// range inside user code) arrive as `anyhow::Error` and are collapsed into
/// the single `Computation` kind at the system boundary, so callers branch
/// on what went wrong without knowing how the field is implemented.
#[derive(Debug, Error)]
pub enum OdeError {
    #[error("state vector has length {got}, but the system dimension is {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector field evaluation failed: {0}")]
    Computation(anyhow::Error),

    #[error("parameter `{name}`: {reason}")]
    InvalidParameters { name: String, reason: &'static str },

    #[error("invalid {what}: {value}")]
    InvalidTuning { what: &'static str, value: f64 },

    #[error("adaptive stepping requires a stepper with an embedded error estimate")]
    NoErrorEstimate,

    #[error("step size underflow at t = {t}")]
    StepUnderflow { t: f64 },

    #[error("accepted step size {stepsize:e} fell below the minimum {min:e}")]
    StepTooSmall { stepsize: f64, min: f64 },

    #[error("no convergence within {limit} steps")]
    MaxIterationsExceeded { limit: usize },

    #[error("sample index {index} is out of range ({len} samples)")]
    InvalidRequest { index: usize, len: usize },
}
