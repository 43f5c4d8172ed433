use crate::plan::PlanStatus;

/// Errors raised by the risk, optimization and rebalancing computations.
///
/// All of them are local and synchronous: nothing here is transient, so callers
/// should never retry on them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskError {
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Length mismatch: series have {left} and {right} observations")]
    LengthMismatch { left: usize, right: usize },

    #[error("Constraints infeasible: {0}")]
    ConstraintInfeasible(String),

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid position {id}: {reason}")]
    InvalidPosition { id: String, reason: String },

    #[error("Zero variance in {0}")]
    ZeroVariance(&'static str),

    #[error("Invalid plan transition from {from} to {to}")]
    InvalidTransition { from: PlanStatus, to: PlanStatus },

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RiskError>;

pub(crate) fn require_observations(actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(RiskError::InsufficientData { required, actual });
    }
    Ok(())
}

pub(crate) fn require_same_length(left: &[f64], right: &[f64]) -> Result<()> {
    if left.len() != right.len() {
        return Err(RiskError::LengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    Ok(())
}
