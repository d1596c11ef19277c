use crate::basis::BasisError;
use crate::linalg::LinalgError;
use thiserror::Error;

/// Every failure a fit can report. Nothing is retried inside the crate; the
/// caller decides whether to regularize, widen a radius, or restart elsewhere.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("A required linear solve has no stable solution: pivot {pivot:.3e} at index {index}.")]
    SingularMatrix { index: usize, pivot: f64 },

    #[error("The Hessian is not invertible at iteration {iteration}; retry from a perturbed start.")]
    NonInvertibleHessian { iteration: usize },

    #[error("The derivative vanished at x = {x} (iteration {iteration}); the Newton step is undefined.")]
    ZeroDerivative { iteration: usize, x: f64 },

    #[error(
        "No convergence within {iterations} iterations. Last coefficient change was {last_change:.6e}."
    )]
    NonConvergence { iterations: usize, last_change: f64 },

    #[error("No training point lies within the kernel radius of x = {query}.")]
    EmptyNeighborhood { query: f64 },

    #[error("Dimension mismatch for {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid hyperparameter {name} = {value}: {reason}")]
    InvalidHyperparameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Response value {value} at row {row} is not valid for this model: {reason}")]
    InvalidResponse {
        row: usize,
        value: f64,
        reason: &'static str,
    },

    #[error("Spline basis construction failed: {0}")]
    Basis(#[from] BasisError),

    #[error("LAPACK routine failed: {0}")]
    Eigen(#[from] ndarray_linalg::error::LinalgError),
}

impl From<LinalgError> for FitError {
    fn from(err: LinalgError) -> Self {
        match err {
            LinalgError::SingularMatrix { index, pivot } => FitError::SingularMatrix { index, pivot },
            LinalgError::DimensionMismatch {
                context,
                expected,
                found,
            } => FitError::DimensionMismatch {
                context,
                expected,
                found,
            },
            LinalgError::Eigen(inner) => FitError::Eigen(inner),
        }
    }
}

pub(crate) fn check_rows(
    context: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), FitError> {
    if expected != found {
        return Err(FitError::DimensionMismatch {
            context,
            expected,
            found,
        });
    }
    Ok(())
}

pub(crate) fn check_lambda(name: &'static str, value: f64) -> Result<(), FitError> {
    if !value.is_finite() || value < 0.0 {
        return Err(FitError::InvalidHyperparameter {
            name,
            value,
            reason: "must be finite and non-negative",
        });
    }
    Ok(())
}
