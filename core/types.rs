use crate::error::{FitError, check_rows};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.0
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    /// Number of coefficients that are exactly zero.
    pub fn zero_count(&self) -> usize {
        self.0.iter().filter(|&&b| b == 0.0).count()
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<Coefficients> for Array1<f64> {
    fn from(values: Coefficients) -> Self {
        values.0
    }
}

/// `eta = X beta`, kept distinct from fitted means so the log link is explicit.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct LinearPredictor(pub Array1<f64>);

impl LinearPredictor {
    pub fn from_design(x: ArrayView2<f64>, beta: ArrayView1<f64>) -> Self {
        Self(x.dot(&beta))
    }

    /// Inverse log link, clamped so `exp` cannot overflow.
    pub fn exp_mean(&self) -> Array1<f64> {
        self.0.mapv(|e| e.clamp(-700.0, 700.0).exp())
    }
}

impl Deref for LinearPredictor {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Outcome of an iterative fit. Closed-form fits report a single iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub iterations: usize,
    pub converged: bool,
    /// Norm of the gradient (or score) at the last evaluated iterate.
    pub gradient_norm: f64,
    /// Norm of the final parameter change.
    pub step_size: f64,
}

impl FitDiagnostics {
    pub fn closed_form(gradient_norm: f64) -> Self {
        Self {
            iterations: 1,
            converged: true,
            gradient_norm,
            step_size: 0.0,
        }
    }
}

/// Eigenvalue-ratio conditioning of the matrix a fit had to solve against.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conditioning {
    pub condition_number: f64,
    pub smallest_eigenvalue: f64,
    pub ill_conditioned: bool,
}

impl Conditioning {
    pub fn new(condition_number: f64, smallest_eigenvalue: f64, threshold: f64) -> Self {
        Self {
            condition_number,
            smallest_eigenvalue,
            ill_conditioned: !(condition_number <= threshold),
        }
    }
}

/// Immutable result of a fit. Re-fitting produces a fresh value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitResult {
    pub coefficients: Coefficients,
    pub covariance: Option<Array2<f64>>,
    pub diagnostics: FitDiagnostics,
    pub conditioning: Option<Conditioning>,
    pub deviance: Option<f64>,
    /// Regularization strength used for the fit; zero for unpenalized fits.
    pub penalty: f64,
}

impl FitResult {
    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.as_view()
    }

    /// Linear predictor `X beta` for a design matrix with matching width.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, FitError> {
        check_rows("prediction design columns", self.coefficients.len(), x.ncols())?;
        Ok(x.dot(&self.coefficients.0))
    }

    /// Mean squared error of the linear predictor against `y`.
    pub fn mean_squared_error(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<f64, FitError> {
        check_rows("response length", x.nrows(), y.len())?;
        if y.is_empty() {
            return Ok(0.0);
        }
        let residual = &y - &self.predict(x)?;
        Ok(residual.dot(&residual) / y.len() as f64)
    }
}
