//! Poisson regression with the canonical log link, fitted by iteratively
//! reweighted least squares.
//!
//! For the canonical link the IRLS update is exactly a Newton step on the
//! log-likelihood, so the fitter plugs a [`NewtonStep`] into the shared
//! iteration driver instead of running its own loop.
//!
//! Model: `eta = X beta`, `mu = exp(eta)`, `y | x ~ Poisson(mu)`.
//! Working weights are `W = mu` and the working response is
//! `z = eta + (y - mu) / mu`; each step solves `(X'WX) beta = X'Wz`.

use crate::config::{GlmConfig, GlmStart};
use crate::error::{FitError, check_rows};
use crate::linalg::{CholeskyFactor, conditioning, weighted_gram, xt_vec};
use crate::newton::{NewtonStep, StepProposal, iterate};
use crate::ridge::solve_ridge;
use crate::types::{Coefficients, FitDiagnostics, FitResult, LinearPredictor};
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};

/// A converged Poisson fit. `fit.covariance` holds `(X'WX)^{-1}` at the
/// fitted means.
#[derive(Clone, Debug)]
pub struct PoissonFit {
    pub fit: FitResult,
    pub fitted_means: Array1<f64>,
}

impl PoissonFit {
    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.fit.coefficients()
    }

    /// Asymptotic standard errors, the square roots of the covariance diagonal.
    pub fn standard_errors(&self) -> Array1<f64> {
        match &self.fit.covariance {
            Some(cov) => cov.diag().mapv(|v| v.max(0.0).sqrt()),
            None => Array1::from_elem(self.fit.coefficients.len(), f64::NAN),
        }
    }

    /// Expected counts `exp(X beta)` for new rows.
    pub fn predict_mean(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, FitError> {
        check_rows("prediction design columns", self.fit.coefficients.len(), x.ncols())?;
        Ok(LinearPredictor::from_design(x, self.fit.coefficients.as_view()).exp_mean())
    }
}

/// Poisson deviance `2 sum [y ln(y / mu) - (y - mu)]`, with `y ln y = 0` at zero.
pub fn poisson_deviance(y: ArrayView1<f64>, mu: ArrayView1<f64>) -> f64 {
    let total = Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let log_term = if yi > 0.0 { yi * (yi / mui).ln() } else { 0.0 };
        acc + log_term - (yi - mui)
    });
    2.0 * total
}

struct WorkingState {
    mu: Array1<f64>,
    score: Array1<f64>,
}

impl WorkingState {
    fn at(x: ArrayView2<f64>, y: ArrayView1<f64>, beta: ArrayView1<f64>) -> Result<(Self, Array1<f64>), FitError> {
        let eta = LinearPredictor::from_design(x, beta);
        let mu = eta.exp_mean();
        let eta_clamped = eta.mapv(|e| e.clamp(-700.0, 700.0));
        // W z = mu * eta + (y - mu), written without dividing by mu.
        let weighted_response = &mu * &eta_clamped + (&y - &mu);
        let score = xt_vec(x, (&y - &mu).view())?;
        Ok((Self { mu, score }, weighted_response))
    }
}

struct PoissonIrlsStep<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    pivot_tolerance: f64,
}

impl NewtonStep for PoissonIrlsStep<'_> {
    fn step(&mut self, theta: ArrayView1<f64>, iteration: usize) -> Result<StepProposal, FitError> {
        let (state, weighted_response) = WorkingState::at(self.x, self.y, theta)?;
        let xtwx = weighted_gram(self.x, state.mu.view())?;
        let rhs = xt_vec(self.x, weighted_response.view())?;
        let factor = CholeskyFactor::factor(xtwx.view(), self.pivot_tolerance).map_err(|err| {
            log::warn!("X'WX became singular at IRLS iteration {iteration}: {err}");
            FitError::from(err)
        })?;
        let next = factor.solve(rhs.view())?;
        Ok(StepProposal {
            next,
            gradient_norm: state.score.dot(&state.score).sqrt(),
        })
    }
}

fn validate_counts(y: ArrayView1<f64>) -> Result<(), FitError> {
    for (row, &value) in y.iter().enumerate() {
        if !value.is_finite() || value < 0.0 {
            return Err(FitError::InvalidResponse {
                row,
                value,
                reason: "Poisson responses must be finite and non-negative",
            });
        }
    }
    Ok(())
}

fn starting_coefficients(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    config: &GlmConfig,
) -> Result<Array1<f64>, FitError> {
    match config.start {
        GlmStart::Zero => Ok(Array1::zeros(x.ncols())),
        GlmStart::RidgePilot { lambda } => {
            let log_counts = y.mapv(|v| (v + 0.5).ln());
            solve_ridge(x, log_counts.view(), lambda, &config.solver)
        }
    }
}

/// Maximum-likelihood Poisson regression with log link.
///
/// Fails with [`FitError::NonConvergence`] when `config.max_iterations` steps
/// pass without `||delta beta|| < config.tolerance`, and with
/// [`FitError::SingularMatrix`] when `X'WX` cannot be factored, which is what
/// happens under complete separation.
pub fn fit_glm_poisson<'a>(
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    config: &GlmConfig,
) -> Result<PoissonFit, FitError> {
    check_rows("response length", x.nrows(), y.len())?;
    validate_counts(y)?;

    log::info!(
        "Starting Poisson IRLS: {} observations, {} coefficients, start {:?}",
        x.nrows(),
        x.ncols(),
        config.start
    );

    let beta0 = starting_coefficients(x, y, config)?;
    let mut stepper = PoissonIrlsStep {
        x,
        y,
        pivot_tolerance: config.solver.pivot_tolerance,
    };
    let (beta, loop_diagnostics) = iterate(&mut stepper, beta0, &config.iteration())?;
    if !loop_diagnostics.converged {
        return Err(FitError::NonConvergence {
            iterations: loop_diagnostics.iterations,
            last_change: loop_diagnostics.step_size,
        });
    }

    let (state, _) = WorkingState::at(x, y, beta.view())?;
    let xtwx = weighted_gram(x, state.mu.view())?;
    let xtwx_conditioning = conditioning(xtwx.view(), config.solver.ill_conditioned_threshold)?;
    if xtwx_conditioning.ill_conditioned {
        log::warn!(
            "X'WX at the Poisson solution has condition number {:.3e}; standard errors may be unreliable.",
            xtwx_conditioning.condition_number
        );
    }
    let covariance = CholeskyFactor::factor(xtwx.view(), config.solver.pivot_tolerance)?.inverse()?;
    let deviance = poisson_deviance(y, state.mu.view());

    log::info!(
        "Poisson IRLS converged in {} iterations, deviance {:.6}",
        loop_diagnostics.iterations,
        deviance
    );

    let diagnostics = FitDiagnostics {
        iterations: loop_diagnostics.iterations,
        converged: true,
        gradient_norm: state.score.dot(&state.score).sqrt(),
        step_size: loop_diagnostics.step_size,
    };

    Ok(PoissonFit {
        fit: FitResult {
            coefficients: Coefficients::new(beta),
            covariance: Some(covariance),
            diagnostics,
            conditioning: Some(xtwx_conditioning),
            deviance: Some(deviance),
            penalty: 0.0,
        },
        fitted_means: state.mu,
    })
}
