//! Newton-type iteration.
//!
//! Both the general Newton-Raphson solver and the Poisson IRLS fitter have
//! the same shape: evaluate derivatives at the current point, solve one linear
//! system, move. [`NewtonStep`] captures the "evaluate and solve" part and
//! [`iterate`] owns the loop, the stopping rule and the diagnostics, so the
//! loop is written once.
//!
//! Convergence is local only. No line search or bracketing is attempted; the
//! caller supplies a starting point in the basin of the root it wants.

use crate::config::IterationConfig;
use crate::error::FitError;
use crate::linalg::{LinalgError, solve_general};
use crate::types::FitDiagnostics;
use ndarray::{Array1, Array2, ArrayView1};

/// One proposed move of a Newton-type method.
#[derive(Clone, Debug)]
pub struct StepProposal {
    pub next: Array1<f64>,
    /// Norm of the gradient (or residual) evaluated at the current point.
    pub gradient_norm: f64,
}

/// The "compute derivatives, solve, propose" half of a Newton-type method.
pub trait NewtonStep {
    /// Proposes the iterate that follows `theta`. `iteration` is one-based and
    /// only used for error reporting.
    fn step(&mut self, theta: ArrayView1<f64>, iteration: usize) -> Result<StepProposal, FitError>;
}

/// Working state of a single [`iterate`] call. Never outlives the call.
struct OptimizerState {
    theta: Array1<f64>,
    gradient_norm: f64,
    step_size: f64,
    iteration: usize,
}

impl OptimizerState {
    fn new(theta: Array1<f64>) -> Self {
        Self {
            theta,
            gradient_norm: f64::NAN,
            step_size: f64::INFINITY,
            iteration: 0,
        }
    }

    fn advance(&mut self, proposal: StepProposal) -> f64 {
        let delta = &proposal.next - &self.theta;
        let step_size = delta.dot(&delta).sqrt();
        self.theta = proposal.next;
        self.gradient_norm = proposal.gradient_norm;
        self.step_size = step_size;
        self.iteration += 1;
        step_size
    }

    fn finish(self, converged: bool) -> (Array1<f64>, FitDiagnostics) {
        let diagnostics = FitDiagnostics {
            iterations: self.iteration,
            converged,
            gradient_norm: self.gradient_norm,
            step_size: self.step_size,
        };
        (self.theta, diagnostics)
    }
}

/// Runs `stepper` from `theta0` until `||theta_next - theta|| < tolerance` or
/// the iteration budget runs out.
///
/// Exhausting the budget is not an error here: the returned diagnostics carry
/// `converged = false` and the caller decides what that means.
pub fn iterate<S>(
    stepper: &mut S,
    theta0: Array1<f64>,
    config: &IterationConfig,
) -> Result<(Array1<f64>, FitDiagnostics), FitError>
where
    S: NewtonStep + ?Sized,
{
    let dim = theta0.len();
    let mut state = OptimizerState::new(theta0);

    while state.iteration < config.max_iterations {
        let proposal = stepper.step(state.theta.view(), state.iteration + 1)?;
        if proposal.next.len() != dim {
            return Err(FitError::DimensionMismatch {
                context: "proposed iterate",
                expected: dim,
                found: proposal.next.len(),
            });
        }
        let step_size = state.advance(proposal);
        log::debug!(
            "[Newton Iter #{}] step norm {:.4e}, gradient norm {:.4e}",
            state.iteration,
            step_size,
            state.gradient_norm
        );
        if !step_size.is_finite() {
            return Err(FitError::NonConvergence {
                iterations: state.iteration,
                last_change: step_size,
            });
        }
        if step_size < config.tolerance {
            return Ok(state.finish(true));
        }
    }

    log::warn!(
        "Newton iteration stopped after {} iterations without meeting tolerance {:.1e} (last step {:.4e}).",
        state.iteration,
        config.tolerance,
        state.step_size
    );
    Ok(state.finish(false))
}

fn all_finite<'a>(values: impl IntoIterator<Item = &'a f64>) -> bool {
    values.into_iter().all(|v| v.is_finite())
}

/// Multivariate step `theta - H(theta)^{-1} grad(theta)`.
struct HessianStep<G, H> {
    grad_fn: G,
    hess_fn: H,
    singular_tolerance: f64,
}

impl<G, H> NewtonStep for HessianStep<G, H>
where
    G: FnMut(ArrayView1<f64>) -> Array1<f64>,
    H: FnMut(ArrayView1<f64>) -> Array2<f64>,
{
    fn step(&mut self, theta: ArrayView1<f64>, iteration: usize) -> Result<StepProposal, FitError> {
        let p = theta.len();
        let gradient = (self.grad_fn)(theta);
        if gradient.len() != p {
            return Err(FitError::DimensionMismatch {
                context: "gradient length",
                expected: p,
                found: gradient.len(),
            });
        }
        let hessian = (self.hess_fn)(theta);
        if hessian.dim() != (p, p) {
            return Err(FitError::DimensionMismatch {
                context: "hessian size",
                expected: p,
                found: if hessian.nrows() != p {
                    hessian.nrows()
                } else {
                    hessian.ncols()
                },
            });
        }
        if !all_finite(gradient.iter()) || !all_finite(hessian.iter()) {
            return Err(FitError::NonInvertibleHessian { iteration });
        }

        let direction = solve_general(hessian.view(), gradient.view(), self.singular_tolerance)
            .map_err(|err| match err {
                LinalgError::SingularMatrix { .. } => FitError::NonInvertibleHessian { iteration },
                other => FitError::from(other),
            })?;

        Ok(StepProposal {
            next: &theta - &direction,
            gradient_norm: gradient.dot(&gradient).sqrt(),
        })
    }
}

/// Finds a stationary point of `f` (a root of `grad_fn`) by Newton-Raphson.
///
/// Returns the last iterate with its diagnostics. A singular or non-finite
/// Hessian fails with [`FitError::NonInvertibleHessian`]; the caller may retry
/// from a perturbed start.
pub fn newton_raphson<G, H>(
    theta0: ArrayView1<f64>,
    grad_fn: G,
    hess_fn: H,
    config: &IterationConfig,
) -> Result<(Array1<f64>, FitDiagnostics), FitError>
where
    G: FnMut(ArrayView1<f64>) -> Array1<f64>,
    H: FnMut(ArrayView1<f64>) -> Array2<f64>,
{
    let mut stepper = HessianStep {
        grad_fn,
        hess_fn,
        singular_tolerance: config.singular_tolerance,
    };
    iterate(&mut stepper, theta0.to_owned(), config)
}

/// One-dimensional step `x - f(x) / f'(x)`.
struct ScalarStep<F, D> {
    f: F,
    f_prime: D,
    zero_tolerance: f64,
}

impl<F, D> NewtonStep for ScalarStep<F, D>
where
    F: FnMut(f64) -> f64,
    D: FnMut(f64) -> f64,
{
    fn step(&mut self, theta: ArrayView1<f64>, iteration: usize) -> Result<StepProposal, FitError> {
        let x = theta[0];
        let value = (self.f)(x);
        let slope = (self.f_prime)(x);
        if !slope.is_finite() || slope.abs() <= self.zero_tolerance {
            return Err(FitError::ZeroDerivative { iteration, x });
        }
        Ok(StepProposal {
            next: Array1::from_elem(1, x - value / slope),
            gradient_norm: value.abs(),
        })
    }
}

/// Scalar root finding, the one-dimensional case of [`newton_raphson`].
///
/// A derivative with magnitude at or below `config.singular_tolerance` fails
/// with [`FitError::ZeroDerivative`].
pub fn newton_raphson_scalar<F, D>(
    x0: f64,
    f: F,
    f_prime: D,
    config: &IterationConfig,
) -> Result<(f64, FitDiagnostics), FitError>
where
    F: FnMut(f64) -> f64,
    D: FnMut(f64) -> f64,
{
    let mut stepper = ScalarStep {
        f,
        f_prime,
        zero_tolerance: config.singular_tolerance,
    };
    let (theta, diagnostics) = iterate(&mut stepper, Array1::from_elem(1, x0), config)?;
    Ok((theta[0], diagnostics))
}
