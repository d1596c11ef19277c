use crate::config::SolverConfig;
use crate::error::{FitError, check_lambda, check_rows};
use crate::linalg::{CholeskyFactor, conditioning, gram, xt_vec};
use crate::types::{Coefficients, FitDiagnostics, FitResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Penalized normal equations `(X'X + lambda I) beta = X'y`, factored.
struct RidgeSystem {
    system: Array2<f64>,
    rhs: Array1<f64>,
    factor: CholeskyFactor,
}

impl RidgeSystem {
    fn from_gram(
        xtx: Array2<f64>,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        lambda: f64,
        solver: &SolverConfig,
    ) -> Result<Self, FitError> {
        let mut system = xtx;
        system.diag_mut().mapv_inplace(|d| d + lambda);
        let rhs = xt_vec(x, y)?;
        let factor = CholeskyFactor::factor(system.view(), solver.pivot_tolerance)?;
        Ok(Self { system, rhs, factor })
    }

    fn solve(&self) -> Result<Array1<f64>, FitError> {
        Ok(self.factor.solve(self.rhs.view())?)
    }
}

/// Solves `(X'X + lambda I) beta = X'y` without any diagnostics.
pub(crate) fn solve_ridge(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
    solver: &SolverConfig,
) -> Result<Array1<f64>, FitError> {
    RidgeSystem::from_gram(gram(x), x, y, lambda, solver)?.solve()
}

/// Closed-form ridge regression, `beta = (X'X + lambda I)^{-1} X'y`.
///
/// Every column is penalized; include an intercept column only if it should
/// shrink too. With `lambda = 0` this is ordinary least squares. The result
/// always carries the conditioning of `X'X` alone, so an OLS fit on a nearly
/// collinear design is flagged rather than silently returned.
pub fn fit_ridge(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
    solver: &SolverConfig,
) -> Result<FitResult, FitError> {
    check_rows("response length", x.nrows(), y.len())?;
    check_lambda("lambda", lambda)?;

    log::info!(
        "Fitting ridge regression: {} observations, {} predictors, lambda = {:.4e}",
        x.nrows(),
        x.ncols(),
        lambda
    );

    let xtx = gram(x);
    let xtx_conditioning = conditioning(xtx.view(), solver.ill_conditioned_threshold)?;
    if xtx_conditioning.ill_conditioned {
        if lambda == 0.0 {
            log::warn!(
                "X'X is ill-conditioned (condition number {:.3e}); prefer a ridge or lasso fit over plain least squares.",
                xtx_conditioning.condition_number
            );
        } else {
            log::info!(
                "X'X condition number {:.3e}; relying on lambda = {:.3e} for stability.",
                xtx_conditioning.condition_number,
                lambda
            );
        }
    }

    let ridge = RidgeSystem::from_gram(xtx, x, y, lambda, solver)?;
    let beta = ridge.solve()?;

    let residual = &ridge.system.dot(&beta) - &ridge.rhs;
    let diagnostics = FitDiagnostics::closed_form(residual.dot(&residual).sqrt());
    log::debug!(
        "Ridge solve accepted a smallest relative pivot of {:.3e}",
        ridge.factor.min_pivot_ratio()
    );

    Ok(FitResult {
        coefficients: Coefficients::new(beta),
        covariance: None,
        diagnostics,
        conditioning: Some(xtx_conditioning),
        deviance: None,
        penalty: lambda,
    })
}

/// Ordinary least squares through the normal equations.
pub fn fit_ols(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    solver: &SolverConfig,
) -> Result<FitResult, FitError> {
    fit_ridge(x, y, 0.0, solver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn small_design() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 2.0],
            [1.0, 3.0],
            [1.0, 4.0]
        ];
        let y = array![1.1, 2.9, 5.2, 7.1, 8.8];
        (x, y)
    }

    #[test]
    fn zero_penalty_reproduces_least_squares_line() {
        let (x, y) = small_design();
        let fit = fit_ols(x.view(), y.view(), &SolverConfig::default()).unwrap();
        // Slope = Sxy / Sxx = 19.6 / 10, intercept = ybar - slope * xbar.
        assert_abs_diff_eq!(fit.coefficients[1], 1.96, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.coefficients[0], 1.10, epsilon = 1e-10);
        assert_eq!(fit.penalty, 0.0);
        assert!(!fit.conditioning.unwrap().ill_conditioned);
    }

    #[test]
    fn penalty_shrinks_coefficient_norm() {
        let (x, y) = small_design();
        let solver = SolverConfig::default();
        let norms: Vec<f64> = [0.0, 1.0, 10.0, 100.0]
            .iter()
            .map(|&lambda| {
                let beta = fit_ridge(x.view(), y.view(), lambda, &solver)
                    .unwrap()
                    .coefficients;
                beta.dot(&beta.0).sqrt()
            })
            .collect();
        for pair in norms.windows(2) {
            assert!(pair[1] < pair[0], "norms not decreasing: {norms:?}");
        }
    }

    #[test]
    fn ridge_is_defined_when_predictors_outnumber_rows() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [0.5, -1.0, 2.0, 0.0]];
        let y = array![1.0, -1.0];
        let solver = SolverConfig::default();
        assert!(matches!(
            fit_ols(x.view(), y.view(), &solver),
            Err(FitError::SingularMatrix { .. })
        ));
        let fit = fit_ridge(x.view(), y.view(), 0.5, &solver).unwrap();
        assert_eq!(fit.coefficients.len(), 4);
        assert!(fit.conditioning.unwrap().ill_conditioned);
    }

    #[test]
    fn shape_and_penalty_are_validated() {
        let (x, y) = small_design();
        let solver = SolverConfig::default();
        assert!(matches!(
            fit_ridge(x.view(), y.slice(ndarray::s![..3]), 1.0, &solver),
            Err(FitError::DimensionMismatch { expected: 5, found: 3, .. })
        ));
        assert!(matches!(
            fit_ridge(x.view(), y.view(), -1.0, &solver),
            Err(FitError::InvalidHyperparameter { .. })
        ));
        assert!(solve_ridge(x.view(), y.view(), f64::NAN, &solver).is_err());
    }

    #[test]
    fn diagnostic_free_solve_matches_the_full_fit() {
        let (x, y) = small_design();
        let solver = SolverConfig::default();
        for lambda in [0.0, 0.3, 30.0] {
            let beta = solve_ridge(x.view(), y.view(), lambda, &solver).unwrap();
            let fit = fit_ridge(x.view(), y.view(), lambda, &solver).unwrap();
            assert_eq!(beta, fit.coefficients.0);
            assert!(fit.diagnostics.gradient_norm < 1e-10);
        }
    }
}
