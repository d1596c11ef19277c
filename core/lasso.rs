use crate::config::LassoConfig;
use crate::error::{FitError, check_rows};
use crate::linalg::{conditioning, gram, xt_vec};
use crate::types::{Coefficients, FitDiagnostics, FitResult};
use ndarray::{Array1, ArrayView1, ArrayView2};

#[inline]
fn soft_threshold(value: f64, threshold: f64) -> f64 {
    value.signum() * (value.abs() - threshold).max(0.0)
}

fn check_lasso_lambda(lambda: f64) -> Result<(), FitError> {
    // Positive infinity is allowed: it is the limit that zeroes every coefficient.
    if lambda.is_nan() || lambda < 0.0 {
        return Err(FitError::InvalidHyperparameter {
            name: "lambda",
            value: lambda,
            reason: "must be non-negative",
        });
    }
    Ok(())
}

/// Smallest penalty for which the all-zero vector minimizes
/// `||y - X beta||^2 + lambda ||beta||_1`, i.e. `2 max_j |x_j'y|`.
pub fn lasso_lambda_max(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<f64, FitError> {
    check_rows("response length", x.nrows(), y.len())?;
    let correlations = xt_vec(x, y)?;
    Ok(2.0 * correlations.iter().fold(0.0_f64, |acc, &c| acc.max(c.abs())))
}

/// Cyclic coordinate descent from `beta = 0`.
///
/// The residual `y - X beta` is maintained incrementally, so one cycle costs
/// a single pass over the design matrix.
pub(crate) fn coordinate_descent(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
    config: &LassoConfig,
) -> (Array1<f64>, FitDiagnostics) {
    let p = x.ncols();
    let threshold = 0.5 * lambda;
    let column_norms: Vec<f64> = x.columns().into_iter().map(|col| col.dot(&col)).collect();

    let mut beta = Array1::<f64>::zeros(p);
    let mut residual = y.to_owned();
    let mut max_change = f64::INFINITY;
    let mut cycles = 0;
    let mut converged = false;

    while cycles < config.max_iterations {
        cycles += 1;
        max_change = 0.0_f64;
        for (j, column) in x.columns().into_iter().enumerate() {
            let norm_sq = column_norms[j];
            if norm_sq == 0.0 {
                continue;
            }
            let rho = column.dot(&residual) + norm_sq * beta[j];
            let updated = soft_threshold(rho, threshold) / norm_sq;
            let delta = updated - beta[j];
            if delta != 0.0 {
                residual.scaled_add(-delta, &column);
                beta[j] = updated;
                max_change = max_change.max(delta.abs());
            }
        }
        log::trace!("[Lasso Cycle #{cycles}] max coefficient change {max_change:.4e}");
        if max_change < config.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        log::warn!(
            "Lasso coordinate descent hit the cap of {} cycles (last max change {:.4e}, lambda = {:.4e}).",
            config.max_iterations,
            max_change,
            lambda
        );
    }

    // Distance from the subgradient optimality conditions.
    let violation: f64 = x
        .columns()
        .into_iter()
        .zip(beta.iter())
        .map(|(column, &b)| {
            let g = -2.0 * column.dot(&residual);
            let v = if b != 0.0 {
                g + lambda * b.signum()
            } else {
                (g.abs() - lambda).max(0.0)
            };
            v * v
        })
        .sum();

    let diagnostics = FitDiagnostics {
        iterations: cycles,
        converged,
        gradient_norm: violation.sqrt(),
        step_size: max_change,
    };
    (beta, diagnostics)
}

/// LASSO by cyclic coordinate descent, minimizing
/// `||y - X beta||^2 + lambda ||beta||_1`.
///
/// Each coordinate takes the soft-threshold update
/// `beta_j = sign(rho_j) max(0, |rho_j| - lambda / 2) / ||x_j||^2`.
/// Cycles stop when the largest coefficient change in a cycle is below
/// `config.tolerance` or after `config.max_iterations` cycles; in the latter
/// case the result is still returned with `converged = false`.
pub fn fit_lasso(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
    config: &LassoConfig,
) -> Result<FitResult, FitError> {
    check_rows("response length", x.nrows(), y.len())?;
    check_lasso_lambda(lambda)?;

    log::info!(
        "Fitting lasso: {} observations, {} predictors, lambda = {:.4e}",
        x.nrows(),
        x.ncols(),
        lambda
    );

    let xtx_conditioning = conditioning(gram(x).view(), config.solver.ill_conditioned_threshold)?;
    let (beta, diagnostics) = coordinate_descent(x, y, lambda, config);
    let coefficients = Coefficients::new(beta);
    log::info!(
        "Lasso finished after {} cycles with {} of {} coefficients at zero.",
        diagnostics.iterations,
        coefficients.zero_count(),
        coefficients.len()
    );

    Ok(FitResult {
        coefficients,
        covariance: None,
        diagnostics,
        conditioning: Some(xtx_conditioning),
        deviance: None,
        penalty: lambda,
    })
}

/// Log-spaced, descending penalty grid from `max` down to `max * min_ratio`.
pub fn lambda_grid(max: f64, min_ratio: f64, count: usize) -> Result<Vec<f64>, FitError> {
    if !(max.is_finite() && max > 0.0) {
        return Err(FitError::InvalidHyperparameter {
            name: "max",
            value: max,
            reason: "must be finite and positive",
        });
    }
    if !(min_ratio > 0.0 && min_ratio < 1.0) {
        return Err(FitError::InvalidHyperparameter {
            name: "min_ratio",
            value: min_ratio,
            reason: "must lie strictly between 0 and 1",
        });
    }
    Ok(match count {
        0 => Vec::new(),
        1 => vec![max],
        _ => {
            let step = min_ratio.ln() / (count - 1) as f64;
            (0..count).map(|i| max * (step * i as f64).exp()).collect()
        }
    })
}
