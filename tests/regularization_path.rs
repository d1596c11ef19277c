use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, Axis, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use ridgeline::{
    CvConfig, LassoConfig, Regularization, SolverConfig, cross_validate, fit_lasso, fit_ols,
    fit_ridge, lambda_grid, lasso_lambda_max,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Sparse linear truth: only the first three of `p` predictors matter.
fn sparse_problem(n: usize, p: usize, noise: f64, seed: u64) -> (Array2<f64>, Array1<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, p), |_| rng.sample::<f64, _>(StandardNormal));
    let mut beta = Array1::zeros(p);
    beta[0] = 3.0;
    beta[1] = -2.0;
    beta[2] = 1.5;
    let errors = Array1::from_shape_fn(n, |_| noise * rng.sample::<f64, _>(StandardNormal));
    let y = x.dot(&beta) + errors;
    (x, y, beta)
}

fn normal_equations(x: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
    // Solve X'X b = X'y by Gaussian elimination without pivoting; fine for a
    // well-conditioned random design.
    let mut a = x.t().dot(x);
    let mut b = x.t().dot(y);
    let p = b.len();
    for k in 0..p {
        for i in (k + 1)..p {
            let factor = a[[i, k]] / a[[k, k]];
            for j in k..p {
                a[[i, j]] -= factor * a[[k, j]];
            }
            b[i] -= factor * b[k];
        }
    }
    let mut solution = Array1::zeros(p);
    for k in (0..p).rev() {
        let tail = a.slice(s![k, (k + 1)..]).dot(&solution.slice(s![(k + 1)..]));
        solution[k] = (b[k] - tail) / a[[k, k]];
    }
    solution
}

#[test]
fn ridge_without_penalty_is_least_squares() {
    init_logging();
    let (x, y, _) = sparse_problem(60, 5, 0.5, 11);
    let solver = SolverConfig::default();
    let ridge = fit_ridge(x.view(), y.view(), 0.0, &solver).unwrap();
    let ols = fit_ols(x.view(), y.view(), &solver).unwrap();
    let reference = normal_equations(&x, &y);
    for ((r, o), e) in ridge.coefficients.iter().zip(ols.coefficients.iter()).zip(reference.iter()) {
        assert_abs_diff_eq!(r, o, epsilon = 1e-12);
        assert_abs_diff_eq!(r, e, epsilon = 1e-9);
    }
}

#[test]
fn large_penalty_zeroes_lasso_and_shrinks_ridge() {
    let (x, y, _) = sparse_problem(50, 8, 0.3, 5);
    let lambda_max = lasso_lambda_max(x.view(), y.view()).unwrap();
    let lasso = fit_lasso(x.view(), y.view(), 1.01 * lambda_max, &LassoConfig::default()).unwrap();
    assert_eq!(lasso.coefficients.zero_count(), 8);

    let ridge = fit_ridge(x.view(), y.view(), 1e8, &SolverConfig::default()).unwrap();
    assert!(ridge.coefficients.iter().all(|b| b.abs() < 1e-4));
    assert_eq!(ridge.coefficients.zero_count(), 0);
}

#[test]
fn lasso_recovers_the_sparse_support() {
    let (x, y, beta) = sparse_problem(120, 10, 0.2, 23);
    let lambda_max = lasso_lambda_max(x.view(), y.view()).unwrap();
    let fit = fit_lasso(x.view(), y.view(), 0.05 * lambda_max, &LassoConfig::default()).unwrap();
    assert!(fit.diagnostics.converged);
    for j in 0..3 {
        assert!(fit.coefficients[j].signum() == beta[j].signum());
        assert!(fit.coefficients[j].abs() < beta[j].abs() + 1e-9, "lasso should shrink, not inflate");
    }
    assert!(fit.diagnostics.gradient_norm < 1e-6);
}

#[test]
fn cross_validation_picks_a_grid_minimum() {
    init_logging();
    let (x, y, _) = sparse_problem(80, 6, 1.0, 3);
    let lambda_max = lasso_lambda_max(x.view(), y.view()).unwrap();
    let grid = lambda_grid(lambda_max, 1e-3, 12).unwrap();

    for method in [Regularization::Ridge, Regularization::Lasso] {
        let config = CvConfig {
            shuffle_seed: Some(17),
            ..CvConfig::with_folds(5)
        };
        let cv = cross_validate(x.view(), y.view(), &grid, &config, method).unwrap();
        assert_eq!(cv.path.len(), grid.len());
        for (point, &lambda) in cv.path.iter().zip(grid.iter()) {
            assert_eq!(point.lambda, lambda);
            assert_eq!(point.fold_errors.len(), 5);
        }
        let best = cv
            .path
            .iter()
            .find(|p| p.lambda == cv.best_lambda)
            .unwrap();
        assert!(cv.path.iter().all(|p| best.mean_error <= p.mean_error));
        assert_eq!(cv.fit.penalty, cv.best_lambda);

        // Refit is on all rows, so it matches a direct fit at the chosen penalty.
        let direct = match method {
            Regularization::Ridge => fit_ridge(x.view(), y.view(), cv.best_lambda, &config.solver),
            Regularization::Lasso => fit_lasso(x.view(), y.view(), cv.best_lambda, &config.lasso),
        }
        .unwrap();
        for (a, b) in cv.fit.coefficients.iter().zip(direct.coefficients.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }
}

#[test]
fn identical_predictions_tie_toward_the_larger_penalty() {
    // A zero design makes every penalty predict zero, so every grid point ties.
    let x = Array2::<f64>::zeros((12, 2));
    let y = Array1::linspace(-1.0, 1.0, 12);
    let grid = [0.1, 5.0, 1.0];
    let cv = cross_validate(
        x.view(),
        y.view(),
        &grid,
        &CvConfig::with_folds(3),
        Regularization::Lasso,
    )
    .unwrap();
    assert_eq!(cv.best_lambda, 5.0);
}

#[test]
fn seeded_folds_are_reproducible() {
    let (x, y, _) = sparse_problem(40, 4, 0.5, 9);
    let grid = [0.01, 0.1, 1.0, 10.0];
    let config = CvConfig {
        shuffle_seed: Some(99),
        ..CvConfig::with_folds(4)
    };
    let first = cross_validate(x.view(), y.view(), &grid, &config, Regularization::Ridge).unwrap();
    let second = cross_validate(x.view(), y.view(), &grid, &config, Regularization::Ridge).unwrap();
    assert_eq!(first.path, second.path);

    let held_out = x.select(Axis(0), &[0, 1, 2]);
    let predicted = first.fit.predict(held_out.view()).unwrap();
    assert_eq!(predicted.len(), 3);
}
