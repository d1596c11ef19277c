use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};
use ridgeline::{FitError, GlmConfig, GlmStart, fit_glm_poisson, poisson_deviance};

const TRUE_INTERCEPT: f64 = 0.5;
const TRUE_SLOPE: f64 = 1.2;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Draws `n` rows of `[1, x]` with `x ~ U(0, 1)` and Poisson counts at `exp(a + b x)`.
fn simulate(n: usize, rng: &mut StdRng) -> (Array2<f64>, Array1<f64>) {
    let mut x = Array2::ones((n, 2));
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let covariate: f64 = rng.r#gen();
        x[[i, 1]] = covariate;
        let mean = (TRUE_INTERCEPT + TRUE_SLOPE * covariate).exp();
        let counts = Poisson::new(mean).unwrap_or_else(|e| panic!("bad Poisson mean {mean}: {e}"));
        y[i] = counts.sample(rng);
    }
    (x, y)
}

#[test]
fn reported_standard_errors_cover_the_truth() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(20240611);
    let trials = 40;
    let mut covered = 0;

    for trial in 0..trials {
        let (x, y) = simulate(300, &mut rng);
        let fit = fit_glm_poisson(x.view(), y.view(), &GlmConfig::default()).unwrap();
        assert!(fit.fit.diagnostics.converged);
        let beta = fit.coefficients();
        let se = fit.standard_errors();

        let z_intercept = (beta[0] - TRUE_INTERCEPT) / se[0];
        let z_slope = (beta[1] - TRUE_SLOPE) / se[1];
        assert!(
            z_intercept.abs() < 5.0 && z_slope.abs() < 5.0,
            "trial {trial}: estimates ({:.3}, {:.3}) far outside their standard errors ({:.3}, {:.3})",
            beta[0],
            beta[1],
            se[0],
            se[1]
        );
        if z_intercept.abs() < 2.0 && z_slope.abs() < 2.0 {
            covered += 1;
        }
    }

    let coverage = covered as f64 / trials as f64;
    assert!(coverage >= 0.75, "joint 2 SE coverage only {coverage}");
}

#[test]
fn both_starts_reach_the_same_estimate() {
    let mut rng = StdRng::seed_from_u64(7);
    let (x, y) = simulate(150, &mut rng);
    let pilot = fit_glm_poisson(x.view(), y.view(), &GlmConfig::default()).unwrap();
    let zero = fit_glm_poisson(
        x.view(),
        y.view(),
        &GlmConfig {
            start: GlmStart::Zero,
            ..GlmConfig::default()
        },
    )
    .unwrap();
    for (a, b) in pilot.coefficients().iter().zip(zero.coefficients().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-7);
    }

    // The score vanishes at the estimate, so fitted totals match observed totals.
    assert_abs_diff_eq!(pilot.fitted_means.sum(), y.sum(), epsilon = 1e-6);
    let deviance = pilot.fit.deviance.unwrap();
    assert_abs_diff_eq!(deviance, poisson_deviance(y.view(), pilot.fitted_means.view()), epsilon = 1e-12);
    assert!(deviance >= 0.0);
}

#[test]
fn separated_data_fails_instead_of_diverging() {
    // Every count is zero in the second group, so its coefficient runs to -infinity.
    let x = Array2::from_shape_vec(
        (6, 2),
        vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
    )
    .unwrap();
    let y = Array1::from_vec(vec![3.0, 5.0, 4.0, 0.0, 0.0, 0.0]);
    let result = fit_glm_poisson(x.view(), y.view(), &GlmConfig::new(1e-8, 25));
    assert!(
        matches!(
            result,
            Err(FitError::NonConvergence { .. }) | Err(FitError::SingularMatrix { .. })
        ),
        "expected a convergence failure, got {result:?}"
    );
}
