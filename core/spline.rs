//! Least-squares regression on a truncated-power spline basis.

use crate::basis::{KnotStrategy, TruncatedPowerBasis, place_knots};
use crate::config::SplineConfig;
use crate::error::{FitError, check_rows};
use crate::linalg::{conditioning, gram, solve_least_squares, xt_vec};
use crate::types::{Coefficients, FitDiagnostics, FitResult};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// A fitted spline: the basis it was fitted on plus the coefficient fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplineFit {
    pub basis: TruncatedPowerBasis,
    pub fit: FitResult,
}

impl SplineFit {
    pub fn predict(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, FitError> {
        let design = self.basis.design(x);
        self.fit.predict(design.view())
    }
}

/// Fits `y` on the truncated-power basis of `degree` with the given knots.
///
/// The coefficients come from an SVD of the column-scaled design, so a
/// high-degree basis on a wide range of `x` is still solvable; only a
/// singular value ratio at or below `config.solve_tolerance` fails. The
/// conditioning of `X'X` is reported on `fit.conditioning` rather than
/// raised. With no knots this is polynomial regression of degree
/// `degree - 1`.
pub fn spline_fit(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    degree: usize,
    knots: &[f64],
    config: &SplineConfig,
) -> Result<SplineFit, FitError> {
    check_rows("response length", x.len(), y.len())?;
    let basis = TruncatedPowerBasis::new(degree, ArrayView1::from(knots))?;
    let design = basis.design(x);
    log::debug!(
        "Spline design: {} observations, degree {}, {} knots, {} columns",
        x.len(),
        degree,
        knots.len(),
        basis.num_columns()
    );

    let beta = solve_least_squares(design.view(), y, config.solve_tolerance)?;
    let residual = &y - &design.dot(&beta);
    let gradient = xt_vec(design.view(), residual.view())?;
    let xtx_conditioning = conditioning(gram(design.view()).view(), config.ill_conditioned_threshold)?;
    if xtx_conditioning.ill_conditioned {
        log::warn!(
            "Spline basis of degree {} with {} knots has condition number {:.3e}.",
            degree,
            knots.len(),
            xtx_conditioning.condition_number
        );
    }

    let fit = FitResult {
        coefficients: Coefficients::new(beta),
        covariance: None,
        diagnostics: FitDiagnostics::closed_form(gradient.dot(&gradient).sqrt()),
        conditioning: Some(xtx_conditioning),
        deviance: None,
        penalty: 0.0,
    };
    Ok(SplineFit { basis, fit })
}

/// Places `num_knots` interior knots from `x` and fits the spline on them.
pub fn spline_fit_auto(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    degree: usize,
    num_knots: usize,
    strategy: KnotStrategy,
    config: &SplineConfig,
) -> Result<SplineFit, FitError> {
    let knots = place_knots(x, num_knots, strategy)?.to_vec();
    log::debug!("Placed {} knots by {:?}: {:?}", knots.len(), strategy, knots);
    spline_fit(x, y, degree, &knots, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::ridge::fit_ols;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    #[test]
    fn no_knots_matches_polynomial_least_squares() {
        let x = array![-2.0, -1.0, 0.0, 0.5, 1.0, 2.0, 3.0];
        let y = array![4.2, 0.9, -0.1, 0.3, 1.2, 3.8, 9.4];
        let spline = spline_fit(x.view(), y.view(), 3, &[], &SplineConfig::default()).unwrap();

        let vandermonde = Array2::from_shape_fn((x.len(), 3), |(i, j)| x[i].powi(j as i32));
        let ols = fit_ols(vandermonde.view(), y.view(), &SolverConfig::default()).unwrap();

        assert_eq!(spline.basis.num_columns(), 3);
        for (a, b) in spline.fit.coefficients.iter().zip(ols.coefficients.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn truncated_power_truth_is_recovered() {
        // y = 1 + 2x + 3 (x - 1)_+^2 lies exactly in the degree 2 basis with a knot at 1.
        let x = Array1::linspace(-1.0, 3.0, 17);
        let y = x.mapv(|v: f64| 1.0 + 2.0 * v + 3.0 * (v - 1.0).max(0.0).powi(2));
        let spline = spline_fit(x.view(), y.view(), 2, &[1.0], &SplineConfig::default()).unwrap();
        assert_eq!(spline.basis.num_columns(), 3);
        let beta = &spline.fit.coefficients;
        assert_abs_diff_eq!(beta[0], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(beta[1], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(beta[2], 3.0, epsilon = 1e-8);

        let predicted = spline.predict(array![0.0, 2.0].view()).unwrap();
        assert_abs_diff_eq!(predicted[0], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(predicted[1], 8.0, epsilon = 1e-8);
    }

    #[test]
    fn high_degree_on_a_wide_range_is_solvable() {
        // Raw powers of x up to 100^5 span ten orders of magnitude.
        let x = Array1::linspace(0.0, 100.0, 200);
        let knots = [20.0, 40.0, 60.0, 80.0];
        for (degree, c) in [(4, 1e-7), (5, 1e-9)] {
            let truth = |v: f64| 1.0 + 0.01 * v + c * (v - 40.0).max(0.0).powi(degree as i32);
            let y = x.mapv(truth);
            let spline = spline_fit(x.view(), y.view(), degree, &knots, &SplineConfig::default())
                .unwrap_or_else(|e| panic!("degree {degree} failed: {e}"));
            assert_eq!(spline.fit.coefficients.len(), degree + knots.len());

            let knot_coefficient = spline.fit.coefficients[degree + 1];
            assert!((knot_coefficient - c).abs() < 1e-3 * c, "degree {degree}: {knot_coefficient}");
            let queries = array![5.0, 33.0, 50.0, 99.0];
            let predicted = spline.predict(queries.view()).unwrap();
            for (got, &q) in predicted.iter().zip(queries.iter()) {
                assert_abs_diff_eq!(*got, truth(q), epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn automatic_knots_fit_and_predict() {
        let x = Array1::linspace(0.0, 1.0, 40);
        let y = x.mapv(|v: f64| (6.0 * v).sin());
        let spline =
            spline_fit_auto(x.view(), y.view(), 3, 4, KnotStrategy::Quantile, &SplineConfig::default())
                .unwrap();
        assert_eq!(spline.basis.knots().len(), 4);
        let fitted = spline.predict(x.view()).unwrap();
        let max_error = (&fitted - &y).iter().fold(0.0_f64, |m, e| m.max(e.abs()));
        assert!(max_error < 0.1, "max error {max_error}");
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let x = array![0.0, 1.0, 2.0];
        let y = array![0.0, 1.0, 2.0];
        let config = SplineConfig::default();
        assert!(matches!(
            spline_fit(x.view(), y.view(), 0, &[], &config),
            Err(FitError::Basis(_))
        ));
        assert!(matches!(
            spline_fit(x.view(), y.view(), 2, &[1.0, 0.5], &config),
            Err(FitError::Basis(_))
        ));
        assert!(matches!(
            spline_fit(x.view(), y.slice(ndarray::s![..2]), 2, &[], &config),
            Err(FitError::DimensionMismatch { .. })
        ));
    }
}
