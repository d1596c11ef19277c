//! Fixed-radius kernel regression in one predictor.
//!
//! The basic estimator is the local mean: `m(x)` is the average of the `y_i`
//! whose `x_i` lie strictly within `h` of `x`. Compactly supported kernels
//! generalize it to a weighted local mean over the same window.

use crate::error::{FitError, check_rows};
use itertools::izip;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Weight profile on the scaled distance `u = (x - x_i) / h`, zero for `|u| >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Kernel {
    /// Equal weight inside the window; gives the plain local mean.
    #[default]
    Uniform,
    /// `1 - u^2`
    Epanechnikov,
    /// `(1 - |u|^3)^3`
    Tricube,
}

impl Kernel {
    #[inline]
    pub fn weight(&self, u: f64) -> f64 {
        let a = u.abs();
        if !(a < 1.0) {
            return 0.0;
        }
        match self {
            Kernel::Uniform => 1.0,
            Kernel::Epanechnikov => 1.0 - a * a,
            Kernel::Tricube => {
                let t = 1.0 - a * a * a;
                t * t * t
            }
        }
    }
}

fn check_radius(radius: f64) -> Result<(), FitError> {
    if radius.is_nan() || radius <= 0.0 {
        return Err(FitError::InvalidHyperparameter {
            name: "radius",
            value: radius,
            reason: "must be positive (infinity is allowed)",
        });
    }
    Ok(())
}

/// Kernel weights of every training point for one query.
///
/// An infinite radius gives every finite training point full weight, the
/// limit in which the smoother returns the global mean.
pub fn kernel_weights(
    x_train: ArrayView1<f64>,
    x_query: f64,
    radius: f64,
    kernel: Kernel,
) -> Result<Array1<f64>, FitError> {
    check_radius(radius)?;
    Ok(x_train.mapv(|xi| {
        let distance = (x_query - xi).abs();
        if radius.is_infinite() {
            if distance.is_finite() { kernel.weight(0.0) } else { 0.0 }
        } else {
            kernel.weight(distance / radius)
        }
    }))
}

/// Weighted local mean at `x_query`.
pub fn kernel_smooth_with(
    x_train: ArrayView1<f64>,
    y_train: ArrayView1<f64>,
    x_query: f64,
    radius: f64,
    kernel: Kernel,
) -> Result<f64, FitError> {
    check_rows("training response length", x_train.len(), y_train.len())?;
    let weights = kernel_weights(x_train, x_query, radius, kernel)?;
    let (weighted_sum, total_weight) = izip!(weights.iter(), y_train.iter())
        .filter(|(w, _)| **w > 0.0)
        .fold((0.0, 0.0), |(sum, total), (w, yi)| (sum + w * yi, total + w));
    if total_weight <= 0.0 {
        return Err(FitError::EmptyNeighborhood { query: x_query });
    }
    Ok(weighted_sum / total_weight)
}

/// Mean of `y_i` over training points with `|x_query - x_i| < radius`.
///
/// Fails with [`FitError::EmptyNeighborhood`] when no training point is in
/// range; the caller can widen the radius or mark the point as missing.
pub fn kernel_smooth(
    x_train: ArrayView1<f64>,
    y_train: ArrayView1<f64>,
    x_query: f64,
    radius: f64,
) -> Result<f64, FitError> {
    kernel_smooth_with(x_train, y_train, x_query, radius, Kernel::Uniform)
}

/// Local means at many query points. Each query succeeds or fails on its own.
pub fn kernel_smooth_many(
    x_train: ArrayView1<f64>,
    y_train: ArrayView1<f64>,
    x_queries: ArrayView1<f64>,
    radius: f64,
) -> Result<Vec<Result<f64, FitError>>, FitError> {
    check_rows("training response length", x_train.len(), y_train.len())?;
    check_radius(radius)?;
    let estimates: Vec<Result<f64, FitError>> = x_queries
        .iter()
        .map(|&query| kernel_smooth(x_train, y_train, query, radius))
        .collect();
    let missing = estimates.iter().filter(|e| e.is_err()).count();
    if missing > 0 {
        log::debug!(
            "{missing} of {} query points have no training data within radius {radius}",
            estimates.len()
        );
    }
    Ok(estimates)
}
