//! K-fold selection of the regularization strength.
//!
//! Folds are cut once and shared read-only by every grid point. Grid points
//! are evaluated in parallel; folds within one grid point run in order. The
//! mean held-out error of a grid point is only formed once all its folds are
//! done, and nothing is returned until the whole grid has been scored.

use crate::config::CvConfig;
use crate::error::{FitError, check_lambda, check_rows};
use crate::lasso::{coordinate_descent, fit_lasso};
use crate::ridge::{fit_ridge, solve_ridge};
use crate::types::FitResult;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Which penalized fit a cross-validation run tunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regularization {
    Ridge,
    Lasso,
}

/// Held-out performance of one grid value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub lambda: f64,
    /// Mean over folds of the per-fold mean squared error.
    pub mean_error: f64,
    pub fold_errors: Vec<f64>,
}

/// Selected penalty, the full-data refit at that penalty, and the scored path
/// in the order the grid was given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidation {
    pub best_lambda: f64,
    pub fit: FitResult,
    pub path: Vec<PathPoint>,
}

/// Row order plus the contiguous slice of it that each fold holds out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folds {
    order: Vec<usize>,
    bounds: Vec<Range<usize>>,
}

impl Folds {
    /// Splits `n` rows into `k` folds whose sizes differ by at most one.
    /// With a seed the rows are shuffled first; otherwise row order is kept.
    pub fn new(n: usize, k: usize, seed: Option<u64>) -> Result<Self, FitError> {
        if k < 2 || k > n {
            return Err(FitError::InvalidHyperparameter {
                name: "k_folds",
                value: k as f64,
                reason: "must be at least 2 and at most the number of observations",
            });
        }
        let mut order: Vec<usize> = (0..n).collect();
        if let Some(seed) = seed {
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }

        let base = n / k;
        let remainder = n % k;
        let mut bounds = Vec::with_capacity(k);
        let mut start = 0;
        for fold in 0..k {
            let size = base + usize::from(fold < remainder);
            bounds.push(start..start + size);
            start += size;
        }
        Ok(Self { order, bounds })
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Rows held out by `fold`.
    pub fn test_rows(&self, fold: usize) -> &[usize] {
        &self.order[self.bounds[fold].clone()]
    }

    /// Rows used for training when `fold` is held out.
    pub fn train_rows(&self, fold: usize) -> Vec<usize> {
        let held_out = &self.bounds[fold];
        self.order[..held_out.start]
            .iter()
            .chain(self.order[held_out.end..].iter())
            .copied()
            .collect()
    }
}

struct FoldData {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_test: Array2<f64>,
    y_test: Array1<f64>,
}

impl FoldData {
    fn split(x: ArrayView2<f64>, y: ArrayView1<f64>, folds: &Folds, fold: usize) -> Self {
        let train = folds.train_rows(fold);
        let test = folds.test_rows(fold);
        Self {
            x_train: x.select(Axis(0), &train),
            y_train: y.select(Axis(0), &train),
            x_test: x.select(Axis(0), test),
            y_test: y.select(Axis(0), test),
        }
    }

    fn held_out_error(&self, beta: &Array1<f64>) -> f64 {
        let residual = &self.y_test - &self.x_test.dot(beta);
        residual.dot(&residual) / self.y_test.len() as f64
    }
}

/// Mean errors closer than this relative difference count as a tie.
const TIE_TOLERANCE: f64 = 1e-12;

/// Scores one penalty on every fold. A fold whose fit fails (for example an
/// unpenalized ridge with more predictors than training rows) scores an
/// infinite error, which keeps that penalty from being selected without
/// aborting the rest of the grid.
fn score_lambda(lambda: f64, folds: &[FoldData], config: &CvConfig, method: Regularization) -> PathPoint {
    let mut fold_errors = Vec::with_capacity(folds.len());
    for (index, fold) in folds.iter().enumerate() {
        let beta = match method {
            Regularization::Ridge => solve_ridge(
                fold.x_train.view(),
                fold.y_train.view(),
                lambda,
                &config.solver,
            ),
            Regularization::Lasso => Ok(coordinate_descent(
                fold.x_train.view(),
                fold.y_train.view(),
                lambda,
                &config.lasso,
            )
            .0),
        };
        let error = match beta {
            Ok(beta) => fold.held_out_error(&beta),
            Err(err) => {
                log::warn!("[CV lambda {lambda:.4e}] fold {index} fit failed, scoring it as infinite: {err}");
                f64::INFINITY
            }
        };
        log::trace!("[CV lambda {lambda:.4e}] fold {index} held-out error {error:.6e}");
        fold_errors.push(error);
    }
    let mean_error = fold_errors.iter().sum::<f64>() / fold_errors.len() as f64;
    PathPoint {
        lambda,
        mean_error,
        fold_errors,
    }
}

fn within_tie_tolerance(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIE_TOLERANCE * a.abs().max(b.abs())
}

/// Index of the grid point with the smallest mean held-out error. Errors
/// within a relative `1e-12` of each other tie, and ties go to the larger
/// penalty. Non-finite errors never win.
fn select_best(path: &[PathPoint]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, point) in path.iter().enumerate() {
        if !point.mean_error.is_finite() {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) => {
                let incumbent = &path[current];
                if within_tie_tolerance(point.mean_error, incumbent.mean_error) {
                    point.lambda > incumbent.lambda
                } else {
                    point.mean_error < incumbent.mean_error
                }
            }
        };
        if better {
            best = Some(index);
        }
    }
    best
}

/// Chooses the penalty from `lambda_grid` with the lowest k-fold mean
/// held-out squared error, then refits on all observations at that penalty.
pub fn cross_validate(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda_grid: &[f64],
    config: &CvConfig,
    method: Regularization,
) -> Result<CrossValidation, FitError> {
    check_rows("response length", x.nrows(), y.len())?;
    if lambda_grid.is_empty() {
        return Err(FitError::InvalidHyperparameter {
            name: "lambda_grid",
            value: 0.0,
            reason: "at least one candidate penalty is required",
        });
    }
    for &lambda in lambda_grid {
        check_lambda("lambda_grid entry", lambda)?;
    }

    let folds = Folds::new(x.nrows(), config.k_folds, config.shuffle_seed)?;
    log::info!(
        "Cross-validating {:?} over {} penalties with {} folds ({} observations).",
        method,
        lambda_grid.len(),
        folds.len(),
        x.nrows()
    );

    let fold_data: Vec<FoldData> = (0..folds.len())
        .map(|fold| FoldData::split(x, y, &folds, fold))
        .collect();

    let path: Vec<PathPoint> = lambda_grid
        .par_iter()
        .map(|&lambda| score_lambda(lambda, &fold_data, config, method))
        .collect();

    let best_index = select_best(&path).ok_or(FitError::InvalidHyperparameter {
        name: "lambda_grid",
        value: f64::NAN,
        reason: "no candidate produced a finite held-out error",
    })?;
    let best_lambda = path[best_index].lambda;
    log::info!(
        "Selected lambda = {:.4e} with mean held-out error {:.6e}.",
        best_lambda,
        path[best_index].mean_error
    );

    let fit = match method {
        Regularization::Ridge => fit_ridge(x, y, best_lambda, &config.solver)?,
        Regularization::Lasso => fit_lasso(x, y, best_lambda, &config.lasso)?,
    };

    Ok(CrossValidation {
        best_lambda,
        fit,
        path,
    })
}
