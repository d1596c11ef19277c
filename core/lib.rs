#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

//! Regression and smoothing estimators over dense `ndarray` data: ridge and
//! LASSO with k-fold penalty selection, Poisson IRLS, a generic Newton-Raphson
//! driver, fixed-radius kernel smoothing and truncated-power splines.
//!
//! Every fit is a pure function of its inputs and a config value. Results are
//! immutable; failures come back as [`FitError`].

pub mod basis;
pub mod config;
pub mod cv;
pub mod error;
pub mod glm;
pub mod kernel;
pub mod lasso;
pub mod linalg;
pub mod newton;
pub mod ridge;
pub mod spline;
pub mod types;

pub use basis::{BasisError, KnotStrategy, TruncatedPowerBasis, place_knots};
pub use config::{
    ConfigError, CvConfig, GlmConfig, GlmStart, IterationConfig, LassoConfig, RidgelineConfig,
    SolverConfig, SplineConfig,
};
pub use cv::{CrossValidation, Folds, PathPoint, Regularization, cross_validate};
pub use error::FitError;
pub use glm::{PoissonFit, fit_glm_poisson, poisson_deviance};
pub use kernel::{Kernel, kernel_smooth, kernel_smooth_many, kernel_smooth_with, kernel_weights};
pub use lasso::{fit_lasso, lambda_grid, lasso_lambda_max};
pub use newton::{NewtonStep, StepProposal, iterate, newton_raphson, newton_raphson_scalar};
pub use ridge::{fit_ols, fit_ridge};
pub use spline::{SplineFit, spline_fit, spline_fit_auto};
pub use types::{Coefficients, Conditioning, FitDiagnostics, FitResult, LinearPredictor};
