//! Dense linear algebra used by every fitter in the crate.
//!
//! Factorizations come from `ndarray-linalg`. Symmetric systems are
//! equilibrated to a unit diagonal before the Cholesky call, so the pivot
//! tolerance is relative to each column's own scale and does not depend on
//! the units of the predictors. Callers choose how close to singular a system
//! may be before it is rejected.

use crate::types::Conditioning;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use ndarray_linalg::{Cholesky, CholeskyFactorized, EigValsh, InverseC, SVD, SolveC, UPLO};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinalgError {
    #[error("Matrix is numerically singular: pivot {pivot:.3e} at index {index}.")]
    SingularMatrix { index: usize, pivot: f64 },

    #[error("Dimension mismatch for {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("LAPACK routine failed: {0}")]
    Eigen(#[from] ndarray_linalg::error::LinalgError),
}

fn ensure(context: &'static str, expected: usize, found: usize) -> Result<(), LinalgError> {
    if expected != found {
        return Err(LinalgError::DimensionMismatch {
            context,
            expected,
            found,
        });
    }
    Ok(())
}

/// Computes `X'X`.
pub fn gram(x: ArrayView2<f64>) -> Array2<f64> {
    x.t().dot(&x)
}

/// Computes `X'WX` for a diagonal weight matrix given by `weights`.
pub fn weighted_gram(x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Result<Array2<f64>, LinalgError> {
    ensure("weighted gram weights", x.nrows(), weights.len())?;
    let weighted_rows = &x * &weights.insert_axis(Axis(1));
    Ok(x.t().dot(&weighted_rows))
}

/// Computes `X'v`.
pub fn xt_vec(x: ArrayView2<f64>, v: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
    ensure("transpose product vector", x.nrows(), v.len())?;
    Ok(x.t().dot(&v))
}

/// Cholesky factor of an equilibrated symmetric matrix.
///
/// With `D = diag(1 / sqrt(a_ii))` the factor holds `L` from
/// `D A D = L L'`, so every scaled pivot `L_kk^2` lies in `(0, 1]` and
/// measures how much of column `k` is not explained by the columns before it.
#[derive(Clone, Debug)]
pub struct CholeskyFactor {
    lower: Array2<f64>,
    scale: Array1<f64>,
    min_pivot_ratio: f64,
}

impl CholeskyFactor {
    /// Factors a symmetric positive definite matrix.
    ///
    /// Only the lower triangle of `a` is read. A non-positive diagonal entry,
    /// a LAPACK failure, or a scaled pivot that does not exceed `tolerance`
    /// is reported as [`LinalgError::SingularMatrix`] with the first offending
    /// index and the pivot in the units of `a`.
    pub fn factor(a: ArrayView2<f64>, tolerance: f64) -> Result<Self, LinalgError> {
        let n = a.nrows();
        ensure("cholesky column count", n, a.ncols())?;

        let diagonal = a.diag();
        if let Some((index, &pivot)) = diagonal
            .iter()
            .enumerate()
            .find(|&(_, &d)| !d.is_finite() || d <= 0.0)
        {
            return Err(LinalgError::SingularMatrix { index, pivot });
        }
        let scale = diagonal.mapv(|d| d.sqrt().recip());
        let scaled = Array2::from_shape_fn((n, n), |(i, j)| {
            let (row, col) = if i >= j { (i, j) } else { (j, i) };
            a[(row, col)] * scale[row] * scale[col]
        });

        if n == 0 {
            return Ok(Self {
                lower: scaled,
                scale,
                min_pivot_ratio: f64::INFINITY,
            });
        }

        let lower = match scaled.cholesky(UPLO::Lower) {
            Ok(lower) => lower,
            Err(ndarray_linalg::error::LinalgError::Lapack(_)) => {
                return Err(failed_pivot(scaled.view(), diagonal));
            }
            Err(other) => return Err(other.into()),
        };

        let threshold = tolerance.max(0.0);
        let mut min_pivot_ratio = f64::INFINITY;
        for (index, &root) in lower.diag().iter().enumerate() {
            let ratio = root * root;
            if !ratio.is_finite() || ratio <= threshold {
                return Err(LinalgError::SingularMatrix {
                    index,
                    pivot: ratio * diagonal[index],
                });
            }
            min_pivot_ratio = min_pivot_ratio.min(ratio);
        }

        Ok(Self {
            lower,
            scale,
            min_pivot_ratio,
        })
    }

    pub fn dim(&self) -> usize {
        self.scale.len()
    }

    /// Smallest accepted pivot of the equilibrated matrix.
    pub fn min_pivot_ratio(&self) -> f64 {
        self.min_pivot_ratio
    }

    /// Returns `L` with `A = L L'` in the units of the original matrix.
    pub fn lower(&self) -> Array2<f64> {
        let mut lower = self.lower.clone();
        for (mut row, &s) in lower.rows_mut().into_iter().zip(self.scale.iter()) {
            row /= s;
        }
        lower
    }

    fn factorized(&self) -> CholeskyFactorized<ndarray::ViewRepr<&f64>> {
        CholeskyFactorized {
            factor: self.lower.view(),
            uplo: UPLO::Lower,
        }
    }

    /// Solves `A x = b` as `x = D (D A D)^{-1} D b`.
    pub fn solve(&self, b: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
        ensure("cholesky right-hand side", self.dim(), b.len())?;
        if self.dim() == 0 {
            return Ok(Array1::zeros(0));
        }
        let scaled_rhs = &b * &self.scale;
        let scaled_solution = self.factorized().solvec(&scaled_rhs)?;
        Ok(scaled_solution * &self.scale)
    }

    /// Returns `A^{-1}`, symmetrized to remove round-off asymmetry.
    pub fn inverse(&self) -> Result<Array2<f64>, LinalgError> {
        let n = self.dim();
        if n == 0 {
            return Ok(Array2::zeros((0, 0)));
        }
        let scaled_inverse = self.factorized().invc()?;
        let inverse = Array2::from_shape_fn((n, n), |(i, j)| {
            scaled_inverse[(i, j)] * self.scale[i] * self.scale[j]
        });
        Ok((&inverse + &inverse.t()) * 0.5)
    }
}

/// Locates the first leading block of an equilibrated matrix that LAPACK
/// cannot factor and reports its Schur-complement pivot.
fn failed_pivot(scaled: ArrayView2<f64>, diagonal: ArrayView1<f64>) -> LinalgError {
    let n = scaled.nrows();
    for k in 0..n {
        if scaled.slice(s![..=k, ..=k]).cholesky(UPLO::Lower).is_ok() {
            continue;
        }
        let pivot = if k == 0 {
            scaled[(0, 0)]
        } else {
            let column = scaled.slice(s![..k, k]);
            scaled
                .slice(s![..k, ..k])
                .solvec(&column)
                .map_or(f64::NAN, |w| scaled[(k, k)] - column.dot(&w))
        };
        return LinalgError::SingularMatrix {
            index: k,
            pivot: pivot * diagonal[k],
        };
    }
    LinalgError::SingularMatrix {
        index: n.saturating_sub(1),
        pivot: 0.0,
    }
}

/// Solves a symmetric positive definite system in one call.
pub fn solve_spd(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
    tolerance: f64,
) -> Result<Array1<f64>, LinalgError> {
    CholeskyFactor::factor(a, tolerance)?.solve(b)
}

/// Thin SVD `A = U diag(sigma) V'` with singular values at or below
/// `tolerance * sigma_max` rejected.
fn checked_svd(
    a: ArrayView2<f64>,
    tolerance: f64,
) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), LinalgError> {
    let (u, sigma, vt) = match a.svd(true, true)? {
        (Some(u), sigma, Some(vt)) => (u, sigma, vt),
        (_, sigma, _) => {
            return Err(LinalgError::SingularMatrix {
                index: 0,
                pivot: sigma.get(0).copied().unwrap_or(0.0),
            });
        }
    };
    let rank = sigma.len();
    if rank < a.ncols() {
        return Err(LinalgError::SingularMatrix {
            index: rank,
            pivot: 0.0,
        });
    }
    let largest = sigma.get(0).copied().unwrap_or(0.0);
    let threshold = tolerance.max(0.0) * largest;
    if let Some((index, &pivot)) = sigma.iter().enumerate().find(|&(_, &v)| !(v > threshold)) {
        return Err(LinalgError::SingularMatrix { index, pivot });
    }
    Ok((u.slice(s![.., ..rank]).to_owned(), sigma, vt))
}

/// Solves a general square system through the singular value decomposition.
/// Used for Hessians that are indefinite or not symmetric; the reported pivot
/// of a singular system is the offending singular value.
pub fn solve_general(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
    tolerance: f64,
) -> Result<Array1<f64>, LinalgError> {
    let n = a.nrows();
    ensure("general system column count", n, a.ncols())?;
    ensure("general system right-hand side", n, b.len())?;
    if n == 0 {
        return Ok(Array1::zeros(0));
    }
    let (u, sigma, vt) = checked_svd(a, tolerance)?;
    let coordinates = u.t().dot(&b) / &sigma;
    Ok(vt.t().dot(&coordinates))
}

/// Least-squares solution of `X beta = y` without forming `X'X`.
///
/// Columns are scaled to unit norm before the SVD, so `tolerance` bounds the
/// ratio of the smallest to the largest singular value of the scaled design.
/// A zero column or fewer rows than columns is rank deficient.
pub fn solve_least_squares(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    tolerance: f64,
) -> Result<Array1<f64>, LinalgError> {
    ensure("least squares response", x.nrows(), y.len())?;
    let norms = x.map_axis(Axis(0), |column| column.dot(&column).sqrt());
    if let Some((index, &pivot)) = norms
        .iter()
        .enumerate()
        .find(|&(_, &norm)| !norm.is_finite() || norm == 0.0)
    {
        return Err(LinalgError::SingularMatrix { index, pivot });
    }
    if x.ncols() == 0 {
        return Ok(Array1::zeros(0));
    }
    let scaled = &x / &norms;
    let (u, sigma, vt) = checked_svd(scaled.view(), tolerance)?;
    let coordinates = u.t().dot(&y) / &sigma;
    Ok(vt.t().dot(&coordinates) / &norms)
}

/// Eigenvalue-ratio conditioning of a symmetric matrix.
///
/// A smallest eigenvalue that is not strictly positive reports an infinite
/// condition number, which always counts as ill-conditioned.
pub fn conditioning(a: ArrayView2<f64>, threshold: f64) -> Result<Conditioning, LinalgError> {
    ensure("conditioning column count", a.nrows(), a.ncols())?;
    if a.nrows() == 0 {
        return Ok(Conditioning::new(1.0, 0.0, threshold));
    }
    let eigenvalues = a.eigvalsh(UPLO::Lower)?;
    let largest = eigenvalues.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let smallest = eigenvalues.iter().fold(f64::INFINITY, |acc, &v| acc.min(v));
    let ratio = if smallest > 0.0 && largest > 0.0 {
        largest / smallest
    } else {
        f64::INFINITY
    };
    Ok(Conditioning::new(ratio, smallest, threshold))
}
