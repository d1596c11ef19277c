use itertools::{Itertools, MinMaxResult};
use ndarray::{Array, Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defines the strategy for placing the interior knots of a spline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnotStrategy {
    /// Evenly spaced knots strictly inside the range of the data.
    Uniform,
    /// Knots at equally spaced quantiles of the data, so each segment holds
    /// roughly the same number of observations.
    Quantile,
}

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Spline degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error("Knots must be finite and strictly increasing; knot {index} ({value}) breaks the order.")]
    UnorderedKnots { index: usize, value: f64 },

    #[error("Knot placement needs at least one finite data point.")]
    EmptyData,

    #[error("Cannot place {num_knots} distinct knots from only {num_points} data points.")]
    InsufficientDataForKnots { num_knots: usize, num_points: usize },
}

/// Truncated-power spline basis of degree `K` with interior knots
/// `k_1 < ... < k_L`.
///
/// Columns are `1, x, ..., x^(K-1)` followed by `(x - k_l)_+^K` for each
/// knot, so the width is `K + L`. With no knots the basis is a plain
/// polynomial of degree `K - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncatedPowerBasis {
    degree: usize,
    knots: Array1<f64>,
}

impl TruncatedPowerBasis {
    pub fn new(degree: usize, knots: ArrayView1<f64>) -> Result<Self, BasisError> {
        if degree < 1 {
            return Err(BasisError::InvalidDegree(degree));
        }
        if let Some((index, &value)) = knots.iter().enumerate().find(|(_, k)| !k.is_finite()) {
            return Err(BasisError::UnorderedKnots { index, value });
        }
        if let Some((index, (_, &value))) = knots
            .iter()
            .tuple_windows()
            .enumerate()
            .find(|(_, (a, b))| !(a < b))
        {
            return Err(BasisError::UnorderedKnots {
                index: index + 1,
                value,
            });
        }
        Ok(Self {
            degree,
            knots: knots.to_owned(),
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> ArrayView1<'_, f64> {
        self.knots.view()
    }

    pub fn num_columns(&self) -> usize {
        self.degree + self.knots.len()
    }

    /// Basis values at a single point.
    pub fn row(&self, x: f64) -> Array1<f64> {
        let mut values = Array1::zeros(self.num_columns());
        let mut power = 1.0;
        for j in 0..self.degree {
            values[j] = power;
            power *= x;
        }
        for (l, &knot) in self.knots.iter().enumerate() {
            let excess = x - knot;
            values[self.degree + l] = if excess > 0.0 {
                excess.powi(self.degree as i32)
            } else {
                0.0
            };
        }
        values
    }

    /// Design matrix with one row per observation.
    pub fn design(&self, x: ArrayView1<f64>) -> Array2<f64> {
        let mut matrix = Array2::zeros((x.len(), self.num_columns()));
        for (mut out, &xi) in matrix.rows_mut().into_iter().zip(x.iter()) {
            out.assign(&self.row(xi));
        }
        matrix
    }
}

/// Places `num_knots` interior knots for `data`.
///
/// Knots never coincide with the data minimum or maximum. Repeated
/// quantiles (heavily tied data) are rejected since the basis needs strictly
/// increasing knots.
pub fn place_knots(
    data: ArrayView1<f64>,
    num_knots: usize,
    strategy: KnotStrategy,
) -> Result<Array1<f64>, BasisError> {
    if num_knots == 0 {
        return Ok(Array1::from_vec(vec![]));
    }
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    let (min_val, max_val) = match finite.iter().copied().minmax() {
        MinMaxResult::NoElements => return Err(BasisError::EmptyData),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };

    let knots = match strategy {
        KnotStrategy::Uniform => {
            let h = (max_val - min_val) / (num_knots as f64 + 1.0);
            Array::from_iter((1..=num_knots).map(|i| min_val + i as f64 * h))
        }
        KnotStrategy::Quantile => internal::quantiles(finite, num_knots),
    };

    let distinct = knots.iter().tuple_windows().all(|(a, b)| a < b);
    if !distinct || !(min_val < max_val) {
        return Err(BasisError::InsufficientDataForKnots {
            num_knots,
            num_points: data.len(),
        });
    }
    Ok(knots)
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    /// Quantiles at `k / (count + 1)` with linear interpolation (type 7 in R).
    pub(super) fn quantiles(mut sorted_data: Vec<f64>, count: usize) -> Array1<f64> {
        sorted_data.sort_unstable_by(|a, b| a.total_cmp(b));

        let n = sorted_data.len();
        (1..=count)
            .map(|k| {
                let p = k as f64 / (count as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;

                if lower_idx == upper_idx {
                    sorted_data[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted_data[lower_idx] * (1.0 - fraction) + sorted_data[upper_idx] * fraction
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_row_layout() {
        let basis = TruncatedPowerBasis::new(3, array![0.0, 1.0].view()).unwrap();
        assert_eq!(basis.num_columns(), 5);
        // 1, x, x^2, (x - 0)_+^3, (x - 1)_+^3
        assert_eq!(basis.row(2.0), array![1.0, 2.0, 4.0, 8.0, 1.0]);
        assert_eq!(basis.row(0.5), array![1.0, 0.5, 0.25, 0.125, 0.0]);
        assert_eq!(basis.row(-1.0), array![1.0, -1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_no_knots_is_polynomial() {
        let basis = TruncatedPowerBasis::new(2, array![].view()).unwrap();
        let design = basis.design(array![0.0, 1.0, 3.0].view());
        assert_eq!(design, array![[1.0, 0.0], [1.0, 1.0], [1.0, 3.0]]);
    }

    #[test]
    fn test_knot_at_point_is_zero() {
        let basis = TruncatedPowerBasis::new(1, array![2.0].view()).unwrap();
        assert_eq!(basis.row(2.0), array![1.0, 0.0]);
        assert_eq!(basis.row(3.5), array![1.0, 1.5]);
    }

    #[test]
    fn test_knot_generation_uniform() {
        let data = array![0.0, 3.0, 10.0, 7.0];
        let knots = place_knots(data.view(), 3, KnotStrategy::Uniform).unwrap();
        assert_eq!(knots, array![2.5, 5.0, 7.5]);
    }

    #[test]
    fn test_knot_generation_quantile() {
        let data = array![10., 1., 2., 5., 8., 9., 0.]; // 7 points, unsorted
        let knots = place_knots(data.view(), 3, KnotStrategy::Quantile).unwrap();
        // p=0.25 -> idx=1.5 -> (1+2)/2, p=0.5 -> idx=3 -> 5, p=0.75 -> idx=4.5 -> (8+9)/2
        assert_eq!(knots, array![1.5, 5.0, 8.5]);
    }

    #[test]
    fn test_error_conditions() {
        match TruncatedPowerBasis::new(0, array![].view()).unwrap_err() {
            BasisError::InvalidDegree(deg) => assert_eq!(deg, 0),
            other => panic!("Expected InvalidDegree error, got {other:?}"),
        }

        match TruncatedPowerBasis::new(2, array![0.0, 1.0, 1.0].view()).unwrap_err() {
            BasisError::UnorderedKnots { index, value } => {
                assert_eq!(index, 2);
                assert_eq!(value, 1.0);
            }
            other => panic!("Expected UnorderedKnots error, got {other:?}"),
        }

        assert!(TruncatedPowerBasis::new(2, array![0.0, f64::NAN].view()).is_err());

        match place_knots(array![f64::NAN].view(), 2, KnotStrategy::Uniform).unwrap_err() {
            BasisError::EmptyData => {}
            other => panic!("Expected EmptyData error, got {other:?}"),
        }

        match place_knots(array![1.0, 1.0, 1.0, 2.0].view(), 2, KnotStrategy::Quantile)
            .unwrap_err()
        {
            BasisError::InsufficientDataForKnots {
                num_knots,
                num_points,
            } => {
                assert_eq!(num_knots, 2);
                assert_eq!(num_points, 4);
            }
            other => panic!("Expected InsufficientDataForKnots error, got {other:?}"),
        }
    }
}
