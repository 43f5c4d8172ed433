//! Covariance estimation from a period × asset matrix of historical returns.

use crate::error::{RiskError, Result, require_observations};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Square, symmetric covariance matrix over N assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix(Array2<f64>);

impl CovarianceMatrix {
    /// Wrap a matrix after checking it is square, symmetric and has non-negative variances
    pub fn new(matrix: Array2<f64>) -> Result<Self> {
        let (rows, cols) = matrix.dim();
        if rows != cols {
            return Err(RiskError::InvalidInput(format!(
                "Covariance matrix must be square, got {}x{}",
                rows, cols
            )));
        }
        if rows == 0 {
            return Err(RiskError::InvalidInput(
                "Covariance matrix must cover at least one asset".to_string(),
            ));
        }

        for i in 0..rows {
            let variance = matrix[[i, i]];
            if !(variance.is_finite() && variance >= 0.0) {
                return Err(RiskError::InvalidInput(format!(
                    "Variance of asset {} must be non-negative, got {}",
                    i, variance
                )));
            }
            for j in (i + 1)..cols {
                let (upper, lower) = (matrix[[i, j]], matrix[[j, i]]);
                let scale = 1.0 + upper.abs().max(lower.abs());
                if !upper.is_finite() || (upper - lower).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(RiskError::InvalidInput(format!(
                        "Covariance matrix is not symmetric at ({}, {}): {} vs {}",
                        i, j, upper, lower
                    )));
                }
            }
        }

        Ok(Self(matrix))
    }

    /// Build from nested rows, e.g. deserialized input
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        let mut matrix = Array2::zeros((n, n));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(RiskError::InvalidInput(format!(
                    "Covariance row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    n
                )));
            }
            for (j, value) in row.iter().enumerate() {
                matrix[[i, j]] = *value;
            }
        }
        Self::new(matrix)
    }

    /// Sample covariance from N per-asset return series of equal length
    pub fn from_series(series: &[Vec<f64>]) -> Result<Self> {
        covariance_matrix(&stack_series(series)?)
    }

    pub fn num_assets(&self) -> usize {
        self.0.nrows()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.0
    }

    pub fn variance(&self, asset: usize) -> f64 {
        self.0[[asset, asset]]
    }

    /// Σ · w
    pub fn times(&self, weights: ArrayView1<f64>) -> Array1<f64> {
        self.0.dot(&weights)
    }

    /// wᵗ · Σ · w
    pub fn quadratic_form(&self, weights: ArrayView1<f64>) -> f64 {
        weights.dot(&self.times(weights))
    }

    /// Same matrix with assets reordered so that new asset `k` is old asset `order[k]`
    pub fn permuted(&self, order: &[usize]) -> Result<Self> {
        let n = self.num_assets();
        let mut seen = vec![false; n];
        for &idx in order {
            if idx >= n || seen[idx] {
                return Err(RiskError::InvalidInput(format!(
                    "Not a permutation of {} assets: {:?}",
                    n, order
                )));
            }
            seen[idx] = true;
        }
        if order.len() != n {
            return Err(RiskError::LengthMismatch {
                left: order.len(),
                right: n,
            });
        }

        let matrix = Array2::from_shape_fn((n, n), |(i, j)| self.0[[order[i], order[j]]]);
        Ok(Self(matrix))
    }
}

/// Stack per-asset series into a period × asset matrix
pub fn stack_series(series: &[Vec<f64>]) -> Result<Array2<f64>> {
    let num_assets = series.len();
    if num_assets == 0 {
        return Err(RiskError::InvalidInput(
            "At least one return series is required".to_string(),
        ));
    }

    let periods = series[0].len();
    for s in series.iter().skip(1) {
        if s.len() != periods {
            return Err(RiskError::LengthMismatch {
                left: periods,
                right: s.len(),
            });
        }
    }

    Ok(Array2::from_shape_fn((periods, num_assets), |(t, a)| {
        series[a][t]
    }))
}

/// Sample mean per asset (column) of a period × asset return matrix
pub fn expected_returns(historical: &Array2<f64>) -> Result<Vec<f64>> {
    require_observations(historical.nrows(), 1)?;
    if historical.ncols() == 0 {
        return Err(RiskError::InvalidInput(
            "Historical returns cover no assets".to_string(),
        ));
    }

    historical
        .mean_axis(Axis(0))
        .map(|means| means.to_vec())
        .ok_or(RiskError::InsufficientData {
            required: 1,
            actual: 0,
        })
}

/// Sample covariance (n - 1 divisor) of a period × asset return matrix
pub fn covariance_matrix(historical: &Array2<f64>) -> Result<CovarianceMatrix> {
    let periods = historical.nrows();
    require_observations(periods, 2)?;

    let means = Array1::from(expected_returns(historical)?);
    let centered = historical - &means;
    let covariance = centered.t().dot(&centered) / (periods as f64 - 1.0);

    // force exact symmetry
    let n = covariance.nrows();
    let symmetric = Array2::from_shape_fn((n, n), |(i, j)| {
        if i <= j {
            covariance[[i, j]]
        } else {
            covariance[[j, i]]
        }
    });

    CovarianceMatrix::new(symmetric)
}

/// Pearson correlation matrix of a period × asset return matrix.
///
/// Assets with zero variance correlate 0 with everything but themselves.
pub fn correlation_matrix(historical: &Array2<f64>) -> Result<Array2<f64>> {
    let covariance = covariance_matrix(historical)?;
    let cov = covariance.as_array();
    let n = cov.nrows();

    Ok(Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            return 1.0;
        }
        let denom = (cov[[i, i]] * cov[[j, j]]).sqrt();
        if denom > 0.0 { cov[[i, j]] / denom } else { 0.0 }
    }))
}
