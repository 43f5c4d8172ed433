//! Mean-variance optimization: portfolio return/risk, constrained
//! minimum-variance weights, efficient frontier and risk attribution.

mod qp;

use crate::config::OptimizerConfig;
use crate::covariance::{self, CovarianceMatrix};
use crate::error::{RiskError, Result};
use log::{debug, info};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use qp::{QuadraticProgram, SolverSettings};

/// Per-asset weight bounds and an optional target return
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConstraints {
    /// Defaults to 0 for every asset
    #[serde(default)]
    pub min_weights: Option<Vec<f64>>,
    /// Defaults to 1 for every asset
    #[serde(default)]
    pub max_weights: Option<Vec<f64>>,
    #[serde(default)]
    pub target_return: Option<f64>,
}

impl OptimizationConstraints {
    pub fn long_only() -> Self {
        Self::default()
    }

    pub fn with_bounds(mut self, min_weights: Vec<f64>, max_weights: Vec<f64>) -> Self {
        self.min_weights = Some(min_weights);
        self.max_weights = Some(max_weights);
        self
    }

    pub fn with_target_return(mut self, target_return: f64) -> Self {
        self.target_return = Some(target_return);
        self
    }

    /// Tighten the bounds so that no weight moves more than `max_shift` away from `current`
    pub fn with_turnover_band(self, current: &[f64], max_shift: f64) -> Result<Self> {
        if !(max_shift >= 0.0) {
            return Err(RiskError::InvalidInput(format!(
                "Turnover band must be non-negative, got {}",
                max_shift
            )));
        }

        let (lower, upper) = self.bounds(current.len())?;
        let min_weights = lower
            .iter()
            .zip(current.iter())
            .map(|(l, w)| l.max(w - max_shift))
            .collect();
        let max_weights = upper
            .iter()
            .zip(current.iter())
            .map(|(u, w)| u.min(w + max_shift))
            .collect();

        Ok(Self {
            min_weights: Some(min_weights),
            max_weights: Some(max_weights),
            target_return: self.target_return,
        })
    }

    /// Resolved lower and upper bounds for `num_assets` assets
    pub fn bounds(&self, num_assets: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        let resolve = |bounds: &Option<Vec<f64>>, fallback: f64| -> Result<Vec<f64>> {
            match bounds {
                Some(values) if values.len() != num_assets => Err(RiskError::LengthMismatch {
                    left: values.len(),
                    right: num_assets,
                }),
                Some(values) => {
                    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                        return Err(RiskError::InvalidInput(format!(
                            "Weight bounds must be finite, got {}",
                            bad
                        )));
                    }
                    Ok(values.clone())
                }
                None => Ok(vec![fallback; num_assets]),
            }
        };

        Ok((resolve(&self.min_weights, 0.0)?, resolve(&self.max_weights, 1.0)?))
    }
}

/// Expected returns, covariance and constraints for one optimization problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationInputs {
    pub expected_returns: Vec<f64>,
    pub covariance: CovarianceMatrix,
    #[serde(default)]
    pub constraints: OptimizationConstraints,
}

impl OptimizationInputs {
    /// Sample means and covariance from a period × asset return matrix
    pub fn from_historical(
        historical: &Array2<f64>,
        constraints: OptimizationConstraints,
    ) -> Result<Self> {
        Ok(Self {
            expected_returns: covariance::expected_returns(historical)?,
            covariance: covariance::covariance_matrix(historical)?,
            constraints,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub expected_risk: f64,
    /// expected_return / expected_risk, 0 for a riskless portfolio
    pub sharpe_ratio: f64,
}

/// Risk contribution of a single asset to total portfolio risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContribution {
    pub asset: usize,
    pub weight: f64,
    pub volatility: f64,
    /// ∂σ/∂w, marginal contribution to portfolio risk
    pub marginal_risk: f64,
    /// Fraction of total risk; contributions sum to 1
    pub risk_contribution: f64,
}

/// Portfolio-level risk attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAttribution {
    pub portfolio_risk: f64,
    pub contributions: Vec<RiskContribution>,
    /// Weighted average volatility / portfolio volatility
    pub diversification_ratio: f64,
    /// Normalized HHI of risk contributions (0 = equal, 1 = fully concentrated)
    pub concentration_score: f64,
    pub largest_contributor: Option<usize>,
}

/// w · μ
pub fn portfolio_return(weights: &[f64], expected_returns: &[f64]) -> Result<f64> {
    if weights.len() != expected_returns.len() {
        return Err(RiskError::LengthMismatch {
            left: weights.len(),
            right: expected_returns.len(),
        });
    }
    Ok(weights
        .iter()
        .zip(expected_returns.iter())
        .map(|(w, r)| w * r)
        .sum())
}

/// √(wᵗ Σ w)
pub fn portfolio_risk(weights: &[f64], covariance: &CovarianceMatrix) -> Result<f64> {
    if weights.len() != covariance.num_assets() {
        return Err(RiskError::LengthMismatch {
            left: weights.len(),
            right: covariance.num_assets(),
        });
    }
    let variance = covariance.quadratic_form(ArrayView1::from(weights));
    Ok(variance.max(0.0).sqrt())
}

/// Marginal and percentage risk contributions per asset
pub fn risk_contributions(
    weights: &[f64],
    covariance: &CovarianceMatrix,
) -> Result<RiskAttribution> {
    let total_risk = portfolio_risk(weights, covariance)?;
    let sigma_w = covariance.times(ArrayView1::from(weights));

    let contributions: Vec<RiskContribution> = weights
        .iter()
        .enumerate()
        .map(|(asset, &weight)| {
            let marginal_risk = if total_risk > 0.0 {
                sigma_w[asset] / total_risk
            } else {
                0.0
            };
            let risk_contribution = if total_risk > 0.0 {
                weight * marginal_risk / total_risk
            } else {
                0.0
            };
            RiskContribution {
                asset,
                weight,
                volatility: covariance.variance(asset).sqrt(),
                marginal_risk,
                risk_contribution,
            }
        })
        .collect();

    let weighted_volatility: f64 = contributions.iter().map(|c| c.weight * c.volatility).sum();
    let diversification_ratio = if total_risk > 0.0 {
        weighted_volatility / total_risk
    } else {
        1.0
    };

    // Herfindahl-Hirschman index, rescaled from [1/n, 1] to [0, 1]
    let concentration_score = if contributions.len() < 2 || total_risk == 0.0 {
        0.0
    } else {
        let hhi: f64 = contributions
            .iter()
            .map(|c| c.risk_contribution * c.risk_contribution)
            .sum();
        let min_hhi = 1.0 / contributions.len() as f64;
        ((hhi - min_hhi) / (1.0 - min_hhi)).clamp(0.0, 1.0)
    };

    let largest_contributor = contributions
        .iter()
        .filter(|_| total_risk > 0.0)
        .max_by(|a, b| {
            a.risk_contribution
                .total_cmp(&b.risk_contribution)
                .then(b.asset.cmp(&a.asset))
        })
        .map(|c| c.asset);

    Ok(RiskAttribution {
        portfolio_risk: total_risk,
        contributions,
        diversification_ratio,
        concentration_score,
        largest_contributor,
    })
}

/// Frontier point with the highest (return - rf) / risk; ties keep the lower-risk point
pub fn max_sharpe_point(
    frontier: &[OptimizationResult],
    risk_free_rate: f64,
) -> Option<&OptimizationResult> {
    frontier
        .iter()
        .filter(|point| point.expected_risk > 0.0)
        .fold(None, |best: Option<(&OptimizationResult, f64)>, point| {
            let sharpe = (point.expected_return - risk_free_rate) / point.expected_risk;
            match best {
                Some((_, best_sharpe)) if sharpe <= best_sharpe => best,
                _ => Some((point, sharpe)),
            }
        })
        .map(|(point, _)| point)
}

#[derive(Debug, Clone, Default)]
pub struct MeanVarianceOptimizer {
    pub config: OptimizerConfig,
}

impl MeanVarianceOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    fn validate_inputs(expected_returns: &[f64], covariance: &CovarianceMatrix) -> Result<()> {
        if expected_returns.is_empty() {
            return Err(RiskError::InvalidInput(
                "At least one asset is required".to_string(),
            ));
        }
        if expected_returns.len() != covariance.num_assets() {
            return Err(RiskError::LengthMismatch {
                left: expected_returns.len(),
                right: covariance.num_assets(),
            });
        }
        if let Some(bad) = expected_returns.iter().find(|r| !r.is_finite()) {
            return Err(RiskError::InvalidInput(format!(
                "Expected returns must be finite, got {}",
                bad
            )));
        }
        Ok(())
    }

    fn evaluate(
        weights: Vec<f64>,
        expected_returns: &[f64],
        covariance: &CovarianceMatrix,
    ) -> Result<OptimizationResult> {
        let expected_return = portfolio_return(&weights, expected_returns)?;
        let expected_risk = portfolio_risk(&weights, covariance)?;
        let sharpe_ratio = if expected_risk > 0.0 {
            expected_return / expected_risk
        } else {
            0.0
        };

        Ok(OptimizationResult {
            weights,
            expected_return,
            expected_risk,
            sharpe_ratio,
        })
    }

    /// Minimum-variance weights under the constraints.
    ///
    /// With a target return the result achieves it exactly (within 1e-6);
    /// without one it is the global minimum-variance portfolio.
    pub fn optimize(
        &self,
        expected_returns: &[f64],
        covariance: &CovarianceMatrix,
        constraints: &OptimizationConstraints,
    ) -> Result<OptimizationResult> {
        Self::validate_inputs(expected_returns, covariance)?;
        let (lower, upper) = constraints.bounds(expected_returns.len())?;

        let problem = QuadraticProgram {
            covariance: covariance.as_array(),
            expected_returns,
            lower: &lower,
            upper: &upper,
            target_return: constraints.target_return,
        };
        let settings = SolverSettings {
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
        };

        let weights = qp::solve(&problem, &settings)?;
        let result = Self::evaluate(weights, expected_returns, covariance)?;

        debug!(
            "Optimized {} assets: return {:.6}, risk {:.6}",
            expected_returns.len(),
            result.expected_return,
            result.expected_risk
        );
        Ok(result)
    }

    /// Lowest and highest fully invested return the bounds allow
    pub fn feasible_return_range(
        &self,
        expected_returns: &[f64],
        constraints: &OptimizationConstraints,
    ) -> Result<(f64, f64)> {
        let (lower, upper) = constraints.bounds(expected_returns.len())?;
        qp::check_bounds(&lower, &upper)?;
        Ok(qp::return_range(expected_returns, &lower, &upper))
    }

    /// `num_points` frontier portfolios with targets spaced linearly from the
    /// minimum-variance return to the highest feasible return.
    ///
    /// Any target return in `inputs.constraints` is ignored.
    pub fn efficient_frontier(
        &self,
        inputs: &OptimizationInputs,
        num_points: usize,
    ) -> Result<Vec<OptimizationResult>> {
        if num_points == 0 {
            return Err(RiskError::InvalidInput(
                "Efficient frontier needs at least one point".to_string(),
            ));
        }

        let expected_returns = &inputs.expected_returns;
        let covariance = &inputs.covariance;
        let base = OptimizationConstraints {
            target_return: None,
            ..inputs.constraints.clone()
        };

        let min_variance = self.optimize(expected_returns, covariance, &base)?;
        if num_points == 1 {
            return Ok(vec![min_variance]);
        }

        let (min_return, max_return) = self.feasible_return_range(expected_returns, &base)?;
        let low = min_variance.expected_return.clamp(min_return, max_return);
        let step = (max_return - low) / (num_points - 1) as f64;

        let frontier = (0..num_points)
            .map(|k| {
                let target = if k == num_points - 1 {
                    max_return
                } else {
                    low + step * k as f64
                };
                self.optimize(
                    expected_returns,
                    covariance,
                    &base.clone().with_target_return(target),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Efficient frontier: {} points, return {:.4}..{:.4}",
            frontier.len(),
            low,
            max_return
        );
        Ok(frontier)
    }

    /// Frontier with the configured number of points
    pub fn default_frontier(&self, inputs: &OptimizationInputs) -> Result<Vec<OptimizationResult>> {
        self.efficient_frontier(inputs, self.config.frontier_points)
    }

    /// Highest-Sharpe point of the default frontier at the configured risk-free rate
    pub fn tangency_point(&self, inputs: &OptimizationInputs) -> Result<OptimizationResult> {
        let frontier = self.default_frontier(inputs)?;
        max_sharpe_point(&frontier, self.config.risk_free_rate)
            .cloned()
            .ok_or_else(|| {
                RiskError::InvalidInput("Every frontier point has zero risk".to_string())
            })
    }
}
