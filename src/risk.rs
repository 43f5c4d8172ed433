use crate::config::RiskConfig;
use crate::error::{RiskError, Result, require_observations, require_same_length};
use crate::stats;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Risk report for one return series, optionally against a market and a benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub observations: usize,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub beta: f64,
    pub alpha: f64,
    pub max_drawdown: f64,
    pub value_at_risk: f64,
    pub conditional_var: f64,
    pub var_confidence: f64,
    pub var_low_confidence: bool,
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub information_ratio: f64,
    pub annualized_return: f64,
    pub total_return: f64,
}

/// Composes the return-series primitives into portfolio-level risk metrics
#[derive(Debug, Clone, Default)]
pub struct RiskMetricsEngine {
    pub config: RiskConfig,
}

/// Population covariance of two equal-length series
fn population_covariance(a: &[f64], b: &[f64]) -> f64 {
    let mean_a = a.mean();
    let mean_b = b.mean();
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / a.len() as f64
}

impl RiskMetricsEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Covariance(returns, market) / Variance(market), population moments
    pub fn beta(&self, returns: &[f64], market_returns: &[f64]) -> Result<f64> {
        require_same_length(returns, market_returns)?;
        require_observations(returns.len(), 2)?;

        let market_variance = market_returns.population_variance();
        if market_variance == 0.0 {
            return Err(RiskError::ZeroVariance("market returns"));
        }

        Ok(population_covariance(returns, market_returns) / market_variance)
    }

    /// Annualized return in excess of the CAPM-implied return
    pub fn alpha(
        &self,
        returns: &[f64],
        market_returns: &[f64],
        risk_free_rate: f64,
    ) -> Result<f64> {
        let beta = self.beta(returns, market_returns)?;
        let periods = self.config.periods_per_year;

        let portfolio_return = stats::annualized_return(returns, periods)?;
        let market_return = stats::annualized_return(market_returns, periods)?;
        let capm_return = risk_free_rate + beta * (market_return - risk_free_rate);

        Ok(portfolio_return - capm_return)
    }

    /// Annualized mean excess return over annualized volatility of excess returns.
    ///
    /// A series without dispersion has a Sharpe ratio of 0.
    pub fn sharpe_ratio(&self, returns: &[f64], risk_free_rate: f64) -> Result<f64> {
        require_observations(returns.len(), 2)?;

        let periods = self.config.periods_per_year;
        let period_rf_rate = risk_free_rate / periods;
        let excess: Vec<f64> = returns.iter().map(|r| r - period_rf_rate).collect();

        let std_dev = (&excess).std_dev();
        if std_dev == 0.0 {
            return Ok(0.0);
        }

        Ok((&excess).mean() / std_dev * periods.sqrt())
    }

    /// Annualized mean active return over annualized tracking error
    pub fn information_ratio(&self, returns: &[f64], benchmark_returns: &[f64]) -> Result<f64> {
        require_same_length(returns, benchmark_returns)?;
        require_observations(returns.len(), 2)?;

        let active_returns: Vec<f64> = returns
            .iter()
            .zip(benchmark_returns.iter())
            .map(|(r, b)| r - b)
            .collect();

        let tracking_error = (&active_returns).std_dev();
        if tracking_error == 0.0 {
            return Ok(0.0);
        }

        let periods = self.config.periods_per_year;
        Ok((&active_returns).mean() * periods / (tracking_error * periods.sqrt()))
    }

    /// Pearson correlation of two equal-length series
    pub fn correlation(&self, a: &[f64], b: &[f64]) -> Result<f64> {
        require_same_length(a, b)?;
        require_observations(a.len(), 2)?;

        let std_a = a.population_std_dev();
        let std_b = b.population_std_dev();
        if std_a == 0.0 || std_b == 0.0 {
            return Ok(0.0);
        }

        Ok(population_covariance(a, b) / (std_a * std_b))
    }

    /// Full risk report computed once from `returns`.
    ///
    /// Without a market series beta defaults to 1 and alpha to 0; without a
    /// benchmark the information ratio is 0.
    pub fn compute_all(
        &self,
        returns: &[f64],
        market_returns: Option<&[f64]>,
        benchmark_returns: Option<&[f64]>,
        risk_free_rate: f64,
    ) -> Result<RiskReport> {
        require_observations(returns.len(), 2)?;

        let periods = self.config.periods_per_year;
        let confidence = self.config.var_confidence;

        let volatility = stats::annualized_volatility(returns, periods)?;
        let sharpe_ratio = self.sharpe_ratio(returns, risk_free_rate)?;

        let (beta, alpha) = match market_returns {
            Some(market) => (
                self.beta(returns, market)?,
                self.alpha(returns, market, risk_free_rate)?,
            ),
            None => (1.0, 0.0),
        };

        let information_ratio = match benchmark_returns {
            Some(benchmark) => self.information_ratio(returns, benchmark)?,
            None => 0.0,
        };

        let cumulative = stats::cumulative_returns(returns);
        let max_drawdown = stats::max_drawdown(&cumulative)?;

        let var = stats::value_at_risk_estimate(returns, confidence)?;
        let cvar = stats::conditional_var_estimate(returns, confidence)?;
        if var.low_confidence {
            warn!(
                "VaR at {:.0}% from {} observations is low confidence",
                confidence * 100.0,
                returns.len()
            );
        }

        let report = RiskReport {
            observations: returns.len(),
            volatility,
            sharpe_ratio,
            beta,
            alpha,
            max_drawdown,
            value_at_risk: var.value,
            conditional_var: cvar.value,
            var_confidence: confidence,
            var_low_confidence: var.low_confidence,
            skewness: stats::skewness(returns)?,
            excess_kurtosis: stats::excess_kurtosis(returns)?,
            information_ratio,
            annualized_return: stats::annualized_return(returns, periods)?,
            total_return: stats::total_return(returns),
        };

        debug!(
            "Risk report: vol {:.4}, sharpe {:.3}, beta {:.3}, max dd {:.2}%",
            report.volatility,
            report.sharpe_ratio,
            report.beta,
            report.max_drawdown * 100.0
        );

        Ok(report)
    }
}
