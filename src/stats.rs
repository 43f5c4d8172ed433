//! Statistical primitives over periodic return series.
//!
//! All functions are pure and operate on chronologically ordered fractional
//! returns (0.01 = +1%). Variance-based statistics need at least two
//! observations and fail with [`RiskError::InsufficientData`] otherwise.

use crate::error::{RiskError, Result, require_observations};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Trading periods per year for daily data
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Default confidence level for historical VaR and CVaR
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Absorbs representation error in `(1 - confidence) * n`, e.g. (1 - 0.9) * 10 = 0.999...
const TAIL_INDEX_EPSILON: f64 = 1e-9;

/// Historical tail-risk estimate with sample-size metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailRiskEstimate {
    /// Loss expressed as a positive fraction
    pub value: f64,
    pub confidence: f64,
    /// Position of the VaR observation in the ascending sort
    pub tail_index: usize,
    pub sample_size: usize,
    /// The sample holds less than one full tail observation
    pub low_confidence: bool,
}

/// Arithmetic mean of the series
pub fn mean(returns: &[f64]) -> Result<f64> {
    require_observations(returns.len(), 1)?;
    Ok(returns.mean())
}

/// Sample standard deviation (n - 1 divisor)
pub fn sample_std_dev(returns: &[f64]) -> Result<f64> {
    require_observations(returns.len(), 2)?;
    Ok(returns.std_dev())
}

/// Volatility of a return series using the sample standard deviation.
///
/// When `annualize` is set the result is scaled by √252.
pub fn volatility(returns: &[f64], annualize: bool) -> Result<f64> {
    if annualize {
        annualized_volatility(returns, TRADING_DAYS_PER_YEAR)
    } else {
        sample_std_dev(returns)
    }
}

/// Sample volatility scaled by `√periods_per_year`
pub fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> Result<f64> {
    Ok(sample_std_dev(returns)? * periods_per_year.sqrt())
}

fn validate_confidence(confidence: f64) -> Result<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(RiskError::InvalidInput(format!(
            "Confidence must be between 0 and 1 (exclusive), got {}",
            confidence
        )));
    }
    Ok(())
}

/// Index of the VaR observation in the ascending sort: ⌊(1 - c) · n⌋.
///
/// Shared by VaR and CVaR so both read the same tail boundary.
pub fn tail_index(sample_size: usize, confidence: f64) -> usize {
    let raw = ((1.0 - confidence) * sample_size as f64 + TAIL_INDEX_EPSILON).floor() as usize;
    raw.min(sample_size.saturating_sub(1))
}

fn sorted_ascending(returns: &[f64]) -> Vec<f64> {
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn is_low_confidence(sample_size: usize, confidence: f64) -> bool {
    let needed = (1.0 / (1.0 - confidence) - TAIL_INDEX_EPSILON).ceil();
    (sample_size as f64) < needed
}

/// Historical Value at Risk with sample-size metadata.
///
/// Defined for a single observation; small samples are flagged with
/// `low_confidence` rather than rejected.
pub fn value_at_risk_estimate(returns: &[f64], confidence: f64) -> Result<TailRiskEstimate> {
    require_observations(returns.len(), 1)?;
    validate_confidence(confidence)?;

    let sorted = sorted_ascending(returns);
    let index = tail_index(sorted.len(), confidence);

    Ok(TailRiskEstimate {
        value: -sorted[index],
        confidence,
        tail_index: index,
        sample_size: sorted.len(),
        low_confidence: is_low_confidence(sorted.len(), confidence),
    })
}

/// Historical Value at Risk as a positive loss fraction
pub fn value_at_risk(returns: &[f64], confidence: f64) -> Result<f64> {
    Ok(value_at_risk_estimate(returns, confidence)?.value)
}

/// Expected shortfall: mean of the worst `tail_index + 1` returns, negated
pub fn conditional_var_estimate(returns: &[f64], confidence: f64) -> Result<TailRiskEstimate> {
    require_observations(returns.len(), 1)?;
    validate_confidence(confidence)?;

    let sorted = sorted_ascending(returns);
    let index = tail_index(sorted.len(), confidence);
    let tail = &sorted[..=index];
    let tail_mean = tail.iter().sum::<f64>() / tail.len() as f64;

    Ok(TailRiskEstimate {
        value: -tail_mean,
        confidence,
        tail_index: index,
        sample_size: sorted.len(),
        low_confidence: is_low_confidence(sorted.len(), confidence),
    })
}

/// Conditional VaR (expected shortfall) as a positive loss fraction
pub fn conditional_var(returns: &[f64], confidence: f64) -> Result<f64> {
    Ok(conditional_var_estimate(returns, confidence)?.value)
}

// NOTE: skewness and kurtosis standardise with the population (n divisor)
// standard deviation while volatility uses the sample (n - 1) one. Reported
// figures are compared against these exact values; keep the population form.
fn standardized_moment(returns: &[f64], order: i32) -> Result<f64> {
    require_observations(returns.len(), 2)?;

    let mean = returns.mean();
    let std_dev = returns.population_std_dev();
    if std_dev == 0.0 {
        return Ok(0.0);
    }

    let n = returns.len() as f64;
    let moment = returns
        .iter()
        .map(|r| ((r - mean) / std_dev).powi(order))
        .sum::<f64>()
        / n;
    Ok(moment)
}

/// Third standardized moment (population standard deviation)
pub fn skewness(returns: &[f64]) -> Result<f64> {
    standardized_moment(returns, 3)
}

/// Fourth standardized moment minus 3 (population standard deviation)
pub fn excess_kurtosis(returns: &[f64]) -> Result<f64> {
    let kurtosis = standardized_moment(returns, 4)?;
    if kurtosis == 0.0 {
        // constant series
        return Ok(0.0);
    }
    Ok(kurtosis - 3.0)
}

/// Largest peak-to-trough decline of a cumulative wealth series, in [0, 1]
pub fn max_drawdown(cumulative: &[f64]) -> Result<f64> {
    require_observations(cumulative.len(), 1)?;

    let mut peak = cumulative[0];
    let mut max_dd: f64 = 0.0;

    for &value in cumulative {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            max_dd = max_dd.max(drawdown);
        }
    }

    Ok(max_dd.clamp(0.0, 1.0))
}

/// Wealth path starting at 1.0 and compounding each period return in order
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
    let mut cumulative = Vec::with_capacity(returns.len() + 1);
    let mut wealth = 1.0;
    cumulative.push(wealth);
    for &r in returns {
        wealth *= 1.0 + r;
        cumulative.push(wealth);
    }
    cumulative
}

/// Compounded return over the whole series
pub fn total_return(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |wealth, r| wealth * (1.0 + r)) - 1.0
}

/// Geometric annualisation of the mean period return: (1 + mean)^periods - 1
pub fn annualized_return(returns: &[f64], periods_per_year: f64) -> Result<f64> {
    let mean = mean(returns)?;
    Ok((1.0 + mean).powf(periods_per_year) - 1.0)
}

/// Simple period-over-period returns from a price history
pub fn returns_from_prices(prices: &[f64]) -> Result<Vec<f64>> {
    require_observations(prices.len(), 2)?;

    if let Some(bad) = prices.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
        return Err(RiskError::InvalidInput(format!(
            "Prices must be positive and finite, got {}",
            bad
        )));
    }

    Ok(prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect())
}
