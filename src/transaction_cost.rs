use crate::config::TransactionCostConfig;
use crate::error::{RiskError, Result};
use crate::portfolio::{LiquidityTier, Position};

/// Upper end of the liquidity and market impact scales
pub const MAX_SCORE: f64 = 10.0;

pub struct TransactionCostCalculator {
    config: TransactionCostConfig,
}

impl TransactionCostCalculator {
    pub fn new(config: TransactionCostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransactionCostConfig {
        &self.config
    }

    /// |trade amount| × the position's own cost rate
    pub fn estimated_cost(&self, position: &Position, trade_amount: f64) -> f64 {
        trade_amount.abs() * position.trading_cost_rate
    }

    /// Buying and selling the same amount
    pub fn round_trip_cost(&self, position: &Position, trade_amount: f64) -> f64 {
        self.estimated_cost(position, trade_amount) * 2.0
    }

    /// 0-10, higher trades more easily
    pub fn liquidity_score(&self, tier: LiquidityTier) -> f64 {
        self.config.liquidity_scores.score(tier).clamp(0.0, MAX_SCORE)
    }

    /// 0-10 estimate of the price effect of a trade.
    ///
    /// Trades up to `market_impact_threshold` of portfolio value score 0. Above
    /// it the excess fraction is scaled by `market_impact_coefficient` and by an
    /// illiquidity multiplier between 1 (score 10) and 2 (score 0).
    pub fn market_impact_score(
        &self,
        trade_amount: f64,
        total_value: f64,
        tier: LiquidityTier,
    ) -> Result<f64> {
        if !(total_value.is_finite() && total_value > 0.0) {
            return Err(RiskError::InvalidInput(format!(
                "Total portfolio value must be positive, got {}",
                total_value
            )));
        }

        let trade_fraction = trade_amount.abs() / total_value;
        if trade_fraction <= self.config.market_impact_threshold {
            return Ok(0.0);
        }

        let excess_fraction = trade_fraction - self.config.market_impact_threshold;
        let illiquidity = 2.0 - self.liquidity_score(tier) / MAX_SCORE;
        let score = excess_fraction * self.config.market_impact_coefficient * illiquidity;

        Ok(score.min(MAX_SCORE))
    }
}
