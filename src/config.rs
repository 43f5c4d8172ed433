use crate::portfolio::LiquidityTier;
use crate::rebalancing::{MaxCosts, RebalancingThresholds};
use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub rebalancing: RebalancingConfig,
    #[serde(default)]
    pub transaction_costs: TransactionCostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_var_confidence")]
    pub var_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_frontier_points")]
    pub frontier_points: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancingConfig {
    #[serde(default)]
    pub thresholds: RebalancingThresholds,
    #[serde(default = "default_max_optimal_trades")]
    pub max_optimal_trades: usize,
    #[serde(default = "default_allocation_tolerance")]
    pub allocation_tolerance: f64,
    #[serde(default = "default_class_trade_floor")]
    pub class_trade_floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCostConfig {
    #[serde(default = "default_market_impact_threshold")]
    pub market_impact_threshold: f64,
    #[serde(default = "default_market_impact_coefficient")]
    pub market_impact_coefficient: f64,
    #[serde(default = "default_liquidity_scores")]
    pub liquidity_scores: LiquidityScores,
}

/// Liquidity score (0-10) assigned to each tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityScores {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
    pub restricted: f64,
}

impl LiquidityScores {
    pub fn score(&self, tier: LiquidityTier) -> f64 {
        match tier {
            LiquidityTier::High => self.high,
            LiquidityTier::Medium => self.medium,
            LiquidityTier::Low => self.low,
            LiquidityTier::Restricted => self.restricted,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            periods_per_year: default_periods_per_year(),
            risk_free_rate: default_risk_free_rate(),
            var_confidence: default_var_confidence(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            frontier_points: default_frontier_points(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            risk_free_rate: default_risk_free_rate(),
        }
    }
}

impl Default for RebalancingConfig {
    fn default() -> Self {
        Self {
            thresholds: RebalancingThresholds::default(),
            max_optimal_trades: default_max_optimal_trades(),
            allocation_tolerance: default_allocation_tolerance(),
            class_trade_floor: default_class_trade_floor(),
        }
    }
}

impl Default for TransactionCostConfig {
    fn default() -> Self {
        Self {
            market_impact_threshold: default_market_impact_threshold(),
            market_impact_coefficient: default_market_impact_coefficient(),
            liquidity_scores: default_liquidity_scores(),
        }
    }
}

impl Default for RebalancingThresholds {
    fn default() -> Self {
        Self {
            deviation_percent: default_deviation_percent(),
            min_trade_size: default_min_trade_size(),
            max_costs: MaxCosts::Unlimited,
        }
    }
}

fn default_periods_per_year() -> f64 {
    252.0 // Trading days in a year
}

fn default_risk_free_rate() -> f64 {
    0.02 // 2% annual risk-free rate
}

fn default_var_confidence() -> f64 {
    0.95
}

fn default_frontier_points() -> usize {
    50
}

fn default_max_iterations() -> usize {
    500 // Interior-point iterations per optimization
}

fn default_tolerance() -> f64 {
    1e-8
}

fn default_max_optimal_trades() -> usize {
    10
}

fn default_allocation_tolerance() -> f64 {
    0.001 // 0.1 percentage points on user-facing target allocations
}

fn default_class_trade_floor() -> f64 {
    0.01 // Asset-class trades below 1% of portfolio value are dropped
}

pub(crate) fn default_deviation_percent() -> f64 {
    5.0 // 5 percentage points
}

pub(crate) fn default_min_trade_size() -> f64 {
    1000.0
}

fn default_market_impact_threshold() -> f64 {
    0.01 // Trades below 1% of portfolio value carry no impact
}

fn default_market_impact_coefficient() -> f64 {
    100.0
}

fn default_liquidity_scores() -> LiquidityScores {
    LiquidityScores {
        high: 10.0,
        medium: 7.0,
        low: 4.0,
        restricted: 1.0,
    }
}

impl EngineConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(config_str) => serde_json::from_str::<EngineConfig>(&config_str)
                .with_context(|| format!("Failed to parse config {}", path.display()))?,
            Err(e) => {
                warn!(
                    "Could not read config {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                EngineConfig::default()
            }
        };

        config.validate()?;
        info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.risk.periods_per_year <= 0.0 {
            return Err(anyhow!(
                "periods_per_year must be positive, got {}",
                self.risk.periods_per_year
            ));
        }
        if !(self.risk.var_confidence > 0.0 && self.risk.var_confidence < 1.0) {
            return Err(anyhow!(
                "var_confidence must be between 0 and 1, got {}",
                self.risk.var_confidence
            ));
        }
        if self.optimizer.max_iterations == 0 {
            return Err(anyhow!("optimizer max_iterations must be at least 1"));
        }
        if self.optimizer.tolerance <= 0.0 {
            return Err(anyhow!(
                "optimizer tolerance must be positive, got {}",
                self.optimizer.tolerance
            ));
        }

        let thresholds = &self.rebalancing.thresholds;
        if thresholds.deviation_percent < 0.0 || thresholds.min_trade_size < 0.0 {
            return Err(anyhow!(
                "Rebalancing thresholds cannot be negative: deviation {}, min trade size {}",
                thresholds.deviation_percent,
                thresholds.min_trade_size
            ));
        }
        match thresholds.max_costs {
            MaxCosts::Absolute(amount) if amount < 0.0 => {
                return Err(anyhow!("max_costs amount cannot be negative, got {}", amount));
            }
            MaxCosts::Rate(rate) if !(0.0..=1.0).contains(&rate) => {
                return Err(anyhow!("max_costs rate must be between 0 and 1, got {}", rate));
            }
            _ => {}
        }
        if !(0.0..0.05).contains(&self.rebalancing.allocation_tolerance) {
            return Err(anyhow!(
                "allocation_tolerance must be in [0, 0.05), got {}",
                self.rebalancing.allocation_tolerance
            ));
        }

        let scores = &self.transaction_costs.liquidity_scores;
        for score in [scores.high, scores.medium, scores.low, scores.restricted] {
            if !(0.0..=10.0).contains(&score) {
                return Err(anyhow!("Liquidity scores must be between 0 and 10, got {}", score));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk.periods_per_year, 252.0);
        assert_eq!(config.optimizer.frontier_points, 50);
        assert_eq!(config.rebalancing.max_optimal_trades, 10);
        assert_eq!(config.rebalancing.thresholds.max_costs, MaxCosts::Unlimited);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "risk": { "risk_free_rate": 0.03 }, "rebalancing": { "thresholds": { "deviation_percent": 2.5 } } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.risk.risk_free_rate, 0.03);
        assert_eq!(config.risk.var_confidence, 0.95);
        assert_eq!(config.rebalancing.thresholds.deviation_percent, 2.5);
        assert_eq!(config.rebalancing.thresholds.min_trade_size, 1000.0);
        assert_eq!(config.transaction_costs.liquidity_scores.high, 10.0);
    }

    #[test]
    fn test_max_costs_variants_parse() {
        let json = r#"{ "deviation_percent": 5.0, "min_trade_size": 500.0, "max_costs": { "absolute": 250.0 } }"#;
        let thresholds: RebalancingThresholds = serde_json::from_str(json).unwrap();
        assert_eq!(thresholds.max_costs, MaxCosts::Absolute(250.0));

        let json = r#"{ "max_costs": { "rate": 0.002 } }"#;
        let thresholds: RebalancingThresholds = serde_json::from_str(json).unwrap();
        assert_eq!(thresholds.max_costs, MaxCosts::Rate(0.002));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.risk.var_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rebalancing.thresholds.max_costs = MaxCosts::Rate(2.0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.transaction_costs.liquidity_scores.low = 11.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = EngineConfig::load_from_file("/nonexistent/engine-config.json").unwrap();
        assert_eq!(config.risk.risk_free_rate, 0.02);
    }
}
