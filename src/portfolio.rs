use crate::error::{RiskError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const WEIGHT_EPSILON: f64 = 1e-9;
/// Slack on Σ target weights, matching optimizer output precision
const TARGET_SUM_EPSILON: f64 = 1e-6;
/// Default bound on |current_weight - current_value / total_value|, 0.1 percentage points
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 0.001;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityTier {
    High,
    #[default]
    Medium,
    Low,
    Restricted,
}

/// One holding as supplied by the portfolio snapshot; read-only to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub current_value: f64,
    pub current_weight: f64,
    pub target_weight: f64,
    pub asset_class: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub liquidity_tier: LiquidityTier,
    /// Cost per unit of traded value, e.g. 0.001 = 10 bp
    #[serde(default)]
    pub trading_cost_rate: f64,
    #[serde(default)]
    pub min_trade_size: f64,
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl Position {
    pub fn new(
        id: impl Into<String>,
        current_value: f64,
        current_weight: f64,
        target_weight: f64,
        asset_class: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            current_value,
            current_weight,
            target_weight,
            asset_class: asset_class.into(),
            currency: default_currency(),
            liquidity_tier: LiquidityTier::default(),
            trading_cost_rate: 0.0,
            min_trade_size: 0.0,
        }
    }

    pub fn with_liquidity(mut self, tier: LiquidityTier) -> Self {
        self.liquidity_tier = tier;
        self
    }

    pub fn with_trading_cost_rate(mut self, rate: f64) -> Self {
        self.trading_cost_rate = rate;
        self
    }

    pub fn with_min_trade_size(mut self, size: f64) -> Self {
        self.min_trade_size = size;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// (target - current) weight in percentage points
    pub fn deviation_percent(&self) -> f64 {
        (self.target_weight - self.current_weight) * 100.0
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            Err(RiskError::InvalidPosition {
                id: self.id.clone(),
                reason,
            })
        };

        if self.id.trim().is_empty() {
            return invalid("identifier is empty".to_string());
        }
        if !(self.current_value.is_finite() && self.current_value >= 0.0) {
            return invalid(format!("current value {} is negative", self.current_value));
        }
        for (name, weight) in [("current", self.current_weight), ("target", self.target_weight)] {
            if !(weight.is_finite() && (-WEIGHT_EPSILON..=1.0 + WEIGHT_EPSILON).contains(&weight)) {
                return invalid(format!("{} weight {} outside [0, 1]", name, weight));
            }
        }
        if !(self.trading_cost_rate.is_finite() && self.trading_cost_rate >= 0.0) {
            return invalid(format!("trading cost rate {} is negative", self.trading_cost_rate));
        }
        if !(self.min_trade_size.is_finite() && self.min_trade_size >= 0.0) {
            return invalid(format!("minimum trade size {} is negative", self.min_trade_size));
        }
        Ok(())
    }
}

/// Consistent set of positions and the portfolio value they belong to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    positions: Vec<Position>,
    total_value: f64,
    #[serde(skip)]
    weight_tolerance: f64,
}

impl PortfolioSnapshot {
    /// Validates every position; a single malformed record fails the whole snapshot
    pub fn new(positions: Vec<Position>, total_value: f64) -> Result<Self> {
        Self::with_weight_tolerance(positions, total_value, DEFAULT_WEIGHT_TOLERANCE)
    }

    /// Like `new`, with each current weight allowed to differ from
    /// current_value / total_value by at most `weight_tolerance`
    pub fn with_weight_tolerance(
        positions: Vec<Position>,
        total_value: f64,
        weight_tolerance: f64,
    ) -> Result<Self> {
        if !(weight_tolerance.is_finite() && weight_tolerance >= 0.0) {
            return Err(RiskError::InvalidInput(format!(
                "Weight tolerance must be non-negative, got {}",
                weight_tolerance
            )));
        }
        if !(total_value.is_finite() && total_value > 0.0) {
            return Err(RiskError::InvalidInput(format!(
                "Total portfolio value must be positive, got {}",
                total_value
            )));
        }

        let mut seen = BTreeSet::new();
        for position in &positions {
            position.validate()?;
            if !seen.insert(position.id.as_str()) {
                return Err(RiskError::InvalidPosition {
                    id: position.id.clone(),
                    reason: "duplicate identifier".to_string(),
                });
            }

            let implied = position.current_value / total_value;
            if (position.current_weight - implied).abs() > weight_tolerance {
                return Err(RiskError::InvalidPosition {
                    id: position.id.clone(),
                    reason: format!(
                        "current weight {} disagrees with value share {:.6}",
                        position.current_weight, implied
                    ),
                });
            }
        }

        let target_sum: f64 = positions.iter().map(|p| p.target_weight).sum();
        if target_sum > 1.0 + TARGET_SUM_EPSILON {
            return Err(RiskError::InvalidAllocation(format!(
                "Position target weights sum to {:.6}, above 1",
                target_sum
            )));
        }

        debug!(
            "Snapshot with {} positions, total value {:.2}",
            positions.len(),
            total_value
        );
        Ok(Self {
            positions,
            total_value,
            weight_tolerance,
        })
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn total_value(&self) -> f64 {
        self.total_value
    }

    pub fn current_value_sum(&self) -> f64 {
        self.positions.iter().map(|p| p.current_value).sum()
    }

    pub fn target_weight_sum(&self) -> f64 {
        self.positions.iter().map(|p| p.target_weight).sum()
    }

    /// Same positions with target weights replaced, e.g. by optimizer output
    pub fn with_target_weights(&self, weights: &[f64]) -> Result<Self> {
        if weights.len() != self.positions.len() {
            return Err(RiskError::LengthMismatch {
                left: weights.len(),
                right: self.positions.len(),
            });
        }

        let positions = self
            .positions
            .iter()
            .zip(weights.iter())
            .map(|(position, &weight)| Position {
                target_weight: weight,
                ..position.clone()
            })
            .collect();
        Self::with_weight_tolerance(positions, self.total_value, self.weight_tolerance)
    }

    /// Current weight per asset class
    pub fn asset_class_allocation(&self) -> BTreeMap<String, f64> {
        let mut allocation = BTreeMap::new();
        for position in &self.positions {
            *allocation.entry(position.asset_class.clone()).or_insert(0.0) +=
                position.current_weight;
        }
        allocation
    }
}

/// Target weight per asset class, non-negative and summing to 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetAllocation(BTreeMap<String, f64>);

impl TargetAllocation {
    /// `tolerance` bounds |Σ weights - 1|; 0.001 is 0.1 percentage points
    pub fn new(weights: BTreeMap<String, f64>, tolerance: f64) -> Result<Self> {
        for (class, weight) in &weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(RiskError::InvalidAllocation(format!(
                    "Asset class {} has invalid weight {}",
                    class, weight
                )));
            }
        }

        let total: f64 = weights.values().sum();
        if (total - 1.0).abs() > tolerance {
            return Err(RiskError::InvalidAllocation(format!(
                "Target allocation sums to {:.6}, expected 1 within {}",
                total, tolerance
            )));
        }

        Ok(Self(weights))
    }

    /// Check a deserialized allocation against `tolerance`
    pub fn validated(self, tolerance: f64) -> Result<Self> {
        Self::new(self.0, tolerance)
    }

    /// 0 for classes without a target
    pub fn weight(&self, asset_class: &str) -> f64 {
        self.0.get(asset_class).copied().unwrap_or(0.0)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions() -> Vec<Position> {
        vec![
            Position::new("A", 30_000.0, 0.30, 0.25, "equity"),
            Position::new("B", 50_000.0, 0.50, 0.55, "fixed_income"),
            Position::new("C", 20_000.0, 0.20, 0.20, "equity"),
        ]
    }

    #[test]
    fn test_asset_class_allocation() {
        let snapshot = PortfolioSnapshot::new(positions(), 100_000.0).unwrap();
        let allocation = snapshot.asset_class_allocation();

        assert_eq!(allocation.len(), 2);
        assert!((allocation["equity"] - 0.50).abs() < 1e-12);
        assert!((allocation["fixed_income"] - 0.50).abs() < 1e-12);
        assert!((snapshot.current_value_sum() - 100_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_rejects_bad_positions() {
        let mut bad = positions();
        bad[1].current_value = -1.0;
        assert!(matches!(
            PortfolioSnapshot::new(bad, 100_000.0),
            Err(RiskError::InvalidPosition { ref id, .. }) if id == "B"
        ));

        let mut duplicate = positions();
        duplicate[2].id = "A".to_string();
        assert!(PortfolioSnapshot::new(duplicate, 100_000.0).is_err());

        assert!(matches!(
            PortfolioSnapshot::new(positions(), 0.0),
            Err(RiskError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_current_weight_must_match_value_share() {
        let inconsistent = vec![
            Position::new("A", 30_000.0, 0.02, 0.25, "equity"),
            Position::new("B", 70_000.0, 0.98, 0.75, "fixed_income"),
        ];
        assert!(matches!(
            PortfolioSnapshot::new(inconsistent.clone(), 100_000.0),
            Err(RiskError::InvalidPosition { ref id, .. }) if id == "A"
        ));
        assert!(PortfolioSnapshot::with_weight_tolerance(inconsistent, 100_000.0, 0.5).is_ok());

        // within 0.1 percentage points is accepted
        let rounded = vec![
            Position::new("A", 30_000.0, 0.3009, 0.25, "equity"),
            Position::new("B", 70_000.0, 0.6991, 0.75, "fixed_income"),
        ];
        let snapshot = PortfolioSnapshot::new(rounded, 100_000.0).unwrap();
        assert!(snapshot.with_target_weights(&[0.5, 0.5]).is_ok());

        assert!(matches!(
            PortfolioSnapshot::with_weight_tolerance(positions(), 100_000.0, -0.1),
            Err(RiskError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_target_weights_above_one_rejected() {
        let mut over = positions();
        over[0].target_weight = 0.40;
        assert!(matches!(
            PortfolioSnapshot::new(over, 100_000.0),
            Err(RiskError::InvalidAllocation(_))
        ));
    }

    #[test]
    fn test_target_allocation_validation() {
        let mut weights = BTreeMap::new();
        weights.insert("equity".to_string(), 0.6);
        weights.insert("fixed_income".to_string(), 0.3995);
        let allocation = TargetAllocation::new(weights.clone(), 0.001).unwrap();
        assert_eq!(allocation.weight("equity"), 0.6);
        assert_eq!(allocation.weight("cash"), 0.0);

        weights.insert("cash".to_string(), 0.01);
        assert!(TargetAllocation::new(weights.clone(), 0.001).is_err());

        weights.insert("cash".to_string(), -0.0005);
        assert!(matches!(
            TargetAllocation::new(weights, 0.001),
            Err(RiskError::InvalidAllocation(_))
        ));
    }

    #[test]
    fn test_position_deserializes_with_defaults() {
        let json = r#"{ "id": "X", "current_value": 100.0, "current_weight": 0.1,
                        "target_weight": 0.2, "asset_class": "equity" }"#;
        let position: Position = serde_json::from_str(json).unwrap();
        assert_eq!(position.liquidity_tier, LiquidityTier::Medium);
        assert_eq!(position.currency, "EUR");
        assert!((position.deviation_percent() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_currency_survives_serialization() {
        let position =
            Position::new("UST", 10_000.0, 0.1, 0.1, "fixed_income").with_currency("USD");
        let json = serde_json::to_string(&position).unwrap();
        assert!(json.contains(r#""currency":"USD""#));

        let parsed: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, position);
    }
}
