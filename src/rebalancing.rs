//! Deviation-driven trade proposals.
//!
//! Every computation here is a pure function of the snapshot and thresholds
//! passed in: identical inputs give identical proposals, statistics and
//! execution order.

use crate::config::{
    EngineConfig, RebalancingConfig, TransactionCostConfig, default_deviation_percent,
    default_min_trade_size,
};
use crate::error::{RiskError, Result};
use crate::plan::RebalancingPlan;
use crate::portfolio::{PortfolioSnapshot, Position, TargetAllocation};
use crate::transaction_cost::TransactionCostCalculator;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Slack on the deviation thresholds; a deviation exactly at a threshold
/// reaches it regardless of rounding
const THRESHOLD_EPSILON: f64 = 1e-9;

/// |deviation| ≥ threshold within `THRESHOLD_EPSILON`; shared by priority and drift
fn reaches_threshold(deviation_percent: f64, threshold_percent: f64) -> bool {
    deviation_percent.abs() >= threshold_percent - THRESHOLD_EPSILON
}
/// Trades smaller than this fraction of portfolio value are holds
const HOLD_EPSILON: f64 = 1e-9;
const RECONCILIATION_TOLERANCE: f64 = 1e-6;

/// Cap on total estimated trading cost for one rebalancing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxCosts {
    #[default]
    Unlimited,
    /// Currency amount
    Absolute(f64),
    /// Fraction of total portfolio value
    Rate(f64),
}

impl MaxCosts {
    pub fn budget(&self, total_value: f64) -> Option<f64> {
        match *self {
            MaxCosts::Unlimited => None,
            MaxCosts::Absolute(amount) => Some(amount),
            MaxCosts::Rate(rate) => Some(rate * total_value),
        }
    }
}

/// Per-invocation rebalancing thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingThresholds {
    /// Percentage points of weight deviation that make a trade high priority
    #[serde(default = "default_deviation_percent")]
    pub deviation_percent: f64,
    /// Currency amount below which a trade is not significant
    #[serde(default = "default_min_trade_size")]
    pub min_trade_size: f64,
    #[serde(default)]
    pub max_costs: MaxCosts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub position_id: String,
    pub asset_class: String,
    pub action: TradeAction,
    pub current_value: f64,
    pub target_value: f64,
    /// target_value - current_value
    pub trade_amount: f64,
    pub deviation_percent: f64,
    pub estimated_cost: f64,
    pub priority: Priority,
    pub market_impact_score: f64,
    pub liquidity_score: f64,
    /// Larger of the run threshold and the position's own minimum
    pub min_trade_size: f64,
}

impl TradeProposal {
    pub fn is_trade(&self) -> bool {
        self.action != TradeAction::Hold
    }

    pub fn is_significant(&self) -> bool {
        self.is_trade() && self.trade_amount.abs() >= self.min_trade_size
    }

    /// |amount| / (cost + 1) × liquidity score
    pub fn efficiency(&self) -> f64 {
        self.trade_amount.abs() / (self.estimated_cost + 1.0) * self.liquidity_score
    }
}

/// Views over a generated proposal list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeFilter {
    All,
    Trades,
    Significant,
    BuysOnly,
    SellsOnly,
}

impl TradeFilter {
    pub fn matches(&self, proposal: &TradeProposal) -> bool {
        match self {
            TradeFilter::All => true,
            TradeFilter::Trades => proposal.is_trade(),
            TradeFilter::Significant => proposal.is_significant(),
            TradeFilter::BuysOnly => proposal.action == TradeAction::Buy,
            TradeFilter::SellsOnly => proposal.action == TradeAction::Sell,
        }
    }
}

pub fn filter_trades(proposals: &[TradeProposal], filter: TradeFilter) -> Vec<TradeProposal> {
    proposals
        .iter()
        .filter(|p| filter.matches(p))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingStatistics {
    pub total_volume: f64,
    pub total_cost: f64,
    /// Over all positions, in percentage points
    pub max_deviation_percent: f64,
    pub average_deviation_percent: f64,
    /// Non-hold proposals
    pub trade_count: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub significant_count: usize,
    /// Σ trade amounts; positive means cash is needed
    pub net_cash_flow: f64,
    pub cost_budget: Option<f64>,
    pub within_cost_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetClassDrift {
    pub asset_class: String,
    pub current_weight: f64,
    pub target_weight: f64,
    /// (current - target) in percentage points
    pub drift_percent: f64,
    pub is_drifting: bool,
}

/// Trade at asset-class level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassTrade {
    pub asset_class: String,
    pub action: TradeAction,
    /// Absolute currency amount
    pub amount: f64,
    pub current_allocation: f64,
    pub target_allocation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Overweight positions, most liquid first
    SellOverweight,
    /// Underweight positions, lowest market impact first
    BuyUnderweight,
    /// Trades below the significance threshold
    FineTune,
    Validation,
}

/// Advisory execution step; nothing here enforces the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub sequence: usize,
    pub phase: ExecutionPhase,
    pub position_id: Option<String>,
    pub trade_amount: f64,
}

pub struct RebalancingEngine {
    config: RebalancingConfig,
    costs: TransactionCostCalculator,
}

impl RebalancingEngine {
    pub fn new(config: RebalancingConfig, cost_config: TransactionCostConfig) -> Self {
        Self {
            config,
            costs: TransactionCostCalculator::new(cost_config),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.rebalancing.clone(), config.transaction_costs.clone())
    }

    pub fn config(&self) -> &RebalancingConfig {
        &self.config
    }

    /// Configured default thresholds
    pub fn thresholds(&self) -> &RebalancingThresholds {
        &self.config.thresholds
    }

    pub fn classify_priority(
        deviation_percent: f64,
        thresholds: &RebalancingThresholds,
    ) -> Priority {
        if reaches_threshold(deviation_percent, thresholds.deviation_percent) {
            Priority::High
        } else if reaches_threshold(deviation_percent, thresholds.deviation_percent / 2.0) {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    fn proposal_for(
        &self,
        position: &Position,
        total_value: f64,
        thresholds: &RebalancingThresholds,
    ) -> Result<TradeProposal> {
        let target_value = position.target_weight * total_value;
        let trade_amount = target_value - position.current_value;

        let action = if trade_amount.abs() < HOLD_EPSILON * total_value.max(1.0) {
            TradeAction::Hold
        } else if trade_amount > 0.0 {
            TradeAction::Buy
        } else {
            TradeAction::Sell
        };

        let deviation_percent = position.deviation_percent();
        let market_impact_score =
            self.costs
                .market_impact_score(trade_amount, total_value, position.liquidity_tier)?;

        let proposal = TradeProposal {
            position_id: position.id.clone(),
            asset_class: position.asset_class.clone(),
            action,
            current_value: position.current_value,
            target_value,
            trade_amount,
            deviation_percent,
            estimated_cost: self.costs.estimated_cost(position, trade_amount),
            priority: Self::classify_priority(deviation_percent, thresholds),
            market_impact_score,
            liquidity_score: self.costs.liquidity_score(position.liquidity_tier),
            min_trade_size: thresholds.min_trade_size.max(position.min_trade_size),
        };

        debug!(
            "{}: {:?} {:.2} ({:+.2}pp, {:?} priority)",
            proposal.position_id,
            proposal.action,
            proposal.trade_amount,
            proposal.deviation_percent,
            proposal.priority
        );
        Ok(proposal)
    }

    /// One proposal per position, in snapshot order
    pub fn propose(
        &self,
        snapshot: &PortfolioSnapshot,
        thresholds: &RebalancingThresholds,
    ) -> Result<Vec<TradeProposal>> {
        if thresholds.deviation_percent < 0.0 || thresholds.min_trade_size < 0.0 {
            return Err(RiskError::InvalidInput(format!(
                "Thresholds cannot be negative: deviation {}, min trade size {}",
                thresholds.deviation_percent, thresholds.min_trade_size
            )));
        }

        snapshot
            .positions()
            .iter()
            .map(|position| self.proposal_for(position, snapshot.total_value(), thresholds))
            .collect()
    }

    /// Trades meeting their minimum trade size
    pub fn select_significant(proposals: &[TradeProposal]) -> Vec<TradeProposal> {
        filter_trades(proposals, TradeFilter::Significant)
    }

    /// Greedy pick of the most efficient trades.
    ///
    /// Ranked by efficiency descending, equal scores ordered by position id.
    /// Holds are never selected.
    pub fn select_optimal(&self, proposals: &[TradeProposal]) -> Vec<TradeProposal> {
        let mut ranked: Vec<(f64, &TradeProposal)> = proposals
            .iter()
            .filter(|p| p.is_trade())
            .map(|p| (p.efficiency(), p))
            .collect();

        ranked.sort_by(|(ea, a), (eb, b)| {
            eb.total_cmp(ea).then_with(|| a.position_id.cmp(&b.position_id))
        });

        ranked
            .into_iter()
            .take(self.config.max_optimal_trades)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn statistics(
        &self,
        snapshot: &PortfolioSnapshot,
        proposals: &[TradeProposal],
        thresholds: &RebalancingThresholds,
    ) -> Result<RebalancingStatistics> {
        let total_value = snapshot.total_value();
        let total_volume: f64 = proposals.iter().map(|p| p.trade_amount.abs()).sum();
        let total_cost: f64 = proposals.iter().map(|p| p.estimated_cost).sum();

        let deviations: Vec<f64> = proposals.iter().map(|p| p.deviation_percent.abs()).collect();
        let max_deviation_percent = deviations.iter().copied().fold(0.0, f64::max);
        let average_deviation_percent = if deviations.is_empty() {
            0.0
        } else {
            deviations.iter().sum::<f64>() / deviations.len() as f64
        };

        let count = |action: TradeAction| proposals.iter().filter(|p| p.action == action).count();

        // Trade amounts must add up to the cash the targets imply
        let net_cash_flow: f64 = proposals.iter().map(|p| p.trade_amount).sum();
        let expected_cash_flow =
            total_value * snapshot.target_weight_sum() - snapshot.current_value_sum();
        if (net_cash_flow - expected_cash_flow).abs()
            > RECONCILIATION_TOLERANCE * total_value.max(1.0)
        {
            return Err(RiskError::NumericalFailure(format!(
                "Trade amounts sum to {:.2} but the rebalancing delta is {:.2}",
                net_cash_flow, expected_cash_flow
            )));
        }

        let cost_budget = thresholds.max_costs.budget(total_value);
        let within_cost_budget = cost_budget.is_none_or(|budget| total_cost <= budget);
        if let Some(budget) = cost_budget.filter(|_| !within_cost_budget) {
            warn!(
                "Estimated trading cost {:.2} exceeds budget {:.2}",
                total_cost, budget
            );
        }

        Ok(RebalancingStatistics {
            total_volume,
            total_cost,
            max_deviation_percent,
            average_deviation_percent,
            trade_count: proposals.iter().filter(|p| p.is_trade()).count(),
            buy_count: count(TradeAction::Buy),
            sell_count: count(TradeAction::Sell),
            significant_count: proposals.iter().filter(|p| p.is_significant()).count(),
            net_cash_flow,
            cost_budget,
            within_cost_budget,
        })
    }

    /// Current vs target weight for every asset class in either the snapshot or the target
    pub fn drift_analysis(
        &self,
        snapshot: &PortfolioSnapshot,
        target: &TargetAllocation,
        thresholds: &RebalancingThresholds,
    ) -> Vec<AssetClassDrift> {
        let current = snapshot.asset_class_allocation();
        let classes: BTreeSet<&str> = current
            .keys()
            .map(String::as_str)
            .chain(target.classes())
            .collect();

        classes
            .into_iter()
            .map(|class| {
                let current_weight = current.get(class).copied().unwrap_or(0.0);
                let target_weight = target.weight(class);
                let drift_percent = (current_weight - target_weight) * 100.0;
                let is_drifting = reaches_threshold(drift_percent, thresholds.deviation_percent);
                if is_drifting {
                    warn!(
                        "Asset class {} drifted {:+.2}pp from target",
                        class, drift_percent
                    );
                }
                AssetClassDrift {
                    asset_class: class.to_string(),
                    current_weight,
                    target_weight,
                    drift_percent,
                    is_drifting,
                }
            })
            .collect()
    }

    /// Class-level trades above `class_trade_floor` of portfolio value, largest first
    pub fn class_trades(
        &self,
        snapshot: &PortfolioSnapshot,
        target: &TargetAllocation,
    ) -> Vec<ClassTrade> {
        let total_value = snapshot.total_value();
        let floor = self.config.class_trade_floor * total_value;
        let current = snapshot.asset_class_allocation();
        let classes: BTreeSet<&str> = current
            .keys()
            .map(String::as_str)
            .chain(target.classes())
            .collect();

        let mut trades: Vec<ClassTrade> = classes
            .into_iter()
            .filter_map(|class| {
                let current_allocation = current.get(class).copied().unwrap_or(0.0);
                let target_allocation = target.weight(class);
                let trade_value = (target_allocation - current_allocation) * total_value;
                (trade_value.abs() > floor).then(|| ClassTrade {
                    asset_class: class.to_string(),
                    action: if trade_value > 0.0 {
                        TradeAction::Buy
                    } else {
                        TradeAction::Sell
                    },
                    amount: trade_value.abs(),
                    current_allocation,
                    target_allocation,
                })
            })
            .collect();

        trades.sort_by(|a, b| {
            b.amount
                .total_cmp(&a.amount)
                .then_with(|| a.asset_class.cmp(&b.asset_class))
        });
        trades
    }

    /// Sells, then buys, then fine-tuning trades, then a validation pass
    pub fn execution_order(proposals: &[TradeProposal]) -> Vec<ExecutionStep> {
        let by_id = |a: &&TradeProposal, b: &&TradeProposal| a.position_id.cmp(&b.position_id);

        let mut sells: Vec<&TradeProposal> = proposals
            .iter()
            .filter(|p| p.is_significant() && p.action == TradeAction::Sell)
            .collect();
        sells.sort_by(|a, b| {
            b.liquidity_score
                .total_cmp(&a.liquidity_score)
                .then_with(|| by_id(a, b))
        });

        let mut buys: Vec<&TradeProposal> = proposals
            .iter()
            .filter(|p| p.is_significant() && p.action == TradeAction::Buy)
            .collect();
        buys.sort_by(|a, b| {
            a.market_impact_score
                .total_cmp(&b.market_impact_score)
                .then_with(|| by_id(a, b))
        });

        let mut fine_tune: Vec<&TradeProposal> = proposals
            .iter()
            .filter(|p| p.is_trade() && !p.is_significant())
            .collect();
        fine_tune.sort_by(by_id);

        let phases = [
            (ExecutionPhase::SellOverweight, sells),
            (ExecutionPhase::BuyUnderweight, buys),
            (ExecutionPhase::FineTune, fine_tune),
        ];

        let mut steps: Vec<ExecutionStep> = Vec::new();
        for (phase, trades) in phases {
            for proposal in trades {
                steps.push(ExecutionStep {
                    sequence: steps.len() + 1,
                    phase,
                    position_id: Some(proposal.position_id.clone()),
                    trade_amount: proposal.trade_amount,
                });
            }
        }
        steps.push(ExecutionStep {
            sequence: steps.len() + 1,
            phase: ExecutionPhase::Validation,
            position_id: None,
            trade_amount: 0.0,
        });
        steps
    }

    /// Full rebalancing pass producing a `Proposed` plan
    pub fn build_plan(
        &self,
        snapshot: &PortfolioSnapshot,
        thresholds: &RebalancingThresholds,
        target: Option<&TargetAllocation>,
    ) -> Result<RebalancingPlan> {
        let proposals = self.propose(snapshot, thresholds)?;
        let statistics = self.statistics(snapshot, &proposals, thresholds)?;
        let execution_order = Self::execution_order(&proposals);

        let (drift, class_trades) = match target {
            Some(target) => {
                let target = target.clone().validated(self.config.allocation_tolerance)?;
                (
                    self.drift_analysis(snapshot, &target, thresholds),
                    self.class_trades(snapshot, &target),
                )
            }
            None => (Vec::new(), Vec::new()),
        };

        info!(
            "Rebalancing plan: {} trades ({} significant), volume {:.2}, cost {:.2}",
            statistics.trade_count,
            statistics.significant_count,
            statistics.total_volume,
            statistics.total_cost
        );

        Ok(RebalancingPlan::proposed(
            proposals,
            statistics,
            drift,
            class_trades,
            execution_order,
        ))
    }
}
