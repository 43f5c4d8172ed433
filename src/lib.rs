//! Portfolio Engine - risk statistics, mean-variance optimization and
//! rebalancing proposals.
//!
//! - **Return statistics**: volatility, historical VaR/CVaR, skewness, kurtosis, drawdown
//! - **Risk metrics**: Sharpe, beta, alpha, information ratio in one report
//! - **Optimization**: constrained minimum-variance weights and the efficient frontier
//! - **Rebalancing**: ranked trade proposals, drift diagnostics, execution order
//!
//! Everything is a pure, synchronous computation over the data passed in.
//!
//! # Example
//!
//! ```rust,no_run
//! use portfolio_engine::config::EngineConfig;
//! use portfolio_engine::portfolio::{PortfolioSnapshot, Position};
//! use portfolio_engine::rebalancing::RebalancingEngine;
//!
//! let config = EngineConfig::default();
//! let snapshot = PortfolioSnapshot::new(
//!     vec![
//!         Position::new("A", 30_000.0, 0.30, 0.25, "equity"),
//!         Position::new("B", 70_000.0, 0.70, 0.75, "fixed_income"),
//!     ],
//!     100_000.0,
//! )?;
//!
//! let engine = RebalancingEngine::from_config(&config);
//! let plan = engine.build_plan(&snapshot, engine.thresholds(), None)?;
//! println!("{} trades proposed", plan.statistics.trade_count);
//! # Ok::<(), portfolio_engine::RiskError>(())
//! ```

pub mod config;
pub mod covariance;
pub mod error;
pub mod optimizer;
pub mod plan;
pub mod portfolio;
pub mod rebalancing;
pub mod risk;
pub mod stats;
pub mod transaction_cost;

pub use config::EngineConfig;
pub use covariance::CovarianceMatrix;
pub use error::{Result, RiskError};
pub use optimizer::{
    MeanVarianceOptimizer, OptimizationConstraints, OptimizationInputs, OptimizationResult,
};
pub use plan::{ExecutionCollaborator, PlanStatus, RebalancingPlan};
pub use portfolio::{PortfolioSnapshot, Position, TargetAllocation};
pub use rebalancing::{RebalancingEngine, RebalancingThresholds, TradeProposal};
pub use risk::{RiskMetricsEngine, RiskReport};
