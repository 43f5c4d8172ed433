use portfolio_engine::config::EngineConfig;
use portfolio_engine::plan::RebalancingPlan;
use portfolio_engine::portfolio::{PortfolioSnapshot, Position, TargetAllocation};
use portfolio_engine::rebalancing::{RebalancingEngine, RebalancingThresholds};
use portfolio_engine::risk::{RiskMetricsEngine, RiskReport};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

/// Input document describing one portfolio at one point in time
#[derive(Debug, Deserialize)]
struct SnapshotDocument {
    returns: Vec<f64>,
    #[serde(default)]
    market_returns: Option<Vec<f64>>,
    #[serde(default)]
    benchmark_returns: Option<Vec<f64>>,
    positions: Vec<Position>,
    total_value: f64,
    #[serde(default)]
    target_allocation: Option<TargetAllocation>,
    /// Overrides the configured thresholds for this run
    #[serde(default)]
    thresholds: Option<RebalancingThresholds>,
}

#[derive(Debug, Serialize)]
struct EngineReport {
    risk: RiskReport,
    rebalancing: RebalancingPlan,
}

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info"); }
    }
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("Usage: {} <config.json> <snapshot.json>", args[0]);
    }
    let (config_file, snapshot_file) = (&args[1], &args[2]);

    info!("Loading configuration from: {}", config_file);
    let config = EngineConfig::load_from_file(config_file)?;

    let raw = fs::read_to_string(snapshot_file)
        .with_context(|| format!("Failed to read snapshot {}", snapshot_file))?;
    let document: SnapshotDocument = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse snapshot {}", snapshot_file))?;

    let risk_engine = RiskMetricsEngine::new(config.risk.clone());
    let risk = risk_engine
        .compute_all(
            &document.returns,
            document.market_returns.as_deref(),
            document.benchmark_returns.as_deref(),
            config.risk.risk_free_rate,
        )
        .context("Risk report failed")?;

    let snapshot = PortfolioSnapshot::with_weight_tolerance(
        document.positions,
        document.total_value,
        config.rebalancing.allocation_tolerance,
    )?;
    let rebalancing_engine = RebalancingEngine::from_config(&config);
    let thresholds = document
        .thresholds
        .unwrap_or_else(|| rebalancing_engine.thresholds().clone());
    let plan = rebalancing_engine
        .build_plan(&snapshot, &thresholds, document.target_allocation.as_ref())
        .context("Rebalancing failed")?;

    let report = EngineReport {
        risk,
        rebalancing: plan,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
