use portfolio_engine::config::{EngineConfig, OptimizerConfig};
use portfolio_engine::covariance::CovarianceMatrix;
use portfolio_engine::optimizer::{
    self, MeanVarianceOptimizer, OptimizationConstraints, OptimizationInputs,
};
use portfolio_engine::portfolio::{PortfolioSnapshot, Position};
use portfolio_engine::rebalancing::{RebalancingEngine, RebalancingThresholds};
use portfolio_engine::stats;
use proptest::prelude::*;

/// Symmetric positive definite matrix A·Aᵀ + 0.01·I
fn covariance_from_factors(factors: &[Vec<f64>]) -> CovarianceMatrix {
    let n = factors.len();
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let dot: f64 =
                        factors[i].iter().zip(factors[j].iter()).map(|(a, b)| a * b).sum();
                    if i == j { dot + 0.01 } else { dot }
                })
                .collect()
        })
        .collect();
    CovarianceMatrix::from_rows(&rows).expect("factor product is a valid covariance matrix")
}

fn factors_strategy() -> impl Strategy<Value = Vec<Vec<f64>>> {
    (2usize..6).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(-0.3f64..0.3, n), n)
    })
}

fn snapshot_strategy() -> impl Strategy<Value = PortfolioSnapshot> {
    (1usize..12)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(100.0f64..50_000.0, n),
                prop::collection::vec(0.01f64..1.0, n),
                0.8f64..1.0,
            )
        })
        .prop_map(|(values, raw_targets, invested)| {
            let total: f64 = values.iter().sum();
            let raw_sum: f64 = raw_targets.iter().sum();
            let positions = values
                .iter()
                .zip(raw_targets.iter())
                .enumerate()
                .map(|(i, (value, raw))| {
                    Position::new(
                        format!("P{:02}", i),
                        *value,
                        value / total,
                        raw / raw_sum * invested,
                        if i % 2 == 0 { "equity" } else { "fixed_income" },
                    )
                })
                .collect();
            PortfolioSnapshot::new(positions, total).expect("generated snapshot is valid")
        })
}

proptest! {
    #[test]
    fn volatility_is_never_negative(returns in prop::collection::vec(-0.2f64..0.2, 2..80)) {
        let vol = stats::volatility(&returns, true).unwrap();
        prop_assert!(vol >= 0.0);
    }

    #[test]
    fn cvar_is_at_least_var(
        returns in prop::collection::vec(-0.2f64..0.2, 1..120),
        confidence in 0.5f64..0.995,
    ) {
        let var = stats::value_at_risk(&returns, confidence).unwrap();
        let cvar = stats::conditional_var(&returns, confidence).unwrap();
        prop_assert!(cvar >= var - 1e-12, "CVaR {} below VaR {}", cvar, var);
    }

    #[test]
    fn max_drawdown_is_a_fraction(returns in prop::collection::vec(-0.5f64..0.5, 1..80)) {
        let drawdown = stats::max_drawdown(&stats::cumulative_returns(&returns)).unwrap();
        prop_assert!((0.0..=1.0).contains(&drawdown));
    }

    #[test]
    fn portfolio_risk_ignores_asset_order(factors in factors_strategy(), raw in prop::collection::vec(0.0f64..1.0, 5)) {
        let covariance = covariance_from_factors(&factors);
        let n = covariance.num_assets();
        let weights: Vec<f64> = raw.iter().take(n).copied().collect();

        let order: Vec<usize> = (0..n).rev().collect();
        let permuted_weights: Vec<f64> = order.iter().map(|&k| weights[k]).collect();
        let permuted = covariance.permuted(&order).unwrap();

        let risk = optimizer::portfolio_risk(&weights, &covariance).unwrap();
        let permuted_risk = optimizer::portfolio_risk(&permuted_weights, &permuted).unwrap();
        prop_assert!((risk - permuted_risk).abs() <= 1e-12 * (1.0 + risk));
    }

    #[test]
    fn minimum_variance_is_feasible_and_order_independent(
        factors in factors_strategy(),
        returns in prop::collection::vec(0.0f64..0.15, 5),
    ) {
        let covariance = covariance_from_factors(&factors);
        let n = covariance.num_assets();
        let expected: Vec<f64> = returns.iter().take(n).copied().collect();
        let optimizer = MeanVarianceOptimizer::new(OptimizerConfig::default());
        let constraints = OptimizationConstraints::long_only();

        let result = optimizer.optimize(&expected, &covariance, &constraints).unwrap();
        let sum: f64 = result.weights.iter().sum();
        prop_assert!((sum - 1.0).abs() <= 1e-6);
        prop_assert!(result.weights.iter().all(|w| *w >= -1e-9));

        let order: Vec<usize> = (0..n).rev().collect();
        let permuted_expected: Vec<f64> = order.iter().map(|&k| expected[k]).collect();
        let permuted = covariance.permuted(&order).unwrap();
        let reordered = optimizer.optimize(&permuted_expected, &permuted, &constraints).unwrap();
        prop_assert!((result.expected_risk - reordered.expected_risk).abs() <= 1e-6);
    }

    #[test]
    fn frontier_stays_inside_random_bounds(
        factors in factors_strategy(),
        returns in prop::collection::vec(0.0f64..0.15, 5),
        floors in prop::collection::vec(0.0f64..0.15, 5),
        caps in prop::collection::vec(0.55f64..1.0, 5),
    ) {
        let covariance = covariance_from_factors(&factors);
        let n = covariance.num_assets();
        let expected: Vec<f64> = returns.iter().take(n).copied().collect();
        let lower: Vec<f64> = floors.iter().take(n).copied().collect();
        let upper: Vec<f64> = caps.iter().take(n).copied().collect();
        let constraints =
            OptimizationConstraints::long_only().with_bounds(lower.clone(), upper.clone());

        let optimizer = MeanVarianceOptimizer::new(OptimizerConfig::default());
        let (_, max_return) = optimizer.feasible_return_range(&expected, &constraints).unwrap();
        let inputs = OptimizationInputs {
            expected_returns: expected.clone(),
            covariance,
            constraints,
        };
        let frontier = optimizer.efficient_frontier(&inputs, 8).unwrap();
        prop_assert_eq!(frontier.len(), 8);

        for point in &frontier {
            let sum: f64 = point.weights.iter().sum();
            prop_assert!((sum - 1.0).abs() <= 1e-6, "Weights sum to {}", sum);
            for (i, w) in point.weights.iter().enumerate() {
                prop_assert!(*w >= lower[i] - 1e-9 && *w <= upper[i] + 1e-9,
                    "Weight {} of asset {} outside [{}, {}]", w, i, lower[i], upper[i]);
            }
            let ret = optimizer::portfolio_return(&point.weights, &expected).unwrap();
            prop_assert!((ret - point.expected_return).abs() <= 1e-6);
            prop_assert!(point.expected_risk >= frontier[0].expected_risk - 1e-6);
        }
        for pair in frontier.windows(2) {
            prop_assert!(pair[1].expected_return >= pair[0].expected_return - 1e-6);
        }
        let last = frontier[7].expected_return;
        prop_assert!(
            (last - max_return).abs() <= 1e-6,
            "Top return {} vs feasible {}",
            last,
            max_return
        );
    }

    #[test]
    fn rebalancing_reconciles_and_repeats(snapshot in snapshot_strategy()) {
        let engine = RebalancingEngine::from_config(&EngineConfig::default());
        let thresholds = RebalancingThresholds::default();

        let first = engine.build_plan(&snapshot, &thresholds, None).unwrap();
        let second = engine.build_plan(&snapshot, &thresholds, None).unwrap();
        prop_assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let expected_cash = snapshot.total_value() * snapshot.target_weight_sum() - snapshot.current_value_sum();
        prop_assert!((first.statistics.net_cash_flow - expected_cash).abs() <= 1e-6 * snapshot.total_value());
        prop_assert!(first.statistics.total_volume >= first.statistics.net_cash_flow.abs() - 1e-9);

        // validation step closes every execution order
        prop_assert!(first.execution_order.last().is_some_and(|s| s.position_id.is_none()));
        prop_assert!(engine.select_optimal(&first.proposals).iter().all(|p| p.is_trade()));
    }
}
