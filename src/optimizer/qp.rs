//! Mean-variance quadratic program handed to the Clarabel interior-point solver
//!
//! minimize ½wᵗΣw subject to Σw = 1, μ·w = target (optional), lower ≤ w ≤ upper.
//!
//! Weights pinned by their bounds are substituted out before the solver sees
//! the problem. A target at either end of the feasible return range pins every
//! asset whose return is not tied with the marginal one.

use crate::error::{RiskError, Result};
use log::debug;
use ndarray::Array2;

const BOUND_EPSILON: f64 = 1e-12;
const FEASIBILITY_TOLERANCE: f64 = 1e-9;
const ACCEPTANCE_TOLERANCE: f64 = 1e-6;
const RETURN_TIE_EPSILON: f64 = 1e-12;

pub(crate) struct QuadraticProgram<'a> {
    pub covariance: &'a Array2<f64>,
    pub expected_returns: &'a [f64],
    pub lower: &'a [f64],
    pub upper: &'a [f64],
    pub target_return: Option<f64>,
}

pub(crate) struct SolverSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn return_scale(expected_returns: &[f64]) -> f64 {
    1.0 + expected_returns.iter().fold(0.0_f64, |m, r| m.max(r.abs()))
}

/// Box bounds must admit a fully invested portfolio
pub(crate) fn check_bounds(lower: &[f64], upper: &[f64]) -> Result<()> {
    for (i, (l, u)) in lower.iter().zip(upper.iter()).enumerate() {
        if l > u {
            return Err(RiskError::ConstraintInfeasible(format!(
                "Asset {} has minimum weight {} above maximum {}",
                i, l, u
            )));
        }
    }

    let lower_sum: f64 = lower.iter().sum();
    let upper_sum: f64 = upper.iter().sum();
    if lower_sum > 1.0 + FEASIBILITY_TOLERANCE {
        return Err(RiskError::ConstraintInfeasible(format!(
            "Minimum weights sum to {:.6}, above 1",
            lower_sum
        )));
    }
    if upper_sum < 1.0 - FEASIBILITY_TOLERANCE {
        return Err(RiskError::ConstraintInfeasible(format!(
            "Maximum weights sum to {:.6}, below 1",
            upper_sum
        )));
    }
    Ok(())
}

fn fill_order(expected_returns: &[f64], maximize: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..expected_returns.len()).collect();
    order.sort_by(|&a, &b| {
        let by_return = expected_returns[a].total_cmp(&expected_returns[b]);
        let by_return = if maximize { by_return.reverse() } else { by_return };
        by_return.then(a.cmp(&b))
    });
    order
}

/// Fully invested portfolio with the lowest (or highest) achievable return.
///
/// Starts from the lower bounds and fills the remaining budget in order of
/// expected return, ties broken by asset index.
pub(crate) fn extreme_return_weights(
    expected_returns: &[f64],
    lower: &[f64],
    upper: &[f64],
    maximize: bool,
) -> Vec<f64> {
    let mut weights = lower.to_vec();
    let mut remaining = 1.0 - lower.iter().sum::<f64>();

    for i in fill_order(expected_returns, maximize) {
        if remaining <= 0.0 {
            break;
        }
        let add = (upper[i] - lower[i]).min(remaining);
        weights[i] += add;
        remaining -= add;
    }

    weights
}

/// Lowest and highest fully invested return under the bounds
pub(crate) fn return_range(expected_returns: &[f64], lower: &[f64], upper: &[f64]) -> (f64, f64) {
    let low = extreme_return_weights(expected_returns, lower, upper, false);
    let high = extreme_return_weights(expected_returns, lower, upper, true);
    (dot(&low, expected_returns), dot(&high, expected_returns))
}

/// Narrow the bounds to the face of the box where the extreme return is reached.
///
/// Assets ranked ahead of the marginal one sit at their upper bound, assets
/// behind it at their lower bound; assets tied with it stay free.
fn pin_extreme_return(
    expected_returns: &[f64],
    lower: &mut [f64],
    upper: &mut [f64],
    maximize: bool,
) {
    let tie = RETURN_TIE_EPSILON * return_scale(expected_returns);
    let mut remaining = 1.0 - lower.iter().sum::<f64>();
    let mut marginal: Option<f64> = None;

    for i in fill_order(expected_returns, maximize) {
        if remaining <= 0.0 {
            break;
        }
        let add = (upper[i] - lower[i]).min(remaining);
        if add > 0.0 {
            marginal = Some(expected_returns[i]);
        }
        remaining -= add;
    }

    for (i, &r) in expected_returns.iter().enumerate() {
        let ahead = match marginal {
            Some(m) if (r - m).abs() <= tie => continue,
            Some(m) => (r > m) == maximize,
            None => false,
        };
        if ahead {
            lower[i] = upper[i];
        } else {
            upper[i] = lower[i];
        }
    }
}

/// Solve the program, returning weights that satisfy every constraint
pub(crate) fn solve(problem: &QuadraticProgram, settings: &SolverSettings) -> Result<Vec<f64>> {
    use clarabel::algebra::*;
    use clarabel::solver::*;

    let mu = problem.expected_returns;
    check_bounds(problem.lower, problem.upper)?;

    let mut lower = problem.lower.to_vec();
    let mut upper = problem.upper.to_vec();
    let mut target = problem.target_return;

    if let Some(t) = target {
        let (r_low, r_high) = return_range(mu, &lower, &upper);
        let tolerance = FEASIBILITY_TOLERANCE * return_scale(mu);
        if t < r_low - tolerance || t > r_high + tolerance {
            return Err(RiskError::ConstraintInfeasible(format!(
                "Target return {:.6} outside feasible range [{:.6}, {:.6}]",
                t, r_low, r_high
            )));
        }

        if r_high - r_low <= tolerance {
            // every fully invested portfolio earns the target
            target = None;
        } else if t >= r_high - tolerance {
            pin_extreme_return(mu, &mut lower, &mut upper, true);
            target = None;
        } else if t <= r_low + tolerance {
            pin_extreme_return(mu, &mut lower, &mut upper, false);
            target = None;
        }
    }

    let free: Vec<usize> = (0..mu.len())
        .filter(|&i| upper[i] - lower[i] > BOUND_EPSILON)
        .collect();
    let mut weights = lower.clone();
    if free.is_empty() {
        debug!("Every weight is pinned by its bounds");
        return finalize(weights, problem);
    }

    let is_free = |i: usize| free.contains(&i);
    let pinned_budget: f64 = (0..mu.len()).filter(|&i| !is_free(i)).map(|i| weights[i]).sum();
    let pinned_return: f64 = (0..mu.len())
        .filter(|&i| !is_free(i))
        .map(|i| weights[i] * mu[i])
        .sum();

    let covariance = problem.covariance;
    let k = free.len();

    // Upper triangle of Σ over the free assets
    let mut p_data = Vec::new();
    let mut p_indices = Vec::new();
    let mut p_indptr = vec![0];
    for (c, &j) in free.iter().enumerate() {
        for (r, &i) in free.iter().enumerate().take(c + 1) {
            let val = covariance[[i, j]];
            if val != 0.0 {
                p_data.push(val);
                p_indices.push(r);
            }
        }
        p_indptr.push(p_data.len());
    }
    let p = CscMatrix::new(k, k, p_indptr, p_indices, p_data);

    // Cross terms with the pinned weights
    let q: Vec<f64> = free
        .iter()
        .map(|&i| {
            (0..mu.len())
                .filter(|&j| !is_free(j))
                .map(|j| covariance[[i, j]] * weights[j])
                .sum()
        })
        .collect();

    // Rows: budget, return (optional), then -w ≤ -lower and w ≤ upper per free asset
    let equalities = if target.is_some() { 2 } else { 1 };
    let mut a_data = Vec::new();
    let mut a_indices = Vec::new();
    let mut a_indptr = vec![0];
    for (c, &i) in free.iter().enumerate() {
        a_data.push(1.0);
        a_indices.push(0);

        if target.is_some() && mu[i] != 0.0 {
            a_data.push(mu[i]);
            a_indices.push(1);
        }

        a_data.push(-1.0);
        a_indices.push(equalities + 2 * c);
        a_data.push(1.0);
        a_indices.push(equalities + 2 * c + 1);

        a_indptr.push(a_data.len());
    }
    let a = CscMatrix::new(equalities + 2 * k, k, a_indptr, a_indices, a_data);

    let mut b = vec![1.0 - pinned_budget];
    if let Some(t) = target {
        b.push(t - pinned_return);
    }
    for &i in &free {
        b.push(-lower[i]);
        b.push(upper[i]);
    }

    let cones = [ZeroConeT(equalities), NonnegativeConeT(2 * k)];

    let solver_settings = DefaultSettingsBuilder::default()
        .max_iter(u32::try_from(settings.max_iterations).unwrap_or(u32::MAX))
        .tol_gap_abs(settings.tolerance)
        .tol_gap_rel(settings.tolerance)
        .tol_feas(settings.tolerance)
        .verbose(false)
        .build()
        .map_err(|e| {
            RiskError::NumericalFailure(format!("Failed to build solver settings: {}", e))
        })?;

    let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, solver_settings)
        .map_err(|e| RiskError::NumericalFailure(format!("Failed to create solver: {:?}", e)))?;

    solver.solve();

    match &solver.solution.status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => {}
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            return Err(RiskError::ConstraintInfeasible(
                "No portfolio satisfies the bounds and target return".to_string(),
            ));
        }
        status => {
            return Err(RiskError::NumericalFailure(format!(
                "Optimizer stopped with status {:?}",
                status
            )));
        }
    }

    debug!(
        "Solved {} free weights in {} iterations",
        k, solver.solution.iterations
    );

    for (c, &i) in free.iter().enumerate() {
        weights[i] = solver.solution.x[c];
    }
    finalize(weights, problem)
}

fn finalize(mut weights: Vec<f64>, problem: &QuadraticProgram) -> Result<Vec<f64>> {
    for (i, w) in weights.iter_mut().enumerate() {
        *w = w.clamp(problem.lower[i], problem.upper[i]);
    }

    let budget: f64 = weights.iter().sum();
    if (budget - 1.0).abs() > ACCEPTANCE_TOLERANCE {
        return Err(RiskError::NumericalFailure(format!(
            "Optimized weights sum to {:.9}",
            budget
        )));
    }
    if let Some(target) = problem.target_return {
        let achieved = dot(&weights, problem.expected_returns);
        if (achieved - target).abs() > ACCEPTANCE_TOLERANCE {
            return Err(RiskError::NumericalFailure(format!(
                "Optimized return {:.9} misses target {:.9}",
                achieved, target
            )));
        }
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn settings() -> SolverSettings {
        SolverSettings {
            max_iterations: 500,
            tolerance: 1e-8,
        }
    }

    #[test]
    fn test_extreme_return_weights() {
        let mu = [0.04, 0.08, 0.12];
        let lower = [0.1, 0.0, 0.0];
        let upper = [1.0, 0.5, 0.5];

        let low = extreme_return_weights(&mu, &lower, &upper, false);
        assert_eq!(low, vec![1.0, 0.0, 0.0]);

        let high = extreme_return_weights(&mu, &lower, &upper, true);
        assert!((high[0] - 0.1).abs() < 1e-12);
        assert!((high[1] - 0.4).abs() < 1e-12);
        assert!((high[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_check_bounds() {
        assert!(check_bounds(&[0.0, 0.0], &[1.0, 1.0]).is_ok());
        assert!(matches!(
            check_bounds(&[0.6, 0.6], &[1.0, 1.0]),
            Err(RiskError::ConstraintInfeasible(_))
        ));
        assert!(check_bounds(&[0.0, 0.0], &[0.4, 0.4]).is_err());
        assert!(check_bounds(&[0.5, 0.0], &[0.4, 1.0]).is_err());
    }

    #[test]
    fn test_pin_extreme_keeps_tied_assets_free() {
        let mu = [0.04, 0.10, 0.10, 0.12];
        let mut lower = vec![0.0; 4];
        let mut upper = vec![0.5; 4];

        pin_extreme_return(&mu, &mut lower, &mut upper, true);
        // the best asset is full, the worst empty, the tied pair shares the rest
        assert_eq!((lower[3], upper[3]), (0.5, 0.5));
        assert_eq!((lower[0], upper[0]), (0.0, 0.0));
        assert_eq!((lower[1], upper[1]), (0.0, 0.5));
        assert_eq!((lower[2], upper[2]), (0.0, 0.5));
    }

    #[test]
    fn test_upper_bound_binds() {
        let covariance = array![[0.0001, 0.0, 0.0], [0.0, 0.04, 0.0], [0.0, 0.0, 0.04]];
        let mu = [0.01, 0.05, 0.05];
        let lower = [0.0; 3];
        let upper = [0.4; 3];
        let problem = QuadraticProgram {
            covariance: &covariance,
            expected_returns: &mu,
            lower: &lower,
            upper: &upper,
            target_return: None,
        };

        let weights = solve(&problem, &settings()).unwrap();
        assert!((weights[0] - 0.4).abs() < 1e-6, "weights {:?}", weights);
        assert!((weights[1] - 0.3).abs() < 1e-6);
        assert!((weights[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_extreme_target_is_a_vertex() {
        let covariance = array![[0.01, 0.0, 0.0], [0.0, 0.04, 0.0], [0.0, 0.0, 0.09]];
        let mu = [0.04, 0.08, 0.12];
        let lower = [0.0; 3];
        let upper = [1.0; 3];
        let problem = QuadraticProgram {
            covariance: &covariance,
            expected_returns: &mu,
            lower: &lower,
            upper: &upper,
            target_return: Some(0.12),
        };

        let weights = solve(&problem, &settings()).unwrap();
        assert_eq!(weights, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_zero_covariance_returns_a_feasible_point() {
        let covariance = Array2::zeros((2, 2));
        let mu = [0.05, 0.08];
        let lower = [0.0; 2];
        let upper = [1.0; 2];
        let problem = QuadraticProgram {
            covariance: &covariance,
            expected_returns: &mu,
            lower: &lower,
            upper: &upper,
            target_return: None,
        };

        let weights = solve(&problem, &settings()).unwrap();
        assert!((weights.iter().sum::<f64>() - 1.0).abs() <= 1e-6);
        assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
    }
}
