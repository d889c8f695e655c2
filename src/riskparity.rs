//! # Risk Parity Solver
//!
//! $$
//! \min_{\mathbf{w}} \sum_i \left( \frac{w_i (\Sigma \mathbf{w})_i}{\mathbf{w}^\top \Sigma \mathbf{w}} - b_i \right)^2
//! $$
//!
//! Weights whose risk contributions match a target budget, found by
//! Nelder-Mead over a softmax reparameterization (keeps the simplex
//! constraint implicit) with box bounds applied by projection afterwards.
//! The solver never fails hard: non-convergence falls back to equal
//! weighting and is logged as a degraded result.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::covariance::annualized_covariance;
use crate::series::align_many;
use crate::series::PriceSeries;
use crate::types::AllocationWeights;
use crate::types::PortfolioError;
use crate::types::ReturnMethod;
use crate::types::RiskBudget;

/// Minimum aligned return observations before a covariance estimate is trusted.
pub const MIN_RETURN_OBSERVATIONS: usize = 30;

/// Floor applied to portfolio variance and per-asset variances so that a
/// zero-variance asset cannot produce a division by zero.
const VARIANCE_FLOOR: f64 = 1e-12;

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn mat_vec_mul(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
  mat
    .iter()
    .map(|row| row.iter().zip(v.iter()).map(|(a, b)| a * b).sum())
    .collect()
}

fn softmax(x: &[f64]) -> Vec<f64> {
  if x.is_empty() {
    return Vec::new();
  }

  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
  let sum: f64 = exps.iter().sum();

  if sum < 1e-15 {
    vec![1.0 / x.len() as f64; x.len()]
  } else {
    exps.iter().map(|&e| e / sum).collect()
  }
}

/// Squared deviation of realized risk contributions from the budget.
fn budget_deviation(w: &[f64], cov: &[Vec<f64>], budget: &[f64]) -> f64 {
  let sigma_w = mat_vec_mul(cov, w);
  let port_var = dot(w, &sigma_w).max(VARIANCE_FLOOR);

  let mut err = 0.0;
  for i in 0..w.len() {
    let rc = w[i] * sigma_w[i] / port_var;
    err += (rc - budget[i]).powi(2);
  }
  err
}

/// Project onto the simplex intersected with `[min, max]` boxes.
///
/// Scales free weights to fill the remaining budget and pins violators at
/// their bound, repeating until no bound is violated. Terminates in at most
/// `n` passes for feasible bounds; infeasible bounds return the input.
fn project_box_simplex(w: &[f64], min: f64, max: f64) -> Vec<f64> {
  let n = w.len();
  if n == 0 {
    return Vec::new();
  }
  if min * n as f64 > 1.0 + 1e-9 || max * (n as f64) < 1.0 - 1e-9 {
    return w.to_vec();
  }

  let mut out = w.to_vec();
  let mut pinned = vec![false; n];

  for _ in 0..n {
    let pinned_sum: f64 = (0..n).filter(|&i| pinned[i]).map(|i| out[i]).sum();
    let free: Vec<usize> = (0..n).filter(|&i| !pinned[i]).collect();
    if free.is_empty() {
      break;
    }

    let remaining = (1.0 - pinned_sum).max(0.0);
    let free_sum: f64 = free.iter().map(|&i| out[i]).sum();

    let mut violated = false;
    for &i in &free {
      let scaled = if free_sum > 1e-12 {
        out[i] * remaining / free_sum
      } else {
        remaining / free.len() as f64
      };

      if scaled < min {
        out[i] = min;
        pinned[i] = true;
        violated = true;
      } else if scaled > max {
        out[i] = max;
        pinned[i] = true;
        violated = true;
      } else {
        out[i] = scaled;
      }
    }

    if !violated {
      break;
    }
  }

  out
}

/// Solver tuning knobs; defaults mirror a conservative SLSQP setup.
#[derive(Clone, Copy, Debug)]
pub struct RiskParityConfig {
  /// Trailing window (daily observations) for covariance estimation.
  pub lookback_period: usize,
  /// Lower box bound per weight.
  pub min_weight: f64,
  /// Upper box bound per weight.
  pub max_weight: f64,
  /// Iteration cap for the inner optimizer.
  pub max_iters: u64,
  /// Objective value below which the solve counts as converged.
  pub tolerance: f64,
}

impl Default for RiskParityConfig {
  fn default() -> Self {
    Self {
      lookback_period: 252,
      min_weight: 0.005,
      max_weight: 0.5,
      max_iters: 1000,
      tolerance: 1e-9,
    }
  }
}

/// Raw solver output on an ordered instrument set.
#[derive(Clone, Debug, Default)]
pub struct SolverOutcome {
  /// Final weights; empty means insufficient data.
  pub weights: Vec<f64>,
  /// Whether the objective fell below the configured tolerance.
  pub converged: bool,
  /// Objective value at the returned weights.
  pub objective: f64,
  /// True when the equal-weight fallback replaced the optimizer output.
  pub fallback: bool,
}

/// Budget-matching weight solver over an annualized covariance matrix.
#[derive(Clone, Debug, Default)]
pub struct RiskParitySolver {
  config: RiskParityConfig,
}

impl RiskParitySolver {
  /// Construct with explicit configuration. Bounds are validated here so a
  /// bad configuration fails before any run, not in the middle of one.
  pub fn new(config: RiskParityConfig) -> Result<Self, PortfolioError> {
    if !(0.0..=1.0).contains(&config.min_weight) || !(0.0..=1.0).contains(&config.max_weight) {
      return Err(PortfolioError::InvalidConfiguration(
        "weight bounds must lie in [0, 1]".to_string(),
      ));
    }
    if config.min_weight > config.max_weight {
      return Err(PortfolioError::InvalidConfiguration(format!(
        "min_weight {} exceeds max_weight {}",
        config.min_weight, config.max_weight
      )));
    }
    if config.lookback_period == 0 {
      return Err(PortfolioError::InvalidConfiguration(
        "lookback_period must be positive".to_string(),
      ));
    }

    Ok(Self { config })
  }

  pub fn config(&self) -> &RiskParityConfig {
    &self.config
  }

  /// Solve for weights matching `budget` under covariance `cov`.
  ///
  /// Fewer than 2 assets yields the empty outcome. Any optimizer failure
  /// falls back to equal weights across the asset set; callers always get a
  /// usable weight vector.
  pub fn solve(&self, cov: &[Vec<f64>], budget: &[f64]) -> SolverOutcome {
    let n = cov.len();
    if n < 2 {
      debug!(assets = n, "risk parity needs at least 2 assets");
      return SolverOutcome::default();
    }

    let budget: Vec<f64> = if budget.len() == n {
      budget.to_vec()
    } else {
      vec![1.0 / n as f64; n]
    };

    let equal = vec![1.0 / n as f64; n];
    if self.config.min_weight * n as f64 > 1.0 + 1e-9
      || self.config.max_weight * (n as f64) < 1.0 - 1e-9
    {
      warn!(
        assets = n,
        "weight bounds infeasible for asset count, using equal weights"
      );
      return SolverOutcome {
        objective: budget_deviation(&equal, cov, &budget),
        weights: equal,
        converged: false,
        fallback: true,
      };
    }

    struct RiskParityCost {
      cov: Vec<Vec<f64>>,
      budget: Vec<f64>,
    }

    impl CostFunction for RiskParityCost {
      type Param = Vec<f64>;
      type Output = f64;

      fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let w = softmax(x);
        let sigma_w = mat_vec_mul(&self.cov, &w);
        let port_var = dot(&w, &sigma_w);
        if port_var < VARIANCE_FLOOR {
          return Ok(1e10);
        }

        let mut err = 0.0;
        for i in 0..w.len() {
          let rc = w[i] * sigma_w[i] / port_var;
          err += (rc - self.budget[i]).powi(2);
        }
        Ok(err)
      }
    }

    let cost = RiskParityCost {
      cov: cov.to_vec(),
      budget: budget.clone(),
    };

    let x0 = vec![0.0; n];
    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(x0.clone());
    for i in 0..n {
      let mut point = x0.clone();
      point[i] = 1.0;
      simplex.push(point);
    }

    let equal_objective = budget_deviation(&equal, cov, &budget);

    let solved = match NelderMead::new(simplex).with_sd_tolerance(self.config.tolerance) {
      Ok(solver) => Executor::new(cost, solver)
        .configure(|state| state.max_iters(self.config.max_iters))
        .run()
        .ok()
        .and_then(|res| res.state.best_param)
        .map(|best| softmax(&best)),
      Err(_) => None,
    };

    let weights = solved.map(|w| {
      project_box_simplex(&w, self.config.min_weight, self.config.max_weight)
    });

    match weights {
      Some(w)
        if w.iter().all(|wi| wi.is_finite())
          && budget_deviation(&w, cov, &budget) <= equal_objective + 1e-15 =>
      {
        let objective = budget_deviation(&w, cov, &budget);
        SolverOutcome {
          converged: objective <= self.config.tolerance,
          objective,
          weights: w,
          fallback: false,
        }
      }
      _ => {
        warn!("risk parity optimization did not converge, using equal weights");
        SolverOutcome {
          objective: equal_objective,
          weights: equal,
          converged: false,
          fallback: true,
        }
      }
    }
  }

  /// End-to-end solve from price histories.
  ///
  /// `classes[i]` labels instrument `i` for budget mapping; pass an empty
  /// slice for unlabeled (uniform) budgeting. Instruments with fewer than
  /// [`MIN_RETURN_OBSERVATIONS`] prices are dropped first; fewer than 2
  /// survivors, or too short a common sample, yields the empty result.
  pub fn solve_for_series(
    &self,
    series: &[PriceSeries],
    classes: &[&str],
    budget: &RiskBudget,
  ) -> AllocationWeights {
    let labeled = classes.len() == series.len();

    let valid: Vec<usize> = (0..series.len())
      .filter(|&i| series[i].len() > MIN_RETURN_OBSERVATIONS)
      .collect();

    if valid.len() < 2 {
      warn!(
        valid = valid.len(),
        "insufficient instruments for risk parity"
      );
      return AllocationWeights::empty();
    }

    let returns: Vec<_> = valid
      .iter()
      .map(|&i| series[i].returns(ReturnMethod::Simple))
      .collect();
    let (dates, mut rows) = align_many(&returns);

    if dates.len() < MIN_RETURN_OBSERVATIONS {
      warn!(
        observations = dates.len(),
        "insufficient overlapping history for risk parity"
      );
      return AllocationWeights::empty();
    }

    for row in &mut rows {
      let skip = row.len().saturating_sub(self.config.lookback_period);
      row.drain(..skip);
    }

    let cov = annualized_covariance(&rows);
    let valid_classes: Vec<&str> = if labeled {
      valid.iter().map(|&i| classes[i]).collect()
    } else {
      vec![""; valid.len()]
    };
    let budget_vec = budget.per_instrument(&valid_classes);

    let outcome = self.solve(&cov, &budget_vec);
    if outcome.weights.is_empty() {
      return AllocationWeights::empty();
    }

    let codes = valid
      .iter()
      .map(|&i| series[i].code().to_string())
      .collect();

    match AllocationWeights::new(codes, outcome.weights) {
      Ok(w) => w,
      Err(_) => AllocationWeights::empty(),
    }
  }
}

/// Risk contribution per asset, as percentages summing to ~100.
///
/// `RC_i = w_i (\Sigma w)_i / w^T \Sigma w`, floored against zero variance.
pub fn risk_contributions(weights: &[f64], cov: &[Vec<f64>]) -> Vec<f64> {
  let n = weights.len();
  if n == 0 || cov.len() != n {
    return Vec::new();
  }

  let sigma_w = mat_vec_mul(cov, weights);
  let port_var = dot(weights, &sigma_w);
  if port_var < VARIANCE_FLOOR {
    return vec![0.0; n];
  }

  (0..n)
    .map(|i| weights[i] * sigma_w[i] / port_var * 100.0)
    .collect()
}

/// Score how closely realized contributions track the budget.
///
/// Per asset: `max(0, 100 - 10 * |RC_i - 100 b_i|)`, both sides in percent.
pub fn budget_alignment(contributions_pct: &[f64], budget: &[f64]) -> Vec<f64> {
  contributions_pct
    .iter()
    .zip(budget.iter())
    .map(|(rc, b)| (100.0 - (rc - b * 100.0).abs() * 10.0).max(0.0))
    .collect()
}

/// Ratio of weighted average asset volatility to portfolio volatility.
/// Greater than one means diversification is doing work.
pub fn diversification_ratio(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
  let n = weights.len();
  if n == 0 || cov.len() != n {
    return 0.0;
  }

  let sigma_w = mat_vec_mul(cov, weights);
  let port_vol = dot(weights, &sigma_w).max(0.0).sqrt();
  if port_vol < 1e-9 {
    return 0.0;
  }

  let weighted_vol: f64 = (0..n)
    .map(|i| weights[i] * cov[i][i].max(0.0).sqrt())
    .sum();
  weighted_vol / port_vol
}

/// Herfindahl concentration of normalized risk contributions; 1/n for a
/// perfectly even spread, 1.0 for a single dominant asset.
pub fn herfindahl_index(contributions: &[f64]) -> f64 {
  let total: f64 = contributions.iter().sum();
  if total.abs() < 1e-12 {
    return 0.0;
  }

  contributions.iter().map(|c| (c / total).powi(2)).sum()
}

/// Trade direction of a rebalancing signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
  Buy,
  Sell,
}

/// How far past the threshold the drift is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalUrgency {
  Medium,
  High,
}

/// One instrument's drift past the rebalancing threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSignal {
  pub code: String,
  pub action: TradeAction,
  pub current_weight: f64,
  pub target_weight: f64,
  pub deviation: f64,
  pub urgency: SignalUrgency,
}

/// Signals for instruments whose weight drifted at least `threshold`
/// (fraction, e.g. 0.05) away from target. Urgency is High past twice the
/// threshold.
pub fn rebalancing_signals(
  current: &AllocationWeights,
  target: &AllocationWeights,
  threshold: f64,
) -> Vec<RebalanceSignal> {
  let mut codes: Vec<&str> = current
    .codes()
    .iter()
    .chain(target.codes().iter())
    .map(String::as_str)
    .collect();
  codes.sort_unstable();
  codes.dedup();

  codes
    .into_iter()
    .filter_map(|code| {
      let cw = current.weight_of(code).unwrap_or(0.0);
      let tw = target.weight_of(code).unwrap_or(0.0);
      let deviation = tw - cw;

      if deviation.abs() < threshold {
        return None;
      }

      Some(RebalanceSignal {
        code: code.to_string(),
        action: if deviation > 0.0 {
          TradeAction::Buy
        } else {
          TradeAction::Sell
        },
        current_weight: cw,
        target_weight: tw,
        deviation,
        urgency: if deviation.abs() >= threshold * 2.0 {
          SignalUrgency::High
        } else {
          SignalUrgency::Medium
        },
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use tracing_test::traced_test;

  use super::*;

  fn sample_cov() -> Vec<Vec<f64>> {
    vec![
      vec![0.04, 0.01, 0.002],
      vec![0.01, 0.0025, 0.001],
      vec![0.002, 0.001, 0.0144],
    ]
  }

  #[test]
  fn weights_sum_to_one_and_respect_bounds() {
    let solver = RiskParitySolver::default();
    let cov = sample_cov();
    let budget = vec![1.0 / 3.0; 3];

    let outcome = solver.solve(&cov, &budget);
    let sum: f64 = outcome.weights.iter().sum();

    assert!((sum - 1.0).abs() < 1e-6);
    for w in &outcome.weights {
      assert!(*w >= solver.config().min_weight - 1e-9);
      assert!(*w <= solver.config().max_weight + 1e-9);
    }
  }

  #[test]
  fn risk_contributions_sum_to_hundred() {
    let solver = RiskParitySolver::default();
    let cov = sample_cov();
    let outcome = solver.solve(&cov, &[1.0 / 3.0; 3]);

    let rc = risk_contributions(&outcome.weights, &cov);
    let sum: f64 = rc.iter().sum();
    assert!((sum - 100.0).abs() < 1.0);
  }

  #[test]
  fn low_vol_asset_gets_more_weight_under_equal_budget() {
    let solver = RiskParitySolver::default();
    let cov = sample_cov();
    let outcome = solver.solve(&cov, &[1.0 / 3.0; 3]);

    // Asset 1 has by far the lowest variance, so parity overweights it.
    assert!(outcome.weights[1] > outcome.weights[0]);
    assert!(outcome.weights[1] > outcome.weights[2]);
  }

  #[test]
  fn equal_diagonal_covariance_yields_equal_weights() {
    let solver = RiskParitySolver::default();
    let cov = vec![
      vec![0.04, 0.0, 0.0],
      vec![0.0, 0.04, 0.0],
      vec![0.0, 0.0, 0.04],
    ];

    let outcome = solver.solve(&cov, &[1.0 / 3.0; 3]);
    for w in &outcome.weights {
      assert!((w - 1.0 / 3.0).abs() < 1e-3);
    }
  }

  #[test]
  fn fewer_than_two_assets_is_empty() {
    let solver = RiskParitySolver::default();
    let outcome = solver.solve(&[vec![0.04]], &[1.0]);
    assert!(outcome.weights.is_empty());
  }

  #[traced_test]
  #[test]
  fn singular_covariance_falls_back_to_equal_weights() {
    let solver = RiskParitySolver::default();
    let cov = vec![vec![0.0, 0.0], vec![0.0, 0.0]];

    let outcome = solver.solve(&cov, &[0.5, 0.5]);
    assert_eq!(outcome.weights.len(), 2);
    let sum: f64 = outcome.weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-9);
  }

  #[traced_test]
  #[test]
  fn infeasible_bounds_fall_back_with_warning() {
    let solver = RiskParitySolver::new(RiskParityConfig {
      min_weight: 0.4,
      max_weight: 0.45,
      ..RiskParityConfig::default()
    })
    .unwrap();

    let outcome = solver.solve(&sample_cov(), &[1.0 / 3.0; 3]);
    assert!(outcome.fallback);
    assert!(logs_contain("infeasible"));
  }

  #[test]
  fn invalid_bounds_are_rejected_at_construction() {
    let res = RiskParitySolver::new(RiskParityConfig {
      min_weight: 0.6,
      max_weight: 0.5,
      ..RiskParityConfig::default()
    });
    assert!(matches!(
      res,
      Err(PortfolioError::InvalidConfiguration(_))
    ));
  }

  #[test]
  fn projection_pins_violators_and_keeps_simplex() {
    let w = project_box_simplex(&[0.8, 0.15, 0.05], 0.1, 0.5);
    let sum: f64 = w.iter().sum();
    assert!((sum - 1.0).abs() < 1e-12);
    assert!(w.iter().all(|&wi| (0.1 - 1e-12..=0.5 + 1e-12).contains(&wi)));
  }

  #[test]
  fn alignment_score_decays_with_deviation() {
    let scores = budget_alignment(&[50.0, 30.0, 20.0], &[1.0 / 3.0; 3]);
    // 50% vs 33.3% target: |dev| = 16.67 -> score 0 would need dev >= 10.
    assert!(scores[0] < scores[2]);
    assert!(scores.iter().all(|s| (0.0..=100.0).contains(s)));
  }

  #[test]
  fn herfindahl_detects_concentration() {
    let even = herfindahl_index(&[25.0, 25.0, 25.0, 25.0]);
    let lopsided = herfindahl_index(&[85.0, 5.0, 5.0, 5.0]);
    assert!((even - 0.25).abs() < 1e-12);
    assert!(lopsided > even);
  }

  #[test]
  fn signals_only_fire_past_threshold() {
    let current = AllocationWeights::from_percent(&[("a", 50.0), ("b", 50.0)]).unwrap();
    let target = AllocationWeights::from_percent(&[("a", 62.0), ("b", 38.0)]).unwrap();

    let signals = rebalancing_signals(&current, &target, 0.05);
    assert_eq!(signals.len(), 2);
    let a = signals.iter().find(|s| s.code == "a").unwrap();
    assert_eq!(a.action, TradeAction::Buy);
    assert_eq!(a.urgency, SignalUrgency::High);

    let none = rebalancing_signals(&current, &current, 0.05);
    assert!(none.is_empty());
  }
}
