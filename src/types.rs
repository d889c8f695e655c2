//! # Portfolio Types
//!
//! $$
//! \sum_i w_i = 1, \quad \sum_i b_i = 1
//! $$
//!
//! Shared enums, weight/budget containers and the crate error type.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Annualization factor for daily observations.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Tolerance applied to "sums to one" invariants.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Crate error type. Only configuration-class problems surface as `Err`;
/// recoverable conditions (insufficient data, non-convergence, missing
/// quotes) produce neutral results and a log line instead.
#[derive(Debug, Error)]
pub enum PortfolioError {
  #[error("invalid configuration: {0}")]
  InvalidConfiguration(String),

  #[error("invalid price series `{code}`: {reason}")]
  InvalidPriceSeries { code: String, reason: String },

  #[error("no price data inside the simulation window")]
  NoPriceData,

  #[error("simulation has already completed")]
  AlreadyCompleted,
}

/// Return computation method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnMethod {
  /// Simple periodic return `P_t / P_{t-1} - 1`.
  #[default]
  Simple,
  /// Log return `ln(P_t / P_{t-1})`.
  Log,
}

/// Portfolio rebalancing cadence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceFrequency {
  /// Buy once at the start, never trade again.
  Never,
  #[default]
  Monthly,
  Quarterly,
  Annually,
}

impl RebalanceFrequency {
  /// Parse a cadence from a string, defaulting to monthly.
  pub fn from_str(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "never" | "none" => Self::Never,
      "quarterly" | "quarter" => Self::Quarterly,
      "annually" | "annual" | "yearly" => Self::Annually,
      _ => Self::Monthly,
    }
  }
}

/// Built-in risk budgeting schemes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RiskBudgetMethod {
  /// Every instrument targets the same share of portfolio variance.
  #[default]
  Equal,
  /// Strategic allocation tilted toward global equity risk.
  Strategic,
  /// Defensive allocation tilted toward bond risk.
  Conservative,
}

impl RiskBudgetMethod {
  /// Parse a budgeting scheme from a string, defaulting to equal.
  pub fn from_str(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "strategic" => Self::Strategic,
      "conservative" => Self::Conservative,
      _ => Self::Equal,
    }
  }
}

const STRATEGIC_BUDGET: &[(&str, f64)] = &[
  ("domestic_equity", 0.15),
  ("us_equity", 0.20),
  ("developed_equity", 0.15),
  ("emerging_equity", 0.10),
  ("government_bond", 0.15),
  ("foreign_bond", 0.10),
  ("high_yield_bond", 0.05),
  ("reit", 0.05),
  ("commodity", 0.05),
];

const CONSERVATIVE_BUDGET: &[(&str, f64)] = &[
  ("domestic_equity", 0.10),
  ("us_equity", 0.15),
  ("developed_equity", 0.10),
  ("emerging_equity", 0.05),
  ("government_bond", 0.25),
  ("foreign_bond", 0.20),
  ("high_yield_bond", 0.10),
  ("reit", 0.03),
  ("commodity", 0.02),
];

/// Target share of total portfolio variance per asset-class label.
///
/// An empty target table means uniform budgeting over whatever instrument
/// set it is applied to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RiskBudget {
  targets: Vec<(String, f64)>,
}

impl RiskBudget {
  /// Budget for one of the built-in schemes.
  pub fn from_method(method: RiskBudgetMethod) -> Self {
    let table = match method {
      RiskBudgetMethod::Equal => return Self::default(),
      RiskBudgetMethod::Strategic => STRATEGIC_BUDGET,
      RiskBudgetMethod::Conservative => CONSERVATIVE_BUDGET,
    };

    Self {
      targets: table
        .iter()
        .map(|(label, b)| (label.to_string(), *b))
        .collect(),
    }
  }

  /// Custom budget. Fractions must lie in `[0, 1]` and sum to one.
  pub fn custom(targets: Vec<(String, f64)>) -> Result<Self, PortfolioError> {
    let sum: f64 = targets.iter().map(|(_, b)| *b).sum();

    if targets.iter().any(|(_, b)| !(0.0..=1.0).contains(b)) {
      return Err(PortfolioError::InvalidConfiguration(
        "risk budget fractions must lie in [0, 1]".to_string(),
      ));
    }
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
      return Err(PortfolioError::InvalidConfiguration(format!(
        "risk budget fractions must sum to 1.0, got {sum}"
      )));
    }

    Ok(Self { targets })
  }

  /// Target fraction for a single asset-class label, if present.
  pub fn target_for(&self, label: &str) -> Option<f64> {
    self
      .targets
      .iter()
      .find(|(l, _)| l == label)
      .map(|(_, b)| *b)
  }

  /// Map the budget onto an ordered instrument set.
  ///
  /// `classes[i]` is the asset-class label of instrument `i`. Labels absent
  /// from the target table fall back to `1/n`; the result is renormalized to
  /// sum to one. An empty table yields the uniform budget.
  pub fn per_instrument(&self, classes: &[&str]) -> Vec<f64> {
    let n = classes.len();
    if n == 0 {
      return Vec::new();
    }

    let uniform = 1.0 / n as f64;
    if self.targets.is_empty() {
      return vec![uniform; n];
    }

    let mut budget: Vec<f64> = classes
      .iter()
      .map(|label| self.target_for(label).unwrap_or(uniform))
      .collect();

    let sum: f64 = budget.iter().sum();
    if sum > 1e-12 {
      for b in &mut budget {
        *b /= sum;
      }
    } else {
      budget = vec![uniform; n];
    }

    budget
  }
}

/// Portfolio weights per instrument code, as fractions summing to one.
///
/// An empty container is the "insufficient data" result and is always valid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationWeights {
  codes: Vec<String>,
  weights: Vec<f64>,
}

impl AllocationWeights {
  /// Build from parallel code/weight vectors. Weights must be finite,
  /// non-negative fractions summing to one.
  pub fn new(codes: Vec<String>, weights: Vec<f64>) -> Result<Self, PortfolioError> {
    if codes.len() != weights.len() {
      return Err(PortfolioError::InvalidConfiguration(
        "weight vector length does not match instrument count".to_string(),
      ));
    }
    if codes.is_empty() {
      return Ok(Self::default());
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
      return Err(PortfolioError::InvalidConfiguration(
        "weights must be finite and non-negative".to_string(),
      ));
    }

    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
      return Err(PortfolioError::InvalidConfiguration(format!(
        "weights must sum to 1.0, got {sum}"
      )));
    }

    Ok(Self { codes, weights })
  }

  /// Build from `(code, percent)` pairs summing to 100.
  pub fn from_percent(pairs: &[(&str, f64)]) -> Result<Self, PortfolioError> {
    let codes = pairs.iter().map(|(c, _)| c.to_string()).collect();
    let weights = pairs.iter().map(|(_, p)| p / 100.0).collect();
    Self::new(codes, weights)
  }

  /// The empty result.
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn codes(&self) -> &[String] {
    &self.codes
  }

  pub fn weights(&self) -> &[f64] {
    &self.weights
  }

  pub fn len(&self) -> usize {
    self.codes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.codes.is_empty()
  }

  /// Weight of a single instrument, if present.
  pub fn weight_of(&self, code: &str) -> Option<f64> {
    self
      .codes
      .iter()
      .position(|c| c == code)
      .map(|i| self.weights[i])
  }

  /// Iterate `(code, weight)` pairs in instrument order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self
      .codes
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn custom_budget_rejects_bad_sum() {
    let res = RiskBudget::custom(vec![("equity".to_string(), 0.7), ("bond".to_string(), 0.2)]);
    assert!(matches!(
      res,
      Err(PortfolioError::InvalidConfiguration(_))
    ));
  }

  #[test]
  fn custom_budget_rejects_out_of_range_fraction() {
    let res = RiskBudget::custom(vec![
      ("equity".to_string(), 1.3),
      ("bond".to_string(), -0.3),
    ]);
    assert!(res.is_err());
  }

  #[test]
  fn per_instrument_budget_normalizes_known_labels() {
    let budget = RiskBudget::from_method(RiskBudgetMethod::Strategic);
    let mapped = budget.per_instrument(&["us_equity", "government_bond"]);

    let sum: f64 = mapped.iter().sum();
    assert!((sum - 1.0).abs() < 1e-12);
    // 0.20 vs 0.15 before normalization, ordering must survive.
    assert!(mapped[0] > mapped[1]);
  }

  #[test]
  fn per_instrument_budget_defaults_unknown_labels() {
    let budget = RiskBudget::from_method(RiskBudgetMethod::Equal);
    let mapped = budget.per_instrument(&["a", "b", "c"]);
    assert_eq!(mapped, vec![1.0 / 3.0; 3]);
  }

  #[test]
  fn weights_must_sum_to_one() {
    let res = AllocationWeights::new(
      vec!["a".to_string(), "b".to_string()],
      vec![0.6, 0.6],
    );
    assert!(res.is_err());

    let ok = AllocationWeights::new(
      vec!["a".to_string(), "b".to_string()],
      vec![0.6, 0.4],
    )
    .unwrap();
    assert_eq!(ok.weight_of("b"), Some(0.4));
  }

  #[test]
  fn percent_constructor_converts_to_fractions() {
    let w = AllocationWeights::from_percent(&[("a", 40.0), ("b", 35.0), ("c", 25.0)]).unwrap();
    assert!((w.weights().iter().sum::<f64>() - 1.0).abs() < 1e-12);
    assert_eq!(w.weight_of("a"), Some(0.4));
  }

  #[test]
  fn frequency_parsing_defaults_to_monthly() {
    assert_eq!(RebalanceFrequency::from_str("never"), RebalanceFrequency::Never);
    assert_eq!(
      RebalanceFrequency::from_str("quarterly"),
      RebalanceFrequency::Quarterly
    );
    assert_eq!(RebalanceFrequency::from_str("whatever"), RebalanceFrequency::Monthly);
  }
}
