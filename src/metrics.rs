//! # Performance Metrics
//!
//! $$
//! \text{Sharpe} = \frac{\mathbb E[r - r_f]}{\sigma(r - r_f)} \sqrt{252}
//! $$
//!
//! Risk/return statistics over a daily return series, optionally paired with
//! a benchmark. Every function returns a neutral default on empty or
//! degenerate input instead of failing, so a dashboard can render partial
//! history. Dispersion statistics use the sample standard deviation
//! (ddof = 1) throughout.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;

use crate::series::ReturnSeries;
use crate::types::TRADING_DAYS_PER_YEAR;

fn mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

/// Sample standard deviation (ddof = 1); 0.0 below 2 observations.
fn sample_std(xs: &[f64]) -> f64 {
  if xs.len() < 2 {
    return 0.0;
  }

  let m = mean(xs);
  let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
  var.sqrt()
}

fn sample_cov(x: &[f64], y: &[f64]) -> f64 {
  let n = x.len().min(y.len());
  if n < 2 {
    return 0.0;
  }

  let mx = mean(x);
  let my = mean(y);
  (0..n).map(|i| (x[i] - mx) * (y[i] - my)).sum::<f64>() / (n - 1) as f64
}

/// Linearly interpolated percentile, `q` in `[0, 1]`.
fn percentile(xs: &[f64], q: f64) -> f64 {
  if xs.is_empty() {
    return 0.0;
  }

  let mut sorted = xs.to_vec();
  sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

  let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
  let lo = rank.floor() as usize;
  let hi = rank.ceil() as usize;
  if lo == hi {
    sorted[lo]
  } else {
    sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
  }
}

/// Worst peak-to-trough decline of the compounded curve, as a fraction.
/// The running peak starts at the first observation, same baseline as
/// [`MetricsEngine::max_drawdown`].
fn worst_drawdown(values: &[f64]) -> f64 {
  let mut wealth = 1.0f64;
  let mut peak = 0.0f64;
  let mut worst = 0.0f64;

  for r in values {
    wealth *= 1.0 + r;
    if wealth > peak {
      peak = wealth;
    }
    worst = worst.min((wealth - peak) / peak);
  }
  worst
}

/// Maximum drawdown of the cumulative return curve, with its window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Drawdown {
  /// Worst peak-to-trough decline, as a non-positive fraction.
  pub max_drawdown: f64,
  pub start: Option<NaiveDate>,
  pub end: Option<NaiveDate>,
  /// Calendar days between peak and trough.
  pub duration_days: i64,
}

/// Benchmark-relative statistics, present when a benchmark was supplied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
  pub beta: f64,
  pub alpha: f64,
  pub information_ratio: f64,
  pub tracking_error: f64,
  pub treynor_ratio: f64,
  pub hit_ratio: f64,
}

/// Immutable snapshot of all computed metrics plus the return series they
/// were computed from. Pure function of its inputs; recomputing on the same
/// series yields an identical report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
  pub total_return: f64,
  pub annualized_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
  pub sortino_ratio: f64,
  pub calmar_ratio: f64,
  pub drawdown: Drawdown,
  pub var_95: f64,
  pub cvar_95: f64,
  pub skewness: f64,
  pub kurtosis: f64,
  pub win_rate: f64,
  pub observations: usize,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  pub benchmark: Option<BenchmarkMetrics>,
  pub returns: ReturnSeries,
}

/// Trailing-window statistics, one row per date from the first full window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingMetrics {
  pub dates: Vec<NaiveDate>,
  pub annualized_return: Vec<f64>,
  pub volatility: Vec<f64>,
  pub sharpe_ratio: Vec<f64>,
  pub max_drawdown: Vec<f64>,
}

impl RollingMetrics {
  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }
}

/// Metrics calculator with a fixed annualization basis of 252 trading days.
#[derive(Clone, Copy, Debug)]
pub struct MetricsEngine {
  /// Annual risk-free rate as a fraction.
  pub risk_free_rate: f64,
}

impl Default for MetricsEngine {
  fn default() -> Self {
    Self {
      risk_free_rate: 0.02,
    }
  }
}

impl MetricsEngine {
  pub fn new(risk_free_rate: f64) -> Self {
    Self { risk_free_rate }
  }

  fn daily_risk_free(&self) -> f64 {
    self.risk_free_rate / TRADING_DAYS_PER_YEAR
  }

  /// Compounded return over the whole series.
  pub fn total_return(&self, returns: &[f64]) -> f64 {
    if returns.is_empty() {
      return 0.0;
    }
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
  }

  /// Cumulative return curve, same length as the input.
  pub fn cumulative_returns(&self, returns: &[f64]) -> Vec<f64> {
    let mut acc = 1.0;
    returns
      .iter()
      .map(|r| {
        acc *= 1.0 + r;
        acc - 1.0
      })
      .collect()
  }

  /// Geometric annualization over 252 periods per year.
  pub fn annualized_return(&self, returns: &[f64]) -> f64 {
    if returns.is_empty() {
      return 0.0;
    }

    let total = self.total_return(returns);
    (1.0 + total).powf(TRADING_DAYS_PER_YEAR / returns.len() as f64) - 1.0
  }

  /// Annualized sample volatility.
  pub fn volatility(&self, returns: &[f64]) -> f64 {
    sample_std(returns) * TRADING_DAYS_PER_YEAR.sqrt()
  }

  pub fn sharpe_ratio(&self, returns: &[f64]) -> f64 {
    if returns.is_empty() {
      return 0.0;
    }

    let rf = self.daily_risk_free();
    let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
    let std = sample_std(&excess);
    if std < 1e-12 {
      return 0.0;
    }

    mean(&excess) / std * TRADING_DAYS_PER_YEAR.sqrt()
  }

  /// Sortino ratio against a zero target. With no downside periods the
  /// result is +inf when mean excess return is positive, else 0.
  pub fn sortino_ratio(&self, returns: &[f64]) -> f64 {
    if returns.is_empty() {
      return 0.0;
    }

    let rf = self.daily_risk_free();
    let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
    let downside: Vec<f64> = excess.iter().copied().filter(|e| *e < 0.0).collect();

    if downside.is_empty() {
      return if mean(&excess) > 0.0 { f64::INFINITY } else { 0.0 };
    }

    let downside_dev = mean(&downside.iter().map(|d| d * d).collect::<Vec<_>>()).sqrt();
    if downside_dev < 1e-12 {
      return 0.0;
    }

    mean(&excess) / downside_dev * TRADING_DAYS_PER_YEAR.sqrt()
  }

  /// Maximum drawdown over the cumulative curve, with peak/trough dates and
  /// calendar-day duration. Exactly zero for a non-decreasing curve.
  pub fn max_drawdown(&self, returns: &ReturnSeries) -> Drawdown {
    if returns.is_empty() {
      return Drawdown::default();
    }

    let cum = self.cumulative_returns(returns.values());
    let dates = returns.dates();

    let mut peak = cum[0];
    let mut peak_idx = 0usize;
    let mut worst = 0.0f64;
    let mut worst_start = 0usize;
    let mut worst_end = 0usize;

    for (i, &c) in cum.iter().enumerate() {
      if c > peak {
        peak = c;
        peak_idx = i;
      }
      let dd = (c - peak) / (1.0 + peak);
      if dd < worst {
        worst = dd;
        worst_start = peak_idx;
        worst_end = i;
      }
    }

    let (start, end) = if worst < 0.0 {
      (Some(dates[worst_start]), Some(dates[worst_end]))
    } else {
      (None, None)
    };
    let duration_days = match (start, end) {
      (Some(s), Some(e)) => e.signed_duration_since(s).num_days(),
      _ => 0,
    };

    Drawdown {
      max_drawdown: worst,
      start,
      end,
      duration_days,
    }
  }

  /// Annualized return over absolute max drawdown; +inf when there is no
  /// drawdown and returns are positive.
  pub fn calmar_ratio(&self, returns: &ReturnSeries) -> f64 {
    let annualized = self.annualized_return(returns.values());
    let dd = self.max_drawdown(returns).max_drawdown.abs();

    if dd < 1e-12 {
      return if annualized > 0.0 { f64::INFINITY } else { 0.0 };
    }
    annualized / dd
  }

  /// Historical VaR at tail probability `alpha` (default callers use 0.05).
  pub fn var(&self, returns: &[f64], alpha: f64) -> f64 {
    percentile(returns, alpha)
  }

  /// Mean of returns at or below VaR; by construction not above VaR.
  pub fn cvar(&self, returns: &[f64], alpha: f64) -> f64 {
    if returns.is_empty() {
      return 0.0;
    }

    let var = self.var(returns, alpha);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
      var
    } else {
      mean(&tail)
    }
  }

  /// Population skewness of the return distribution.
  pub fn skewness(&self, returns: &[f64]) -> f64 {
    if returns.len() < 2 {
      return 0.0;
    }

    let m = mean(returns);
    let n = returns.len() as f64;
    let m2 = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / n;
    let m3 = returns.iter().map(|r| (r - m).powi(3)).sum::<f64>() / n;

    if m2 < 1e-18 {
      0.0
    } else {
      m3 / m2.powf(1.5)
    }
  }

  /// Excess (Fisher) kurtosis of the return distribution.
  pub fn kurtosis(&self, returns: &[f64]) -> f64 {
    if returns.len() < 2 {
      return 0.0;
    }

    let m = mean(returns);
    let n = returns.len() as f64;
    let m2 = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / n;
    let m4 = returns.iter().map(|r| (r - m).powi(4)).sum::<f64>() / n;

    if m2 < 1e-18 {
      0.0
    } else {
      m4 / (m2 * m2) - 3.0
    }
  }

  /// Fraction of periods with a strictly positive return.
  pub fn win_rate(&self, returns: &[f64]) -> f64 {
    if returns.is_empty() {
      return 0.0;
    }
    returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
  }

  /// CAPM beta on date-aligned returns; 1.0 when the benchmark is flat or
  /// the overlap is degenerate (a safe neutral default).
  pub fn beta(&self, asset: &ReturnSeries, benchmark: &ReturnSeries) -> f64 {
    let (a, b) = asset.align(benchmark);
    if a.len() < 2 {
      return 1.0;
    }

    let bench_var = sample_cov(&b, &b);
    if bench_var < 1e-15 {
      return 1.0;
    }

    sample_cov(&a, &b) / bench_var
  }

  /// CAPM alpha: annualized asset return over the beta-scaled benchmark.
  pub fn alpha(&self, asset: &ReturnSeries, benchmark: &ReturnSeries) -> f64 {
    let beta = self.beta(asset, benchmark);
    let asset_annual = self.annualized_return(asset.values());
    let bench_annual = self.annualized_return(benchmark.values());

    asset_annual - (self.risk_free_rate + beta * (bench_annual - self.risk_free_rate))
  }

  /// Mean active return over its sample deviation, annualized; 0 when the
  /// tracking error vanishes.
  pub fn information_ratio(&self, asset: &ReturnSeries, benchmark: &ReturnSeries) -> f64 {
    let (a, b) = asset.align(benchmark);
    if a.is_empty() {
      return 0.0;
    }

    let active: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
    let std = sample_std(&active);
    if std < 1e-12 {
      return 0.0;
    }

    mean(&active) / std * TRADING_DAYS_PER_YEAR.sqrt()
  }

  /// Annualized sample deviation of active returns.
  pub fn tracking_error(&self, asset: &ReturnSeries, benchmark: &ReturnSeries) -> f64 {
    let (a, b) = asset.align(benchmark);
    if a.is_empty() {
      return 0.0;
    }

    let active: Vec<f64> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
    sample_std(&active) * TRADING_DAYS_PER_YEAR.sqrt()
  }

  /// Annualized excess return per unit of beta; 0 when beta vanishes.
  pub fn treynor_ratio(&self, asset: &ReturnSeries, benchmark: &ReturnSeries) -> f64 {
    let beta = self.beta(asset, benchmark);
    if beta.abs() < 1e-12 {
      return 0.0;
    }

    (self.annualized_return(asset.values()) - self.risk_free_rate) / beta
  }

  /// Fraction of aligned periods in which the asset beat the benchmark.
  pub fn hit_ratio(&self, asset: &ReturnSeries, benchmark: &ReturnSeries) -> f64 {
    let (a, b) = asset.align(benchmark);
    if a.is_empty() {
      return 0.0;
    }

    a.iter().zip(b.iter()).filter(|(x, y)| x > y).count() as f64 / a.len() as f64
  }

  /// Annualized return, volatility, Sharpe and max drawdown over a trailing
  /// window, evaluated at every date once the window is full. Fewer
  /// observations than the window, or a window below 2, yields the empty
  /// result.
  pub fn rolling_metrics(&self, returns: &ReturnSeries, window: usize) -> RollingMetrics {
    let values = returns.values();
    if window < 2 || values.len() < window {
      return RollingMetrics::default();
    }

    let mut rolling = RollingMetrics::default();
    for end in window..=values.len() {
      let slice = &values[end - window..end];
      rolling.dates.push(returns.dates()[end - 1]);
      rolling.annualized_return.push(self.annualized_return(slice));
      rolling.volatility.push(self.volatility(slice));
      rolling.sharpe_ratio.push(self.sharpe_ratio(slice));
      rolling.max_drawdown.push(worst_drawdown(slice));
    }
    rolling
  }

  /// Assemble the full report. The benchmark block is present only when a
  /// benchmark series was supplied.
  pub fn report(
    &self,
    returns: &ReturnSeries,
    benchmark: Option<&ReturnSeries>,
  ) -> PerformanceReport {
    let values = returns.values();

    let benchmark = benchmark.map(|bench| BenchmarkMetrics {
      beta: self.beta(returns, bench),
      alpha: self.alpha(returns, bench),
      information_ratio: self.information_ratio(returns, bench),
      tracking_error: self.tracking_error(returns, bench),
      treynor_ratio: self.treynor_ratio(returns, bench),
      hit_ratio: self.hit_ratio(returns, bench),
    });

    PerformanceReport {
      total_return: self.total_return(values),
      annualized_return: self.annualized_return(values),
      volatility: self.volatility(values),
      sharpe_ratio: self.sharpe_ratio(values),
      sortino_ratio: self.sortino_ratio(values),
      calmar_ratio: self.calmar_ratio(returns),
      drawdown: self.max_drawdown(returns),
      var_95: self.var(values, 0.05),
      cvar_95: self.cvar(values, 0.05),
      skewness: self.skewness(values),
      kurtosis: self.kurtosis(values),
      win_rate: self.win_rate(values),
      observations: values.len(),
      start_date: returns.dates().first().copied(),
      end_date: returns.dates().last().copied(),
      benchmark,
      returns: returns.clone(),
    }
  }
}
