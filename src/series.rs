//! # Price & Return Series
//!
//! $$
//! r_t = \frac{P_t}{P_{t-1}} - 1, \qquad \tilde r_t = \ln\frac{P_t}{P_{t-1}}
//! $$
//!
//! Ordered daily close series per instrument and the return series derived
//! from them. Multi-asset operations work on the intersection of dates, so a
//! late-listing instrument shortens the common sample instead of injecting
//! phantom observations.

use chrono::NaiveDate;
use serde::Deserialize;
use serde::Serialize;

use crate::types::PortfolioError;
use crate::types::ReturnMethod;

/// One daily observation of an instrument.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
  pub date: NaiveDate,
  pub close: f64,
  pub volume: Option<f64>,
}

impl PricePoint {
  pub fn new(date: NaiveDate, close: f64) -> Self {
    Self {
      date,
      close,
      volume: None,
    }
  }
}

/// Immutable close-price history of a single instrument.
///
/// Invariants checked at construction: dates strictly increasing, closes
/// strictly positive and finite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
  code: String,
  points: Vec<PricePoint>,
}

impl PriceSeries {
  pub fn new(code: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, PortfolioError> {
    let code = code.into();

    for pair in points.windows(2) {
      if pair[1].date <= pair[0].date {
        return Err(PortfolioError::InvalidPriceSeries {
          code,
          reason: format!("dates not strictly increasing at {}", pair[1].date),
        });
      }
    }
    if let Some(p) = points.iter().find(|p| !(p.close.is_finite() && p.close > 0.0)) {
      return Err(PortfolioError::InvalidPriceSeries {
        code,
        reason: format!("non-positive close {} on {}", p.close, p.date),
      });
    }

    Ok(Self { code, points })
  }

  pub fn code(&self) -> &str {
    &self.code
  }

  pub fn points(&self) -> &[PricePoint] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn first_date(&self) -> Option<NaiveDate> {
    self.points.first().map(|p| p.date)
  }

  pub fn last_date(&self) -> Option<NaiveDate> {
    self.points.last().map(|p| p.date)
  }

  /// Derive the return series; length is `len() - 1`.
  pub fn returns(&self, method: ReturnMethod) -> ReturnSeries {
    let mut dates = Vec::with_capacity(self.points.len().saturating_sub(1));
    let mut values = Vec::with_capacity(self.points.len().saturating_sub(1));

    for pair in self.points.windows(2) {
      let ratio = pair[1].close / pair[0].close;
      let r = match method {
        ReturnMethod::Simple => ratio - 1.0,
        ReturnMethod::Log => ratio.ln(),
      };
      dates.push(pair[1].date);
      values.push(r);
    }

    ReturnSeries { dates, values }
  }
}

/// Dated return observations for one instrument or portfolio.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
  dates: Vec<NaiveDate>,
  values: Vec<f64>,
}

impl ReturnSeries {
  pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self, PortfolioError> {
    if dates.len() != values.len() {
      return Err(PortfolioError::InvalidConfiguration(
        "return series dates and values differ in length".to_string(),
      ));
    }
    Ok(Self { dates, values })
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn values(&self) -> &[f64] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Keep only the trailing `n` observations.
  pub fn tail(&self, n: usize) -> Self {
    let skip = self.len().saturating_sub(n);
    Self {
      dates: self.dates[skip..].to_vec(),
      values: self.values[skip..].to_vec(),
    }
  }

  /// Keep only observations dated at or before `date`.
  pub fn up_to(&self, date: NaiveDate) -> Self {
    let end = self.dates.partition_point(|d| *d <= date);
    Self {
      dates: self.dates[..end].to_vec(),
      values: self.values[..end].to_vec(),
    }
  }

  /// Pair up two series on their common dates.
  pub fn align(&self, other: &Self) -> (Vec<f64>, Vec<f64>) {
    let mut a = Vec::new();
    let mut b = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);

    while i < self.len() && j < other.len() {
      match self.dates[i].cmp(&other.dates[j]) {
        std::cmp::Ordering::Less => i += 1,
        std::cmp::Ordering::Greater => j += 1,
        std::cmp::Ordering::Equal => {
          a.push(self.values[i]);
          b.push(other.values[j]);
          i += 1;
          j += 1;
        }
      }
    }

    (a, b)
  }
}

/// Align many return series to their common dates.
///
/// Returns the shared date axis and one value row per input series, all of
/// equal length. Any empty input empties the intersection.
pub fn align_many(series: &[ReturnSeries]) -> (Vec<NaiveDate>, Vec<Vec<f64>>) {
  if series.is_empty() {
    return (Vec::new(), Vec::new());
  }

  let mut common: Vec<NaiveDate> = series[0].dates.clone();
  for s in &series[1..] {
    let set: std::collections::BTreeSet<NaiveDate> = s.dates.iter().copied().collect();
    common.retain(|d| set.contains(d));
  }

  let rows = series
    .iter()
    .map(|s| {
      common
        .iter()
        .map(|d| {
          let idx = s.dates.partition_point(|x| x < d);
          s.values[idx]
        })
        .collect()
    })
    .collect();

  (common, rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn series(code: &str, start: NaiveDate, closes: &[f64]) -> PriceSeries {
    let points = closes
      .iter()
      .enumerate()
      .map(|(i, c)| PricePoint::new(start + chrono::Days::new(i as u64), *c))
      .collect();
    PriceSeries::new(code, points).unwrap()
  }

  #[test]
  fn construction_rejects_unordered_dates() {
    let points = vec![
      PricePoint::new(day(2024, 1, 2), 100.0),
      PricePoint::new(day(2024, 1, 2), 101.0),
    ];
    assert!(PriceSeries::new("069500", points).is_err());
  }

  #[test]
  fn construction_rejects_non_positive_close() {
    let points = vec![
      PricePoint::new(day(2024, 1, 2), 100.0),
      PricePoint::new(day(2024, 1, 3), 0.0),
    ];
    assert!(PriceSeries::new("069500", points).is_err());
  }

  #[test]
  fn simple_and_log_returns_match_definitions() {
    let s = series("x", day(2024, 1, 1), &[100.0, 110.0, 99.0]);

    let simple = s.returns(ReturnMethod::Simple);
    assert_eq!(simple.len(), 2);
    assert!((simple.values()[0] - 0.10).abs() < 1e-12);
    assert!((simple.values()[1] - (99.0 / 110.0 - 1.0)).abs() < 1e-12);

    let log = s.returns(ReturnMethod::Log);
    assert!((log.values()[0] - (1.1f64).ln()).abs() < 1e-12);
  }

  #[test]
  fn align_keeps_common_dates_only() {
    let a = series("a", day(2024, 1, 1), &[100.0, 101.0, 102.0, 103.0]);
    // b starts one day later, so it misses a's first return date.
    let b = series("b", day(2024, 1, 2), &[50.0, 51.0, 52.0]);

    let (ra, rb) = a.returns(ReturnMethod::Simple).align(&b.returns(ReturnMethod::Simple));
    assert_eq!(ra.len(), 2);
    assert_eq!(rb.len(), 2);
  }

  #[test]
  fn align_many_produces_equal_rows() {
    let a = series("a", day(2024, 1, 1), &[100.0, 101.0, 102.0, 103.0, 104.0]);
    let b = series("b", day(2024, 1, 3), &[50.0, 51.0, 52.0]);

    let (dates, rows) = align_many(&[
      a.returns(ReturnMethod::Simple),
      b.returns(ReturnMethod::Simple),
    ]);
    assert_eq!(dates.len(), 2);
    assert!(rows.iter().all(|r| r.len() == dates.len()));
  }

  #[test]
  fn tail_and_up_to_window_the_series() {
    let s = series("x", day(2024, 1, 1), &[1.0, 2.0, 3.0, 4.0, 5.0]).returns(ReturnMethod::Simple);
    assert_eq!(s.tail(2).len(), 2);
    assert_eq!(s.up_to(day(2024, 1, 3)).len(), 2);
    assert_eq!(s.tail(100).len(), s.len());
  }
}
