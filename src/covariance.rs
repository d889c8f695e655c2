//! # Covariance Construction
//!
//! $$
//! \Sigma_{ij} = 252 \cdot \widehat{\operatorname{Cov}}(r_i, r_j)
//! $$
//!
//! Annualized sample covariance and correlation matrices over aligned daily
//! return rows. Matrices are rebuilt from scratch whenever the lookback
//! window moves; nothing here mutates in place.

use crate::types::TRADING_DAYS_PER_YEAR;

fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

fn sample_covariance(x: &[f64], y: &[f64]) -> f64 {
  let n = x.len().min(y.len());
  if n < 2 {
    return 0.0;
  }

  let mx = sample_mean(x);
  let my = sample_mean(y);

  let mut acc = 0.0;
  for i in 0..n {
    acc += (x[i] - mx) * (y[i] - my);
  }
  acc / (n - 1) as f64
}

/// Annualized covariance matrix from aligned daily return rows.
///
/// Symmetric positive-semidefinite by construction; daily sample covariance
/// (ddof = 1) scaled by 252. Fewer than 2 observations yields the zero
/// matrix, which downstream consumers treat as insufficient data.
pub fn annualized_covariance(aligned: &[Vec<f64>]) -> Vec<Vec<f64>> {
  let n = aligned.len();
  let mut cov = vec![vec![0.0; n]; n];

  for i in 0..n {
    for j in i..n {
      let c = sample_covariance(&aligned[i], &aligned[j]) * TRADING_DAYS_PER_YEAR;
      cov[i][j] = c;
      cov[j][i] = c;
    }
  }

  cov
}

/// Pearson correlation matrix from aligned daily return rows.
pub fn correlation_matrix(aligned: &[Vec<f64>]) -> Vec<Vec<f64>> {
  let n = aligned.len();
  let mut corr = vec![vec![1.0; n]; n];

  for i in 0..n {
    for j in (i + 1)..n {
      let cij = sample_covariance(&aligned[i], &aligned[j]);
      let vi = sample_covariance(&aligned[i], &aligned[i]);
      let vj = sample_covariance(&aligned[j], &aligned[j]);
      let denom = (vi * vj).sqrt();
      let r = if denom > 1e-15 {
        (cij / denom).clamp(-1.0, 1.0)
      } else {
        0.0
      };
      corr[i][j] = r;
      corr[j][i] = r;
    }
  }

  corr
}
