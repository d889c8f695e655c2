//! # riskparity-rs
//!
//! Risk-parity portfolio construction, backtesting and performance
//! analytics over daily close prices.
//!
//! $$
//! RC_i = \frac{w_i (\Sigma \mathbf{w})_i}{\mathbf{w}^\top \Sigma \mathbf{w}}, \qquad \sum_i RC_i = 1
//! $$
//!
//! The crate is organized around four pieces: [`series`] holds validated
//! price/return histories, [`riskparity`] solves for budget-matching
//! weights over a covariance estimate from [`covariance`], [`metrics`]
//! scores a realized return series, and [`simulation`] ties them together
//! in a time-stepped backtest. Everything is synchronous and operates on
//! data the caller has already materialized.

pub mod covariance;
pub mod metrics;
pub mod riskparity;
pub mod series;
pub mod simulation;
pub mod types;

pub use crate::covariance::annualized_covariance;
pub use crate::covariance::correlation_matrix;
pub use crate::metrics::BenchmarkMetrics;
pub use crate::metrics::Drawdown;
pub use crate::metrics::MetricsEngine;
pub use crate::metrics::PerformanceReport;
pub use crate::metrics::RollingMetrics;
pub use crate::riskparity::budget_alignment;
pub use crate::riskparity::diversification_ratio;
pub use crate::riskparity::herfindahl_index;
pub use crate::riskparity::rebalancing_signals;
pub use crate::riskparity::risk_contributions;
pub use crate::riskparity::RebalanceSignal;
pub use crate::riskparity::RiskParityConfig;
pub use crate::riskparity::RiskParitySolver;
pub use crate::riskparity::SignalUrgency;
pub use crate::riskparity::SolverOutcome;
pub use crate::riskparity::TradeAction;
pub use crate::series::align_many;
pub use crate::series::PricePoint;
pub use crate::series::PriceSeries;
pub use crate::series::ReturnSeries;
pub use crate::simulation::run_simple_backtest;
pub use crate::simulation::run_strategy_backtest;
pub use crate::simulation::AllocationPolicy;
pub use crate::simulation::EngineState;
pub use crate::simulation::SimulationConfig;
pub use crate::simulation::SimulationEngine;
pub use crate::simulation::SimulationOutcome;
pub use crate::types::AllocationWeights;
pub use crate::types::PortfolioError;
pub use crate::types::RebalanceFrequency;
pub use crate::types::ReturnMethod;
pub use crate::types::RiskBudget;
pub use crate::types::RiskBudgetMethod;
