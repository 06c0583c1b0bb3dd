pub mod circuit_breaker;
pub mod commission;
pub mod config;
pub mod cost_model;
pub mod data_quality;
pub mod engine;
pub mod equity;
pub mod error;
pub mod exit_rules;
pub mod market_impact;
pub mod metrics;
pub mod models;
pub mod monte_carlo;
pub mod trade_stats;
pub mod trailing_stop;
pub mod walk_forward;


pub use config::{BacktestConfig, CommissionTier, ExecutionConfig};
pub use cost_model::{ExecutionCostModel, RealisticCostModel, SimpleCostModel};
pub use engine::BacktestEngine;
pub use error::{BacktestError, Result};
pub use metrics::compute_metrics;
pub use models::*;
pub use monte_carlo::{MonteCarloConfig, MonteCarloSimulator, DEFAULT_SIMULATIONS};
pub use walk_forward::WalkForwardAnalyzer;
