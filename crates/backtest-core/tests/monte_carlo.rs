mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use backtest_core::{
    BacktestConfig, BacktestEngine, BacktestError, MonteCarloConfig, MonteCarloSimulator,
    DEFAULT_SIMULATIONS,
};

fn backtest() -> backtest_core::BacktestResult {
    let (bars, signals) = common::trending_market(400, 8);
    let config = BacktestConfig {
        allow_short: true,
        ..Default::default()
    };
    BacktestEngine::new(config).unwrap().run(&bars, &signals).unwrap()
}

#[test]
fn test_shuffles_preserve_total_pnl() {
    common::init_tracing();
    let original = backtest();
    assert!(!original.trades.is_empty());

    let result = MonteCarloSimulator::new(MonteCarloConfig::default())
        .run(&original, DEFAULT_SIMULATIONS, 10.0)
        .unwrap();

    assert_eq!(result.simulations.len(), DEFAULT_SIMULATIONS);
    assert_eq!(result.requested_simulations, DEFAULT_SIMULATIONS);
    for sim in &result.simulations {
        assert_eq!(sim.total_pnl, original.total_pnl());
        assert_eq!(sim.final_capital, original.final_capital);
    }
    // Same trades, same sum: every ordering agrees on profitability.
    let expected = if original.total_pnl() > rust_decimal::Decimal::ZERO {
        1.0
    } else {
        0.0
    };
    assert_eq!(result.probability_of_profit, expected);
    assert!(result.return_confidence.lower <= result.return_confidence.upper);
    assert!(result.sharpe_confidence.lower <= result.sharpe_confidence.upper);
}

#[test]
fn test_results_reproducible_across_pool_sizes() {
    let original = backtest();
    let a = MonteCarloSimulator::new(MonteCarloConfig {
        seed: 9,
        workers: Some(1),
        timeout: None,
    })
    .run(&original, 100, 15.0)
    .unwrap();
    let b = MonteCarloSimulator::new(MonteCarloConfig {
        seed: 9,
        workers: Some(4),
        timeout: None,
    })
    .run(&original, 100, 15.0)
    .unwrap();
    assert_eq!(a, b);

    let c = MonteCarloSimulator::new(MonteCarloConfig {
        seed: 10,
        ..Default::default()
    })
    .run(&original, 100, 15.0)
    .unwrap();
    assert_eq!(c.simulations.len(), 100);
}

#[test]
fn test_cancel_flag_stops_run() {
    let original = backtest();
    let flag = Arc::new(AtomicBool::new(true));
    let result = MonteCarloSimulator::new(MonteCarloConfig::default())
        .with_cancel_flag(flag)
        .run(&original, 500, 10.0);
    assert!(matches!(result, Err(BacktestError::Cancelled)));
}
