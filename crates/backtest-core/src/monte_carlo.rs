use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::{BacktestError, Result};
use crate::metrics::{calendar_span_days, compute_metrics, percentile_sorted, sorted_copy};
use crate::models::*;

pub const DEFAULT_SIMULATIONS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonteCarloConfig {
    /// Base seed; simulation `k` draws from stream `k` of this seed.
    pub seed: u64,
    /// Size of a dedicated thread pool. `None` uses the global rayon pool.
    pub workers: Option<usize>,
    /// Simulations not started before the timeout are skipped.
    pub timeout: Option<Duration>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            workers: None,
            timeout: None,
        }
    }
}

/// Trade-order Monte Carlo: replays a finished backtest's trades in shuffled
/// order to see how much of its outcome was down to sequencing.
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl MonteCarloSimulator {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Share a flag that stops the run when set. Simulations already in
    /// flight finish; the rest are skipped.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn run(
        &self,
        original: &BacktestResult,
        num_simulations: usize,
        max_drawdown_threshold: f64,
    ) -> Result<MonteCarloResult> {
        if !max_drawdown_threshold.is_finite() || max_drawdown_threshold < 0.0 {
            return Err(BacktestError::InvalidInput(format!(
                "max drawdown threshold must be a non-negative percent, got {}",
                max_drawdown_threshold
            )));
        }
        if self.config.workers == Some(0) {
            return Err(BacktestError::InvalidInput(
                "worker count must be at least 1".to_string(),
            ));
        }
        if num_simulations == 0 {
            return Ok(empty_result(original, max_drawdown_threshold));
        }

        info!(
            simulations = num_simulations,
            trades = original.trades.len(),
            seed = self.config.seed,
            "Starting Monte Carlo simulation"
        );

        let simulations = match self.config.workers {
            Some(workers) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| BacktestError::ThreadPool(e.to_string()))?;
                pool.install(|| self.simulate_all(original, num_simulations))
            }
            None => self.simulate_all(original, num_simulations),
        };

        if simulations.is_empty() {
            warn!("Monte Carlo run cancelled before any simulation completed");
            return Err(BacktestError::Cancelled);
        }
        let cancelled = simulations.len() < num_simulations;
        if cancelled {
            warn!(
                completed = simulations.len(),
                requested = num_simulations,
                "Monte Carlo run stopped early"
            );
        }

        Ok(aggregate(
            original,
            num_simulations,
            simulations,
            max_drawdown_threshold,
            cancelled,
        ))
    }

    fn simulate_all(
        &self,
        original: &BacktestResult,
        num_simulations: usize,
    ) -> Vec<MonteCarloSimulation> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let days = calendar_span_days(
            &original.start_date,
            &original.end_date,
            original.bars_processed,
        );

        (0..num_simulations)
            .into_par_iter()
            .filter_map(|k| {
                if self.should_stop(deadline) {
                    return None;
                }
                Some(simulate(original, self.config.seed, k, days))
            })
            .collect()
    }

    fn should_stop(&self, deadline: Option<Instant>) -> bool {
        let cancelled = self
            .cancel
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false);
        cancelled || deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

/// Replay the trades in the order drawn from stream `k` of `seed`.
fn simulate(original: &BacktestResult, seed: u64, k: usize, days: f64) -> MonteCarloSimulation {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(k as u64);

    let mut trades = original.trades.clone();
    trades.shuffle(&mut rng);

    let mut equity = original.initial_capital;
    let mut curve = Vec::with_capacity(trades.len() + 1);
    curve.push(equity);
    for trade in &trades {
        equity += trade.pnl;
        curve.push(equity);
    }

    let metrics = compute_metrics(&trades, &curve, &original.config, days);
    let total_pnl: Decimal = trades.iter().map(|t| t.pnl).sum();

    MonteCarloSimulation {
        index: k,
        total_return: metrics.total_return,
        max_drawdown: metrics.max_drawdown,
        sharpe_ratio: metrics.sharpe_ratio,
        total_pnl,
        final_capital: equity,
    }
}

fn aggregate(
    original: &BacktestResult,
    requested: usize,
    simulations: Vec<MonteCarloSimulation>,
    threshold: f64,
    cancelled: bool,
) -> MonteCarloResult {
    let n = simulations.len() as f64;
    let profitable = simulations.iter().filter(|s| s.total_return > 0.0).count();
    let deep_drawdowns = simulations.iter().filter(|s| s.max_drawdown > threshold).count();

    let returns = sorted_copy(&simulations.iter().map(|s| s.total_return).collect::<Vec<_>>());
    let drawdowns = sorted_copy(&simulations.iter().map(|s| s.max_drawdown).collect::<Vec<_>>());
    let sharpes = sorted_copy(&simulations.iter().map(|s| s.sharpe_ratio).collect::<Vec<_>>());

    let interval = |sorted: &[f64]| ConfidenceInterval {
        lower: percentile_sorted(sorted, 5.0),
        upper: percentile_sorted(sorted, 95.0),
    };

    MonteCarloResult {
        original_result: original.clone(),
        requested_simulations: requested,
        probability_of_profit: profitable as f64 / n,
        probability_of_drawdown: deep_drawdowns as f64 / n,
        max_drawdown_threshold: threshold,
        return_confidence: interval(&returns),
        drawdown_confidence: interval(&drawdowns),
        sharpe_confidence: interval(&sharpes),
        median_return: percentile_sorted(&returns, 50.0),
        median_max_drawdown: percentile_sorted(&drawdowns, 50.0),
        simulations,
        cancelled,
    }
}

fn empty_result(original: &BacktestResult, threshold: f64) -> MonteCarloResult {
    MonteCarloResult {
        original_result: original.clone(),
        requested_simulations: 0,
        simulations: Vec::new(),
        probability_of_profit: 0.0,
        probability_of_drawdown: 0.0,
        max_drawdown_threshold: threshold,
        return_confidence: ConfidenceInterval::default(),
        drawdown_confidence: ConfidenceInterval::default(),
        sharpe_confidence: ConfidenceInterval::default(),
        median_return: 0.0,
        median_max_drawdown: 0.0,
        cancelled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BacktestConfig;

    fn trade(id: usize, pnl: i64) -> Trade {
        Trade {
            id,
            symbol: "TEST".to_string(),
            strategy_id: String::new(),
            entry_date: "2024-01-02".to_string(),
            exit_date: "2024-01-03".to_string(),
            side: TradeSide::Long,
            entry_price: Decimal::new(100, 0),
            exit_price: Decimal::new(100, 0),
            quantity: Decimal::ONE,
            pnl: Decimal::new(pnl, 0),
            pnl_percent: 0.0,
            fees: Decimal::ZERO,
            slippage: Decimal::ZERO,
            market_impact: Decimal::ZERO,
            exit_reason: ExitReason::Signal,
            holding_periods: 1,
        }
    }

    fn original(pnls: &[i64]) -> BacktestResult {
        let config = BacktestConfig::default();
        let trades: Vec<Trade> = pnls.iter().enumerate().map(|(i, p)| trade(i + 1, *p)).collect();
        let total: Decimal = trades.iter().map(|t| t.pnl).sum();
        BacktestResult {
            symbol: config.symbol.clone(),
            strategy_id: String::new(),
            start_date: "2024-01-01".to_string(),
            end_date: "2024-12-31".to_string(),
            duration_days: 365,
            bars_processed: 252,
            initial_capital: config.initial_capital,
            final_capital: config.initial_capital + total,
            halted_early: false,
            trades,
            equity_curve: vec![config.initial_capital],
            drawdown_curve: vec![0.0],
            metrics: PerformanceMetrics::default(),
            config,
            data_quality: DataQualityReport::default(),
        }
    }

    #[test]
    fn test_total_pnl_preserved_in_every_simulation() {
        let orig = original(&[1_500, -800, 2_200, -3_000, 700, 450, -1_200]);
        let sim = MonteCarloSimulator::new(MonteCarloConfig::default());
        let result = sim.run(&orig, 200, 5.0).unwrap();

        assert_eq!(result.simulations.len(), 200);
        assert!(!result.cancelled);
        for s in &result.simulations {
            assert_eq!(s.total_pnl, orig.total_pnl());
            assert_eq!(s.final_capital, orig.final_capital);
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let orig = original(&[500, -200, 300, -900, 1_200, -100]);
        let a = MonteCarloSimulator::new(MonteCarloConfig::default())
            .run(&orig, 50, 1.0)
            .unwrap();
        let b = MonteCarloSimulator::new(MonteCarloConfig {
            workers: Some(2),
            ..Default::default()
        })
        .run(&orig, 50, 1.0)
        .unwrap();
        assert_eq!(a.simulations, b.simulations);
    }

    #[test]
    fn test_probabilities_are_fractions() {
        let orig = original(&[1_000, -5_000, 2_000, -4_000, 3_000]);
        let result = MonteCarloSimulator::new(MonteCarloConfig::default())
            .run(&orig, 100, 1.0)
            .unwrap();
        assert!((0.0..=1.0).contains(&result.probability_of_profit));
        assert!((0.0..=1.0).contains(&result.probability_of_drawdown));
        // Net loss in every ordering.
        assert_eq!(result.probability_of_profit, 0.0);
        assert!(result.return_confidence.lower <= result.return_confidence.upper);
        assert!(result.drawdown_confidence.lower <= result.median_max_drawdown);
        assert!(result.median_max_drawdown <= result.drawdown_confidence.upper);
    }

    #[test]
    fn test_zero_simulations() {
        let orig = original(&[100]);
        let result = MonteCarloSimulator::new(MonteCarloConfig::default())
            .run(&orig, 0, 10.0)
            .unwrap();
        assert!(result.simulations.is_empty());
        assert_eq!(result.probability_of_profit, 0.0);
        assert_eq!(result.median_return, 0.0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let flag = Arc::new(AtomicBool::new(true));
        let sim = MonteCarloSimulator::new(MonteCarloConfig::default()).with_cancel_flag(flag);
        assert!(matches!(
            sim.run(&original(&[100, -50]), 100, 10.0),
            Err(BacktestError::Cancelled)
        ));
    }

    #[test]
    fn test_zero_timeout_cancels() {
        let sim = MonteCarloSimulator::new(MonteCarloConfig {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        });
        assert!(matches!(
            sim.run(&original(&[100, -50]), 100, 10.0),
            Err(BacktestError::Cancelled)
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        let sim = MonteCarloSimulator::new(MonteCarloConfig {
            workers: Some(0),
            ..Default::default()
        });
        assert!(sim.run(&original(&[100]), 10, 10.0).is_err());

        let sim = MonteCarloSimulator::new(MonteCarloConfig::default());
        assert!(sim.run(&original(&[100]), 10, f64::NAN).is_err());
    }
}
