use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::BacktestConfig;
use crate::engine::BacktestEngine;
use crate::error::{BacktestError, Result};
use crate::models::*;

/// Bar index ranges of one train/test window pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub index: usize,
    pub train_start: usize,
    /// Exclusive.
    pub train_end: usize,
    pub test_start: usize,
    /// Exclusive.
    pub test_end: usize,
}

/// Slide a `train_size + test_size` window forward by `test_size` bars. A
/// trailing partial window is dropped.
pub fn window_bounds(total_bars: usize, train_size: usize, test_size: usize) -> Vec<WindowBounds> {
    let mut windows = Vec::new();
    if train_size == 0 || test_size == 0 {
        return windows;
    }
    let mut start = 0usize;
    while start + train_size + test_size <= total_bars {
        windows.push(WindowBounds {
            index: windows.len(),
            train_start: start,
            train_end: start + train_size,
            test_start: start + train_size,
            test_end: start + train_size + test_size,
        });
        start += test_size;
    }
    windows
}

/// How much of the in-sample performance survived out of sample, 0-100.
///
/// Averages the capped out-of-sample / in-sample ratios of total return,
/// Sharpe and win rate.
pub fn robustness_score(
    in_sample: &PerformanceMetrics,
    out_of_sample: &PerformanceMetrics,
) -> f64 {
    let ratio = |oos: f64, is: f64, floor: f64| (oos / is.max(floor)).min(1.0);
    let mean = (ratio(out_of_sample.total_return, in_sample.total_return, 0.01)
        + ratio(out_of_sample.sharpe_ratio, in_sample.sharpe_ratio, 0.01)
        + ratio(out_of_sample.win_rate, in_sample.win_rate, 1.0))
        / 3.0;
    let score = (mean * 100.0).round();
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// 100 minus twice the gap between in-sample and out-of-sample max drawdown,
/// floored at 0.
pub fn parameter_stability(
    in_sample: &PerformanceMetrics,
    out_of_sample: &PerformanceMetrics,
) -> f64 {
    (100.0 - 2.0 * (in_sample.max_drawdown - out_of_sample.max_drawdown).abs()).clamp(0.0, 100.0)
}

/// Rolling train/test evaluation of one signal series.
pub struct WalkForwardAnalyzer {
    engine: BacktestEngine,
}

impl WalkForwardAnalyzer {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        Ok(Self {
            engine: BacktestEngine::new(config)?,
        })
    }

    /// Evaluate every full window. Windows run in parallel; a window whose
    /// simulation fails is logged and left out.
    pub fn run(
        &self,
        bars: &[Bar],
        signals: &[Signal],
        train_size: usize,
        test_size: usize,
    ) -> Result<Vec<WalkForwardResult>> {
        if train_size == 0 || test_size == 0 {
            return Err(BacktestError::InvalidInput(format!(
                "train and test sizes must be positive, got {} and {}",
                train_size, test_size
            )));
        }
        if signals.len() != bars.len() {
            return Err(BacktestError::SignalMismatch {
                bars: bars.len(),
                signals: signals.len(),
            });
        }

        let windows = window_bounds(bars.len(), train_size, test_size);
        info!(
            bars = bars.len(),
            train_size,
            test_size,
            windows = windows.len(),
            "Starting walk-forward analysis"
        );

        let results: Vec<WalkForwardResult> = windows
            .par_iter()
            .filter_map(|w| match self.run_window(bars, signals, w) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(window = w.index, error = %e, "Skipping walk-forward window");
                    None
                }
            })
            .collect();

        Ok(results)
    }

    fn run_window(
        &self,
        bars: &[Bar],
        signals: &[Signal],
        w: &WindowBounds,
    ) -> Result<WalkForwardResult> {
        let in_sample = self.engine.run(
            &bars[w.train_start..w.train_end],
            &signals[w.train_start..w.train_end],
        )?;
        let out_of_sample = self.engine.run(
            &bars[w.test_start..w.test_end],
            &signals[w.test_start..w.test_end],
        )?;

        let robustness = robustness_score(&in_sample.metrics, &out_of_sample.metrics);
        let stability = parameter_stability(&in_sample.metrics, &out_of_sample.metrics);

        Ok(WalkForwardResult {
            window_index: w.index,
            train_start: bars[w.train_start].date.clone(),
            train_end: bars[w.train_end - 1].date.clone(),
            test_start: bars[w.test_start].date.clone(),
            test_end: bars[w.test_end - 1].date.clone(),
            in_sample_result: in_sample,
            out_of_sample_result: out_of_sample,
            robustness_score: robustness,
            parameter_stability: stability,
        })
    }

    /// Aggregate statistics across windows.
    pub fn summarize(results: &[WalkForwardResult]) -> WalkForwardSummary {
        if results.is_empty() {
            return WalkForwardSummary::default();
        }
        let n = results.len() as f64;
        let avg = |f: fn(&WalkForwardResult) -> f64| results.iter().map(f).sum::<f64>() / n;

        let avg_in_sample_return = avg(|r| r.in_sample_result.metrics.total_return);
        let avg_out_of_sample_return = avg(|r| r.out_of_sample_result.metrics.total_return);
        let overfitting_ratio = if avg_out_of_sample_return.abs() > 1e-10 {
            avg_in_sample_return / avg_out_of_sample_return
        } else {
            0.0
        };

        WalkForwardSummary {
            windows: results.len(),
            avg_in_sample_return,
            avg_out_of_sample_return,
            overfitting_ratio,
            avg_robustness_score: avg(|r| r.robustness_score),
            avg_parameter_stability: avg(|r| r.parameter_stability),
            total_out_of_sample_trades: results
                .iter()
                .map(|r| r.out_of_sample_result.trades.len())
                .sum(),
        }
    }
}
