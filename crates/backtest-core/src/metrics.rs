//! Performance metrics.
//!
//! Everything here is a pure function of a trade list and an equity curve.
//! Degenerate inputs (no trades, flat equity, zero spans) resolve to 0 rather
//! than NaN or infinity.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::config::BacktestConfig;
use crate::data_quality::parse_bar_timestamp;
use crate::equity::EquityTracker;
use crate::models::{PerformanceMetrics, Trade};
use crate::trade_stats::{compute_trade_stats, RATIO_CAP};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Ceiling for the annualized return, in percent. Compounding a gain over a
/// span of minutes overflows `f64`, so the result saturates here.
pub const ANNUALIZED_RETURN_CAP: f64 = 1_000_000.0;

/// Bar-to-bar fractional returns of an equity curve. Periods starting from
/// non-positive equity are skipped.
pub fn period_returns(equity_curve: &[Decimal]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter_map(|w| {
            let e0 = w[0].to_f64()?;
            let e1 = w[1].to_f64()?;
            if e0 > 0.0 {
                Some(e1 / e0 - 1.0)
            } else {
                None
            }
        })
        .collect()
}

/// Calendar days between two bar dates, `None` if either fails to parse.
pub fn days_between(from: &str, to: &str) -> Option<f64> {
    let a = parse_bar_timestamp(from)?;
    let b = parse_bar_timestamp(to)?;
    Some((b - a).num_seconds() as f64 / 86_400.0)
}

/// Calendar span used for annualization. Falls back to treating every bar
/// as one trading day when the dates are unparseable.
pub fn calendar_span_days(first: &str, last: &str, bars: usize) -> f64 {
    days_between(first, last).unwrap_or(bars as f64 * 365.0 / TRADING_DAYS_PER_YEAR)
}

/// Nearest-rank percentile on an ascending slice, `p` in 0-100.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

pub fn annualized_return(total_return_pct: f64, days: f64) -> f64 {
    if days <= 0.0 {
        return 0.0;
    }
    let growth = 1.0 + total_return_pct / 100.0;
    if growth <= 0.0 {
        return -100.0;
    }
    let annualized = (growth.powf(365.0 / days) - 1.0) * 100.0;
    if annualized.is_nan() {
        0.0
    } else {
        annualized.min(ANNUALIZED_RETURN_CAP)
    }
}

/// Annualized Sharpe and Sortino on a daily basis.
///
/// Sharpe = (mean − rf/252) / σ × √252, Sortino uses the root mean square of
/// the negative returns as its deviation.
pub fn risk_ratios(returns: &[f64], risk_free_rate_pct: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }
    let mean = returns.iter().mean();
    let std_dev = returns.iter().std_dev();
    let rf_daily = risk_free_rate_pct / 100.0 / TRADING_DAYS_PER_YEAR;
    let excess = mean - rf_daily;
    let scale = TRADING_DAYS_PER_YEAR.sqrt();

    let sharpe = if std_dev.is_finite() && std_dev > 1e-15 {
        excess / std_dev * scale
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).collect();
    let downside_dev = if downside.is_empty() {
        0.0
    } else {
        (downside.iter().sum::<f64>() / downside.len() as f64).sqrt()
    };
    let sortino = if downside_dev > 1e-15 {
        excess / downside_dev * scale
    } else {
        0.0
    };

    (finite_or_zero(sharpe), finite_or_zero(sortino))
}

/// Historical VaR at `confidence` (e.g. 0.95) as a positive percent.
pub fn value_at_risk(sorted_returns: &[f64], confidence: f64) -> f64 {
    if sorted_returns.is_empty() {
        return 0.0;
    }
    percentile_sorted(sorted_returns, (1.0 - confidence) * 100.0).abs() * 100.0
}

/// Mean of the returns at or below the 95% VaR cut-off, as a positive percent.
pub fn conditional_var_95(sorted_returns: &[f64]) -> f64 {
    if sorted_returns.is_empty() {
        return 0.0;
    }
    let cutoff = percentile_sorted(sorted_returns, 5.0);
    let tail: Vec<f64> = sorted_returns
        .iter()
        .copied()
        .take_while(|r| *r <= cutoff)
        .collect();
    if tail.is_empty() {
        return 0.0;
    }
    (tail.iter().sum::<f64>() / tail.len() as f64).abs() * 100.0
}

pub fn omega_ratio(returns: &[f64]) -> f64 {
    let gains: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    if losses > 1e-15 {
        gains / losses
    } else if gains > 0.0 {
        RATIO_CAP
    } else {
        0.0
    }
}

/// Population skewness.
pub fn skewness(returns: &[f64]) -> f64 {
    let n = returns.len() as f64;
    if n < 3.0 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / n;
    let m2: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let m3: f64 = returns.iter().map(|r| (r - mean).powi(3)).sum::<f64>() / n;
    let std = m2.sqrt();
    if std > 1e-15 {
        m3 / std.powi(3)
    } else {
        0.0
    }
}

/// Population excess kurtosis.
pub fn excess_kurtosis(returns: &[f64]) -> f64 {
    let n = returns.len() as f64;
    if n < 4.0 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / n;
    let m2: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let m4: f64 = returns.iter().map(|r| (r - mean).powi(4)).sum::<f64>() / n;
    if m2 > 1e-15 {
        m4 / m2.powi(2) - 3.0
    } else {
        0.0
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Compute the full metrics report for a run.
///
/// `equity_curve` starts with the initial capital. `days` is the calendar
/// span used to annualize the total return.
pub fn compute_metrics(
    trades: &[Trade],
    equity_curve: &[Decimal],
    config: &BacktestConfig,
    days: f64,
) -> PerformanceMetrics {
    let stats = compute_trade_stats(trades);
    let initial = config.initial_capital.to_f64().unwrap_or(0.0);
    let final_equity = equity_curve
        .last()
        .and_then(|e| e.to_f64())
        .unwrap_or(initial);

    let total_return = if initial > 0.0 {
        (final_equity - initial) / initial * 100.0
    } else {
        0.0
    };
    let annualized = annualized_return(total_return, days);

    let (max_drawdown, max_drawdown_duration) = EquityTracker::from_curve(equity_curve)
        .map(|t| (t.max_drawdown(), t.max_drawdown_duration()))
        .unwrap_or((0.0, 0));

    let returns = period_returns(equity_curve);
    let volatility = if returns.len() >= 2 {
        finite_or_zero(returns.iter().std_dev() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0)
    } else {
        0.0
    };
    let (sharpe_ratio, sortino_ratio) = risk_ratios(&returns, config.risk_free_rate);

    let calmar_ratio = if max_drawdown > 0.0 {
        annualized / max_drawdown
    } else {
        0.0
    };
    let recovery_factor = if max_drawdown > 0.0 {
        total_return / max_drawdown
    } else {
        0.0
    };

    let sorted = sorted_copy(&returns);

    PerformanceMetrics {
        total_return: finite_or_zero(total_return),
        annualized_return: finite_or_zero(annualized),
        volatility,
        max_drawdown,
        max_drawdown_duration,
        var_95: value_at_risk(&sorted, 0.95),
        var_99: value_at_risk(&sorted, 0.99),
        cvar_95: conditional_var_95(&sorted),
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio: finite_or_zero(calmar_ratio),
        omega_ratio: omega_ratio(&returns),
        total_trades: stats.total_trades,
        winning_trades: stats.winning_trades,
        losing_trades: stats.losing_trades,
        win_rate: stats.win_rate,
        loss_rate: stats.loss_rate,
        profit_factor: stats.profit_factor,
        expectancy: stats.expectancy,
        average_win: stats.average_win,
        average_loss: stats.average_loss,
        largest_win: stats.largest_win,
        largest_loss: stats.largest_loss,
        max_consecutive_wins: stats.max_consecutive_wins,
        max_consecutive_losses: stats.max_consecutive_losses,
        avg_holding_periods: stats.avg_holding_periods,
        recovery_factor: finite_or_zero(recovery_factor),
        skewness: skewness(&returns),
        kurtosis: excess_kurtosis(&returns),
        total_fees: stats.total_fees,
        total_slippage: stats.total_slippage,
        total_market_impact: stats.total_market_impact,
    }
}
