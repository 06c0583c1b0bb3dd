use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::Trade;

/// Reported when a ratio has a zero denominator and a positive numerator.
pub const RATIO_CAP: f64 = 99.99;

/// Per-trade statistics for a completed trade list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// 0-100 percentage.
    pub win_rate: f64,
    /// 0-100 percentage.
    pub loss_rate: f64,
    pub gross_profit: f64,
    /// Absolute value of the summed losses.
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub average_win: f64,
    /// Mean losing pnl; negative or zero.
    pub average_loss: f64,
    pub largest_win: f64,
    /// Most negative pnl; negative or zero.
    pub largest_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_periods: f64,
    pub total_fees: f64,
    pub total_slippage: f64,
    pub total_market_impact: f64,
}

pub fn compute_trade_stats(trades: &[Trade]) -> TradeStats {
    if trades.is_empty() {
        return TradeStats::default();
    }

    let pnls: Vec<f64> = trades
        .iter()
        .map(|t| t.pnl.to_f64().unwrap_or(0.0))
        .collect();
    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

    let n = trades.len() as f64;
    let win_fraction = wins.len() as f64 / n;
    let loss_fraction = losses.len() as f64 / n;

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

    let average_win = if wins.is_empty() {
        0.0
    } else {
        gross_profit / wins.len() as f64
    };
    let average_loss = if losses.is_empty() {
        0.0
    } else {
        -gross_loss / losses.len() as f64
    };

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        RATIO_CAP
    } else {
        0.0
    };

    // Expectancy = (Win% × Avg Win) - (1 - Win%) × |Avg Loss|
    let expectancy = win_fraction * average_win - (1.0 - win_fraction) * average_loss.abs();

    let (max_consecutive_wins, max_consecutive_losses) = max_consecutive_streaks(trades);

    let avg_holding_periods =
        trades.iter().map(|t| t.holding_periods as f64).sum::<f64>() / n;

    let sum = |f: fn(&Trade) -> Decimal| -> f64 {
        trades.iter().map(f).sum::<Decimal>().to_f64().unwrap_or(0.0)
    };

    TradeStats {
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: win_fraction * 100.0,
        loss_rate: loss_fraction * 100.0,
        gross_profit,
        gross_loss,
        profit_factor,
        expectancy,
        average_win,
        average_loss,
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
        max_consecutive_wins,
        max_consecutive_losses,
        avg_holding_periods,
        total_fees: sum(|t| t.fees),
        total_slippage: sum(|t| t.slippage),
        total_market_impact: sum(|t| t.market_impact),
    }
}

/// Longest winning and losing runs. Break-even trades end both runs.
pub fn max_consecutive_streaks(trades: &[Trade]) -> (usize, usize) {
    let mut max_w = 0;
    let mut max_l = 0;
    let mut w = 0;
    let mut l = 0;
    for t in trades {
        if t.pnl > Decimal::ZERO {
            w += 1;
            l = 0;
            max_w = max_w.max(w);
        } else if t.pnl < Decimal::ZERO {
            l += 1;
            w = 0;
            max_l = max_l.max(l);
        } else {
            w = 0;
            l = 0;
        }
    }
    (max_w, max_l)
}
