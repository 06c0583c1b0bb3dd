use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::BacktestConfig;

/// A single OHLCV bar for backtesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// `YYYY-MM-DD`, or a datetime for intraday bars.
    pub date: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

/// The strategy's instruction for one bar, index-aligned with the bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub strategy_id: String,
}

impl Signal {
    pub fn new(signal_type: SignalType) -> Self {
        Self {
            signal_type,
            stop_loss: None,
            take_profit: None,
            confidence: 1.0,
            strategy_id: String::new(),
        }
    }

    pub fn hold() -> Self {
        Self::new(SignalType::Hold)
    }

    pub fn buy() -> Self {
        Self::new(SignalType::Buy)
    }

    pub fn sell() -> Self {
        Self::new(SignalType::Sell)
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = strategy_id.into();
        self
    }

    /// The order side this signal asks for, `None` for HOLD.
    pub fn side(&self) -> Option<OrderSide> {
        match self.signal_type {
            SignalType::Buy => Some(OrderSide::Buy),
            SignalType::Sell => Some(OrderSide::Sell),
            SignalType::Hold => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Long,
    Short,
}

impl From<OrderSide> for TradeSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => TradeSide::Long,
            OrderSide::Sell => TradeSide::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Target,
    Stop,
    Signal,
    TrailingStop,
    Time,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::Target => "target",
            ExitReason::Stop => "stop",
            ExitReason::Signal => "signal",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Time => "time",
            ExitReason::EndOfData => "end_of_data",
        };
        f.write_str(s)
    }
}

/// An open position. At most one exists per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub side: OrderSide,
    /// Fill price, slippage and impact included.
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_date: String,
    pub entry_index: usize,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub strategy_id: String,
    pub entry_fee: Decimal,
    pub entry_slippage: Decimal,
    pub entry_market_impact: Decimal,
}

impl Position {
    /// Open profit at `price`, before the entry fee.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }
}

/// A round-trip trade. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: usize,
    pub symbol: String,
    pub strategy_id: String,
    pub entry_date: String,
    pub exit_date: String,
    pub side: TradeSide,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Net of both commissions; slippage and impact are already in the prices.
    pub pnl: Decimal,
    pub pnl_percent: f64,
    /// Entry plus exit commission.
    pub fees: Decimal,
    /// Currency cost of slippage on both legs.
    pub slippage: Decimal,
    /// Currency cost of market impact on both legs.
    pub market_impact: Decimal,
    pub exit_reason: ExitReason,
    pub holding_periods: usize,
}

/// Performance report for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    /// Longest run of bars spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub var_95: f64,
    pub var_99: f64,
    /// Mean loss beyond the 95% VaR.
    pub cvar_95: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub omega_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// 0-100 percentage.
    pub win_rate: f64,
    /// 0-100 percentage.
    pub loss_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_periods: f64,
    pub recovery_factor: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub total_fees: f64,
    pub total_slippage: f64,
    pub total_market_impact: f64,
}

/// A data-quality finding on the input bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataWarning {
    pub date: String,
    pub index: usize,
    pub warning_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQualityReport {
    pub total_bars: usize,
    pub zero_volume_bars: usize,
    pub price_inconsistencies: usize,
    pub price_spikes: usize,
    pub warnings: Vec<DataWarning>,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub symbol: String,
    /// First non-empty strategy id among the input signals.
    pub strategy_id: String,
    pub start_date: String,
    pub end_date: String,
    /// Calendar days between the first and last processed bar.
    pub duration_days: i64,
    pub bars_processed: usize,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    /// The run stopped because drawdown breached `maxDrawdown`.
    pub halted_early: bool,
    pub trades: Vec<Trade>,
    /// Seed entry plus one entry per processed bar.
    pub equity_curve: Vec<Decimal>,
    /// Percent below running peak, aligned with `equity_curve`.
    pub drawdown_curve: Vec<f64>,
    pub metrics: PerformanceMetrics,
    pub config: BacktestConfig,
    pub data_quality: DataQualityReport,
}

impl BacktestResult {
    pub fn total_pnl(&self) -> Decimal {
        self.trades.iter().map(|t| t.pnl).sum()
    }
}

// --- Walk-Forward Analysis ---

/// One train/test window pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardResult {
    pub window_index: usize,
    pub train_start: String,
    pub train_end: String,
    pub test_start: String,
    pub test_end: String,
    pub in_sample_result: BacktestResult,
    pub out_of_sample_result: BacktestResult,
    /// 0-100; how much of the in-sample performance survived out of sample.
    pub robustness_score: f64,
    /// 0-100; penalises diverging drawdowns.
    pub parameter_stability: f64,
}

/// Aggregate view over all walk-forward windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardSummary {
    pub windows: usize,
    pub avg_in_sample_return: f64,
    pub avg_out_of_sample_return: f64,
    /// in-sample / out-of-sample return. Values near 1.0 = low overfitting.
    pub overfitting_ratio: f64,
    pub avg_robustness_score: f64,
    pub avg_parameter_stability: f64,
    pub total_out_of_sample_trades: usize,
}

// --- Monte Carlo Simulation ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Outcome of replaying one shuffled trade sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSimulation {
    pub index: usize,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub total_pnl: Decimal,
    pub final_capital: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub original_result: BacktestResult,
    pub requested_simulations: usize,
    pub simulations: Vec<MonteCarloSimulation>,
    /// Fraction (0-1) of simulations that ended with a profit.
    pub probability_of_profit: f64,
    /// Fraction (0-1) of simulations whose max drawdown exceeded the threshold.
    pub probability_of_drawdown: f64,
    pub max_drawdown_threshold: f64,
    pub return_confidence: ConfidenceInterval,
    pub drawdown_confidence: ConfidenceInterval,
    pub sharpe_confidence: ConfidenceInterval,
    pub median_return: f64,
    pub median_max_drawdown: f64,
    /// Cancellation or timeout stopped the run before every simulation started.
    pub cancelled: bool,
}
