use std::env;
use std::str::FromStr;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::commission::CommissionSchedule;
use crate::error::{BacktestError, Result};

/// One step of a volume-tiered commission schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionTier {
    /// Cumulative traded notional at which this tier starts to apply.
    pub volume_threshold: f64,
    /// Commission rate in percent of order value (0.1 = 0.1%).
    pub rate: f64,
}

/// Parameters of the multi-factor execution model.
///
/// When present on [`BacktestConfig::execution`] the simulation prices fills
/// with square-root market impact, time-of-day and volatility scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionConfig {
    /// Average daily volume in shares. `None` or zero disables market impact.
    pub average_daily_volume: Option<f64>,
    /// Square-root impact coefficient (lambda).
    pub market_impact_coefficient: f64,
    /// Market open, minutes after midnight.
    pub market_open_minutes: u32,
    /// Market close, minutes after midnight.
    pub market_close_minutes: u32,
    /// Width of the opening and closing windows in minutes.
    pub session_edge_minutes: u32,
    /// Slippage multiplier inside the opening window.
    pub open_slippage_multiplier: f64,
    /// Slippage multiplier inside the closing window.
    pub close_slippage_multiplier: f64,
    /// Number of bar returns in the rolling volatility estimate.
    pub volatility_window: usize,
    pub volatility_multiplier: f64,
    /// Uniform jitter applied to total slippage, as a fraction in [0, 1).
    pub slippage_jitter: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            average_daily_volume: None,
            market_impact_coefficient: 0.1,
            market_open_minutes: 9 * 60 + 30,
            market_close_minutes: 16 * 60,
            session_edge_minutes: 30,
            open_slippage_multiplier: 1.5,
            close_slippage_multiplier: 1.3,
            volatility_window: 20,
            volatility_multiplier: 1.0,
            slippage_jitter: 0.0,
        }
    }
}

/// Configuration for a backtest run.
///
/// All rates and limits are expressed in percent (`commission: 0.1` means
/// 0.1% of order value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BacktestConfig {
    pub symbol: String,
    pub initial_capital: Decimal,
    /// Flat commission rate, used when `commission_tiers` is empty.
    pub commission: f64,
    pub slippage: f64,
    /// Quoted bid/ask spread; half of it is paid on every fill.
    pub spread: f64,
    /// Maximum position value as a percent of capital.
    pub max_position_size: f64,
    /// Drawdown that halts the simulation.
    pub max_drawdown: f64,
    /// Capital put at risk between entry and stop.
    pub risk_per_trade: f64,
    pub max_open_positions: usize,
    pub use_stop_loss: bool,
    pub use_take_profit: bool,
    pub allow_short: bool,
    pub trailing_stop_percent: Option<f64>,
    pub max_holding_periods: Option<usize>,
    /// Signals below this confidence never open a position.
    pub min_confidence: f64,
    /// Annual risk-free rate used by the Sharpe and Sortino ratios.
    pub risk_free_rate: f64,
    pub commission_tiers: Vec<CommissionTier>,
    pub execution: Option<ExecutionConfig>,
    pub rng_seed: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "ASSET".to_string(),
            initial_capital: Decimal::new(100_000, 0),
            commission: 0.1,
            slippage: 0.05,
            spread: 0.0,
            max_position_size: 25.0,
            max_drawdown: 50.0,
            risk_per_trade: 2.0,
            max_open_positions: 1,
            use_stop_loss: true,
            use_take_profit: true,
            allow_short: false,
            trailing_stop_percent: None,
            max_holding_periods: None,
            min_confidence: 0.0,
            risk_free_rate: 2.0,
            commission_tiers: Vec::new(),
            execution: None,
            rng_seed: 42,
        }
    }
}

impl BacktestConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BacktestError::InvalidConfig(format!("malformed JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from `BACKTEST_*` environment variables, falling back to
    /// the defaults for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            symbol: env::var("BACKTEST_SYMBOL").unwrap_or(defaults.symbol),
            initial_capital: env_or("BACKTEST_INITIAL_CAPITAL", defaults.initial_capital)?,
            commission: env_or("BACKTEST_COMMISSION", defaults.commission)?,
            slippage: env_or("BACKTEST_SLIPPAGE", defaults.slippage)?,
            spread: env_or("BACKTEST_SPREAD", defaults.spread)?,
            max_position_size: env_or("BACKTEST_MAX_POSITION_SIZE", defaults.max_position_size)?,
            max_drawdown: env_or("BACKTEST_MAX_DRAWDOWN", defaults.max_drawdown)?,
            risk_per_trade: env_or("BACKTEST_RISK_PER_TRADE", defaults.risk_per_trade)?,
            max_open_positions: env_or(
                "BACKTEST_MAX_OPEN_POSITIONS",
                defaults.max_open_positions,
            )?,
            use_stop_loss: env_or("BACKTEST_USE_STOP_LOSS", defaults.use_stop_loss)?,
            use_take_profit: env_or("BACKTEST_USE_TAKE_PROFIT", defaults.use_take_profit)?,
            allow_short: env_or("BACKTEST_ALLOW_SHORT", defaults.allow_short)?,
            trailing_stop_percent: env_opt("BACKTEST_TRAILING_STOP_PERCENT")?,
            max_holding_periods: env_opt("BACKTEST_MAX_HOLDING_PERIODS")?,
            min_confidence: env_or("BACKTEST_MIN_CONFIDENCE", defaults.min_confidence)?,
            risk_free_rate: env_or("BACKTEST_RISK_FREE_RATE", defaults.risk_free_rate)?,
            commission_tiers: match env::var("BACKTEST_COMMISSION_TIERS") {
                Ok(raw) => serde_json::from_str(&raw)
                    .context("BACKTEST_COMMISSION_TIERS must be a JSON array of tiers")?,
                Err(_) => defaults.commission_tiers,
            },
            execution: match env::var("BACKTEST_EXECUTION") {
                Ok(raw) => Some(
                    serde_json::from_str(&raw)
                        .context("BACKTEST_EXECUTION must be a JSON object")?,
                ),
                Err(_) => defaults.execution,
            },
            rng_seed: env_or("BACKTEST_RNG_SEED", defaults.rng_seed)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject any configuration the simulation cannot honour. Nothing is
    /// clamped.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return invalid("symbol must not be empty");
        }
        if self.initial_capital <= Decimal::ZERO {
            return invalid(format!(
                "initialCapital must be positive, got {}",
                self.initial_capital
            ));
        }
        non_negative("commission", self.commission)?;
        non_negative("slippage", self.slippage)?;
        non_negative("spread", self.spread)?;
        percent_range("maxPositionSize", self.max_position_size)?;
        percent_range("maxDrawdown", self.max_drawdown)?;
        percent_range("riskPerTrade", self.risk_per_trade)?;
        if self.max_open_positions == 0 {
            return invalid("maxOpenPositions must be at least 1");
        }
        if let Some(pct) = self.trailing_stop_percent {
            if !pct.is_finite() || pct <= 0.0 || pct >= 100.0 {
                return invalid(format!(
                    "trailingStopPercent must be in (0, 100), got {}",
                    pct
                ));
            }
        }
        if self.max_holding_periods == Some(0) {
            return invalid("maxHoldingPeriods must be at least 1");
        }
        non_negative("minConfidence", self.min_confidence)?;
        if !self.risk_free_rate.is_finite() {
            return invalid("riskFreeRate must be finite");
        }

        CommissionSchedule::validate_tiers(&self.commission_tiers)?;

        if let Some(exec) = &self.execution {
            exec.validate()?;
        }
        Ok(())
    }

    /// Bars required before a run produces anything but an empty result.
    pub fn warmup_bars(&self) -> usize {
        self.execution
            .as_ref()
            .map(|e| e.volatility_window + 1)
            .unwrap_or(1)
    }

    pub fn commission_schedule(&self) -> CommissionSchedule {
        CommissionSchedule::new(self.commission, self.commission_tiers.clone())
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(adv) = self.average_daily_volume {
            non_negative("averageDailyVolume", adv)?;
        }
        non_negative("marketImpactCoefficient", self.market_impact_coefficient)?;
        if self.market_open_minutes >= self.market_close_minutes
            || self.market_close_minutes > 24 * 60
        {
            return invalid(format!(
                "market hours must satisfy open < close <= 1440, got {}..{}",
                self.market_open_minutes, self.market_close_minutes
            ));
        }
        positive("openSlippageMultiplier", self.open_slippage_multiplier)?;
        positive("closeSlippageMultiplier", self.close_slippage_multiplier)?;
        if self.volatility_window < 2 {
            return invalid("volatilityWindow must be at least 2");
        }
        positive("volatilityMultiplier", self.volatility_multiplier)?;
        if !(0.0..1.0).contains(&self.slippage_jitter) {
            return invalid(format!(
                "slippageJitter must be in [0, 1), got {}",
                self.slippage_jitter
            ));
        }
        Ok(())
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(BacktestError::InvalidConfig(msg.into()))
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return invalid(format!("{} must be a non-negative number, got {}", name, value));
    }
    Ok(())
}

fn positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return invalid(format!("{} must be positive, got {}", name, value));
    }
    Ok(())
}

fn percent_range(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > 100.0 {
        return invalid(format!("{} must be in (0, 100], got {}", name, value));
    }
    Ok(())
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn env_opt<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(None),
    }
}
