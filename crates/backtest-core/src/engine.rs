use std::collections::HashMap;

use rust_decimal::prelude::*;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::commission::{CommissionSchedule, VolumeLedger};
use crate::config::BacktestConfig;
use crate::cost_model::{apply_estimate, build_cost_model, ExecutionCostModel, FillRequest};
use crate::data_quality::{check_data_quality, validate_bar_order};
use crate::equity::EquityTracker;
use crate::error::{BacktestError, Result};
use crate::exit_rules;
use crate::metrics::{calendar_span_days, compute_metrics, days_between};
use crate::models::*;
use crate::trailing_stop::TrailingStopManager;

/// Bar-by-bar backtesting engine.
///
/// Signals are acted on at the close of the bar they are aligned with. Each
/// call to [`BacktestEngine::run`] gets its own [`SimulationRun`], so one
/// engine can be shared across threads and runs never observe each other.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    /// Create an engine. The configuration is validated up front.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the backtest over `bars` using the index-aligned `signals`.
    pub fn run(&self, bars: &[Bar], signals: &[Signal]) -> Result<BacktestResult> {
        if bars.is_empty() {
            return Err(BacktestError::EmptyData);
        }
        if signals.len() != bars.len() {
            return Err(BacktestError::SignalMismatch {
                bars: bars.len(),
                signals: signals.len(),
            });
        }
        validate_bar_order(bars)?;

        let data_quality = check_data_quality(bars);

        let warmup = self.config.warmup_bars();
        if bars.len() < warmup {
            info!(
                symbol = %self.config.symbol,
                bars = bars.len(),
                warmup,
                "Not enough bars to simulate, returning an empty result"
            );
            return Ok(self.empty_result(bars, signals, data_quality));
        }

        SimulationRun::new(&self.config).execute(bars, signals, data_quality)
    }

    fn empty_result(
        &self,
        bars: &[Bar],
        signals: &[Signal],
        data_quality: DataQualityReport,
    ) -> BacktestResult {
        let start_date = bars.first().map(|b| b.date.clone()).unwrap_or_default();
        BacktestResult {
            symbol: self.config.symbol.clone(),
            strategy_id: strategy_id(signals),
            end_date: start_date.clone(),
            start_date,
            duration_days: 0,
            bars_processed: 0,
            initial_capital: self.config.initial_capital,
            final_capital: self.config.initial_capital,
            halted_early: false,
            trades: Vec::new(),
            equity_curve: vec![self.config.initial_capital],
            drawdown_curve: vec![0.0],
            metrics: PerformanceMetrics::default(),
            config: self.config.clone(),
            data_quality,
        }
    }
}

fn strategy_id(signals: &[Signal]) -> String {
    signals
        .iter()
        .find(|s| !s.strategy_id.is_empty())
        .map(|s| s.strategy_id.clone())
        .unwrap_or_default()
}

/// All mutable state of one simulation. Built fresh for every run and
/// consumed by [`SimulationRun::execute`].
struct SimulationRun<'a> {
    config: &'a BacktestConfig,
    /// Realized capital: initial capital plus the pnl of closed trades.
    capital: Decimal,
    positions: HashMap<String, Position>,
    trades: Vec<Trade>,
    equity: EquityTracker,
    ledger: VolumeLedger,
    schedule: CommissionSchedule,
    cost_model: Box<dyn ExecutionCostModel>,
    trailing_stops: Option<TrailingStopManager>,
    circuit_breaker: CircuitBreaker,
}

impl<'a> SimulationRun<'a> {
    fn new(config: &'a BacktestConfig) -> Self {
        Self {
            config,
            capital: config.initial_capital,
            positions: HashMap::new(),
            trades: Vec::new(),
            equity: EquityTracker::new(config.initial_capital),
            ledger: VolumeLedger::new(),
            schedule: config.commission_schedule(),
            cost_model: build_cost_model(config),
            trailing_stops: config.trailing_stop_percent.map(TrailingStopManager::new),
            circuit_breaker: CircuitBreaker::new(config.max_drawdown),
        }
    }

    fn execute(
        mut self,
        bars: &[Bar],
        signals: &[Signal],
        data_quality: DataQualityReport,
    ) -> Result<BacktestResult> {
        info!(
            symbol = %self.config.symbol,
            bars = bars.len(),
            cost_model = self.cost_model.name(),
            "Starting backtest"
        );

        let last_index = bars.len() - 1;
        let mut bars_processed = 0usize;
        let mut halted_early = false;

        for (i, (bar, signal)) in bars.iter().zip(signals).enumerate() {
            bars_processed = i + 1;
            let is_last = i == last_index;

            // 1. Exits
            self.process_exits(bars, i, signal, is_last);

            // 2. Entries
            if !is_last {
                self.try_enter(bars, i, signal);
            }

            // 3. Mark-to-market
            let equity = self.mark_to_market(bar);
            let drawdown = self.equity.record(equity);

            // 4. Drawdown circuit breaker
            if self.circuit_breaker.check(drawdown) {
                warn!(
                    symbol = %self.config.symbol,
                    date = %bar.date,
                    drawdown,
                    limit = self.config.max_drawdown,
                    "Max drawdown exceeded, closing positions and halting"
                );
                self.close_all(bars, i, ExitReason::EndOfData);
                self.equity.restate_last(self.capital);
                halted_early = !is_last;
                break;
            }
        }

        // Every exit path above closes positions before the loop ends.
        debug_assert!(self.positions.is_empty());

        Ok(self.finish(bars, signals, bars_processed, halted_early, data_quality))
    }

    fn process_exits(&mut self, bars: &[Bar], i: usize, signal: &Signal, is_last: bool) {
        let bar = &bars[i];
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();

        for symbol in symbols {
            let decision = match self.positions.get(&symbol) {
                Some(pos) => self.exit_decision(pos, bar, i, signal, is_last),
                None => continue,
            };

            match decision {
                Some((raw_price, reason)) => {
                    if let Some(pos) = self.positions.remove(&symbol) {
                        self.close_position(pos, bars, i, raw_price, reason);
                    }
                }
                None => {
                    if let Some(ts) = self.trailing_stops.as_mut() {
                        ts.update(&symbol, bar);
                    }
                }
            }
        }
    }

    /// First matching exit rule for an open position, with its raw
    /// (pre-cost) exit price.
    fn exit_decision(
        &self,
        pos: &Position,
        bar: &Bar,
        i: usize,
        signal: &Signal,
        is_last: bool,
    ) -> Option<(Decimal, ExitReason)> {
        if let Some(stop) = pos.stop_loss {
            if exit_rules::stop_triggered(pos.side, bar, stop) {
                return Some((
                    exit_rules::stop_fill_price(pos.side, bar, stop),
                    ExitReason::Stop,
                ));
            }
        }

        if let Some(target) = pos.take_profit {
            if exit_rules::target_triggered(pos.side, bar, target) {
                return Some((
                    exit_rules::target_fill_price(pos.side, bar, target),
                    ExitReason::Target,
                ));
            }
        }

        // Level from previous bars; ratcheting with this bar happens only if
        // the position survives.
        if let Some(level) = self
            .trailing_stops
            .as_ref()
            .and_then(|ts| ts.get(&pos.symbol))
        {
            if exit_rules::stop_triggered(pos.side, bar, level) {
                return Some((
                    exit_rules::stop_fill_price(pos.side, bar, level),
                    ExitReason::TrailingStop,
                ));
            }
        }

        if let Some(max_hold) = self.config.max_holding_periods {
            if i - pos.entry_index >= max_hold {
                return Some((bar.close, ExitReason::Time));
            }
        }

        if exit_rules::is_reversal(pos.side, signal.side()) {
            return Some((bar.close, ExitReason::Signal));
        }

        if is_last {
            return Some((bar.close, ExitReason::EndOfData));
        }

        None
    }

    fn try_enter(&mut self, bars: &[Bar], i: usize, signal: &Signal) {
        let bar = &bars[i];
        let config = self.config;
        let symbol = &config.symbol;

        let side = match signal.side() {
            Some(side) => side,
            None => return,
        };
        if self.positions.contains_key(symbol)
            || self.positions.len() >= config.max_open_positions
            || signal.confidence < config.min_confidence
            || (side == OrderSide::Sell && !config.allow_short)
        {
            return;
        }

        let stop_loss = signal.stop_loss.filter(|_| config.use_stop_loss);
        let take_profit = signal.take_profit.filter(|_| config.use_take_profit);

        let provisional = self.position_size(bar.close, stop_loss);
        if provisional < Decimal::ONE {
            debug!(date = %bar.date, "Position size below one unit, skipping entry");
            return;
        }

        let request = FillRequest {
            reference_price: bar.close,
            quantity: provisional,
            side,
            bar,
            bar_index: i,
            bars,
        };
        // One estimate per fill: sizing is repeated against the costed
        // price without drawing jitter twice.
        let estimate = self.cost_model.estimate(&request);
        let costed_price = apply_estimate(&request, estimate).price;
        let quantity = self.position_size(costed_price, stop_loss).min(provisional);
        if quantity < Decimal::ONE {
            debug!(date = %bar.date, "Position size below one unit after costs, skipping entry");
            return;
        }

        let fill = apply_estimate(
            &FillRequest {
                quantity,
                ..request
            },
            estimate,
        );
        let (entry_fee, quote) = self.ledger.charge(&self.schedule, fill.price * quantity);

        debug!(
            symbol = %symbol,
            date = %bar.date,
            side = ?side,
            price = %fill.price,
            quantity = %quantity,
            fee = %entry_fee,
            tier = ?quote.tier_index,
            "Opened position"
        );

        if let Some(ts) = self.trailing_stops.as_mut() {
            ts.init(symbol, side, fill.price);
        }

        self.positions.insert(
            symbol.clone(),
            Position {
                symbol: symbol.clone(),
                side,
                entry_price: fill.price,
                quantity,
                entry_date: bar.date.clone(),
                entry_index: i,
                stop_loss,
                take_profit,
                strategy_id: signal.strategy_id.clone(),
                entry_fee,
                entry_slippage: fill.slippage_cost,
                entry_market_impact: fill.market_impact_cost,
            },
        );
    }

    /// Whole units to trade at `entry_price`.
    ///
    /// The risk budget bounds the size when a stop is set; the position-size
    /// cap always applies.
    fn position_size(&self, entry_price: Decimal, stop_loss: Option<Decimal>) -> Decimal {
        if entry_price <= Decimal::ZERO || self.capital <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let pct = |v: f64| Decimal::from_f64(v).unwrap_or(Decimal::ZERO) / Decimal::ONE_HUNDRED;

        let cap_qty = self.capital * pct(self.config.max_position_size) / entry_price;

        let qty = match stop_loss {
            Some(stop) if (entry_price - stop).abs() > Decimal::ZERO => {
                let risk_amount = self.capital * pct(self.config.risk_per_trade);
                let risk_qty = risk_amount / (entry_price - stop).abs();
                risk_qty.min(cap_qty)
            }
            _ => cap_qty,
        };
        qty.floor().max(Decimal::ZERO)
    }

    fn close_position(
        &mut self,
        pos: Position,
        bars: &[Bar],
        i: usize,
        raw_exit_price: Decimal,
        reason: ExitReason,
    ) {
        let bar = &bars[i];
        let fill = self.cost_model.fill(&FillRequest {
            reference_price: raw_exit_price,
            quantity: pos.quantity,
            side: pos.side.opposite(),
            bar,
            bar_index: i,
            bars,
        });
        let (exit_fee, _) = self
            .ledger
            .charge(&self.schedule, fill.price * pos.quantity);

        // P&L: long = (exit - entry), short = (entry - exit)
        let gross_pnl = (fill.price - pos.entry_price) * pos.quantity * pos.side.sign();
        let fees = pos.entry_fee + exit_fee;
        let pnl = gross_pnl - fees;

        let notional = (pos.entry_price * pos.quantity).to_f64().unwrap_or(0.0);
        let pnl_percent = if notional > 0.0 {
            pnl.to_f64().unwrap_or(0.0) / notional * 100.0
        } else {
            0.0
        };

        if let Some(ts) = self.trailing_stops.as_mut() {
            ts.remove(&pos.symbol);
        }

        self.capital += pnl;

        debug!(
            symbol = %pos.symbol,
            date = %bar.date,
            reason = %reason,
            price = %fill.price,
            pnl = %pnl,
            "Closed position"
        );

        self.trades.push(Trade {
            id: self.trades.len() + 1,
            symbol: pos.symbol,
            strategy_id: pos.strategy_id,
            entry_date: pos.entry_date,
            exit_date: bar.date.clone(),
            side: pos.side.into(),
            entry_price: pos.entry_price,
            exit_price: fill.price,
            quantity: pos.quantity,
            pnl,
            pnl_percent,
            fees,
            slippage: pos.entry_slippage + fill.slippage_cost,
            market_impact: pos.entry_market_impact + fill.market_impact_cost,
            exit_reason: reason,
            holding_periods: i - pos.entry_index,
        });
    }

    fn close_all(&mut self, bars: &[Bar], i: usize, reason: ExitReason) {
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();
        for symbol in symbols {
            if let Some(pos) = self.positions.remove(&symbol) {
                self.close_position(pos, bars, i, bars[i].close, reason);
            }
        }
    }

    /// Realized capital plus open profit at the close, less the entry fees
    /// still owed by open positions.
    fn mark_to_market(&self, bar: &Bar) -> Decimal {
        self.positions.values().fold(self.capital, |equity, pos| {
            equity + pos.unrealized_pnl(bar.close) - pos.entry_fee
        })
    }

    fn finish(
        self,
        bars: &[Bar],
        signals: &[Signal],
        bars_processed: usize,
        halted_early: bool,
        data_quality: DataQualityReport,
    ) -> BacktestResult {
        let start_date = bars[0].date.clone();
        let end_date = bars[bars_processed.saturating_sub(1)].date.clone();
        let span = calendar_span_days(&start_date, &end_date, bars_processed);
        let duration_days = days_between(&start_date, &end_date)
            .map(|d| d.floor() as i64)
            .unwrap_or(0);

        let metrics = compute_metrics(
            &self.trades,
            self.equity.equity_curve(),
            self.config,
            span,
        );

        info!(
            symbol = %self.config.symbol,
            trades = self.trades.len(),
            final_capital = %self.capital,
            total_return = metrics.total_return,
            halted_early,
            "Backtest complete"
        );

        let (equity_curve, drawdown_curve) = self.equity.into_curves();

        BacktestResult {
            symbol: self.config.symbol.clone(),
            strategy_id: strategy_id(signals),
            start_date,
            end_date,
            duration_days,
            bars_processed,
            initial_capital: self.config.initial_capital,
            final_capital: self.capital,
            halted_early,
            trades: self.trades,
            equity_curve,
            drawdown_curve,
            metrics,
            config: self.config.clone(),
            data_quality,
        }
    }
}
