//! Execution cost models.
//!
//! A simulation run owns exactly one model, chosen from the configuration:
//! [`SimpleCostModel`] charges a fixed slippage plus half the spread, while
//! [`RealisticCostModel`] layers square-root market impact, session-edge and
//! volatility scaling, and optional seeded jitter on top.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::config::{BacktestConfig, ExecutionConfig};
use crate::market_impact::{square_root_impact, time_of_day_factor, VolatilityCache};
use crate::models::{Bar, OrderSide};

/// Decimal places kept on fill prices and cost amounts.
pub const MONEY_DP: u32 = 8;

/// Everything a cost model may look at when pricing one fill.
#[derive(Debug, Clone, Copy)]
pub struct FillRequest<'a> {
    pub reference_price: Decimal,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub bar: &'a Bar,
    pub bar_index: usize,
    pub bars: &'a [Bar],
}

/// Price adjustment for one fill, in percent of the reference price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionEstimate {
    /// Total adverse price move, impact included.
    pub slippage_percent: f64,
    /// The share of `slippage_percent` caused by market impact.
    pub market_impact_percent: f64,
    pub time_of_day_factor: f64,
    pub volatility_factor: f64,
}

/// A priced fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: Decimal,
    /// Currency cost of non-impact slippage.
    pub slippage_cost: Decimal,
    pub market_impact_cost: Decimal,
    pub estimate: ExecutionEstimate,
}

pub trait ExecutionCostModel: Send {
    fn estimate(&mut self, request: &FillRequest<'_>) -> ExecutionEstimate;

    /// Model name for logging.
    fn name(&self) -> &'static str;

    /// Price a fill: buys fill above the reference, sells below.
    fn fill(&mut self, request: &FillRequest<'_>) -> Fill {
        let estimate = self.estimate(request);
        apply_estimate(request, estimate)
    }
}

pub fn apply_estimate(request: &FillRequest<'_>, estimate: ExecutionEstimate) -> Fill {
    let adj = Decimal::from_f64(estimate.slippage_percent).unwrap_or(Decimal::ZERO)
        / Decimal::ONE_HUNDRED;
    let price = match request.side {
        OrderSide::Buy => request.reference_price * (Decimal::ONE + adj),
        OrderSide::Sell => request.reference_price * (Decimal::ONE - adj),
    }
    .max(Decimal::ZERO)
    .round_dp(MONEY_DP);

    let total_cost = (price - request.reference_price).abs() * request.quantity.abs();
    let market_impact_cost = if estimate.slippage_percent > 0.0 {
        let share = (estimate.market_impact_percent / estimate.slippage_percent).clamp(0.0, 1.0);
        (total_cost * Decimal::from_f64(share).unwrap_or(Decimal::ZERO)).round_dp(MONEY_DP)
    } else {
        Decimal::ZERO
    };

    Fill {
        price,
        slippage_cost: total_cost - market_impact_cost,
        market_impact_cost,
        estimate,
    }
}

/// Fixed-percentage slippage plus half the quoted spread.
#[derive(Debug, Clone)]
pub struct SimpleCostModel {
    slippage: f64,
    half_spread: f64,
}

impl SimpleCostModel {
    pub fn new(slippage: f64, spread: f64) -> Self {
        Self {
            slippage,
            half_spread: spread / 2.0,
        }
    }
}

impl ExecutionCostModel for SimpleCostModel {
    fn estimate(&mut self, _request: &FillRequest<'_>) -> ExecutionEstimate {
        ExecutionEstimate {
            slippage_percent: self.slippage + self.half_spread,
            market_impact_percent: 0.0,
            time_of_day_factor: 1.0,
            volatility_factor: 1.0,
        }
    }

    fn name(&self) -> &'static str {
        "SimpleCostModel"
    }
}

/// Multi-factor execution model.
///
/// slippage% = (base + half spread + impact) × time-of-day × volatility × jitter
pub struct RealisticCostModel {
    base_slippage: f64,
    execution: ExecutionConfig,
    volatility: VolatilityCache,
    rng: ChaCha8Rng,
}

impl RealisticCostModel {
    pub fn new(slippage: f64, spread: f64, execution: ExecutionConfig, seed: u64) -> Self {
        Self {
            base_slippage: slippage + spread / 2.0,
            execution,
            volatility: VolatilityCache::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl ExecutionCostModel for RealisticCostModel {
    fn estimate(&mut self, request: &FillRequest<'_>) -> ExecutionEstimate {
        let price = request.reference_price.to_f64().unwrap_or(0.0);
        let quantity = request.quantity.abs().to_f64().unwrap_or(0.0);

        let impact = square_root_impact(
            price * quantity,
            self.execution.average_daily_volume,
            price,
            self.execution.market_impact_coefficient,
        );
        let tod = time_of_day_factor(&request.bar.date, &self.execution);
        let vol = self
            .volatility
            .factor(request.bars, request.bar_index, &self.execution);

        let jitter = if self.execution.slippage_jitter > 0.0 {
            let j = self.execution.slippage_jitter;
            1.0 + self.rng.gen_range(-j..j)
        } else {
            1.0
        };

        let scale = tod * vol * jitter;
        ExecutionEstimate {
            slippage_percent: (self.base_slippage + impact) * scale,
            market_impact_percent: impact * scale,
            time_of_day_factor: tod,
            volatility_factor: vol,
        }
    }

    fn name(&self) -> &'static str {
        "RealisticCostModel"
    }
}

/// Choose the cost model the configuration asks for.
pub fn build_cost_model(config: &BacktestConfig) -> Box<dyn ExecutionCostModel> {
    match &config.execution {
        Some(execution) => Box::new(RealisticCostModel::new(
            config.slippage,
            config.spread,
            execution.clone(),
            config.rng_seed,
        )),
        None => Box::new(SimpleCostModel::new(config.slippage, config.spread)),
    }
}
