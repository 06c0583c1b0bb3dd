use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::CommissionTier;
use crate::cost_model::MONEY_DP;
use crate::error::{BacktestError, Result};

/// The rate that applies to a single fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionQuote {
    /// Rate in percent of order value.
    pub rate: f64,
    /// Index into the tier list, `None` for the flat rate.
    pub tier_index: Option<usize>,
}

/// Flat or volume-tiered commission rates.
#[derive(Debug, Clone, PartialEq)]
pub struct CommissionSchedule {
    flat_rate: f64,
    tiers: Vec<CommissionTier>,
}

impl CommissionSchedule {
    pub fn new(flat_rate: f64, tiers: Vec<CommissionTier>) -> Self {
        Self { flat_rate, tiers }
    }

    /// Tiers must have finite, non-negative values and strictly ascending
    /// thresholds.
    pub fn validate_tiers(tiers: &[CommissionTier]) -> Result<()> {
        for (i, tier) in tiers.iter().enumerate() {
            if !tier.volume_threshold.is_finite() || tier.volume_threshold < 0.0 {
                return Err(BacktestError::InvalidConfig(format!(
                    "commission tier {} has an invalid volume threshold {}",
                    i, tier.volume_threshold
                )));
            }
            if !tier.rate.is_finite() || tier.rate < 0.0 {
                return Err(BacktestError::InvalidConfig(format!(
                    "commission tier {} has an invalid rate {}",
                    i, tier.rate
                )));
            }
            if i > 0 && tier.volume_threshold <= tiers[i - 1].volume_threshold {
                return Err(BacktestError::InvalidConfig(format!(
                    "commission tier thresholds must be strictly ascending (tier {})",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Select the rate for the given cumulative traded volume.
    ///
    /// Picks the highest threshold that does not exceed `cumulative_volume`.
    /// Volume below the first threshold is billed at the first tier.
    pub fn quote(&self, cumulative_volume: f64) -> CommissionQuote {
        if self.tiers.is_empty() {
            return CommissionQuote {
                rate: self.flat_rate,
                tier_index: None,
            };
        }

        let index = self
            .tiers
            .iter()
            .rposition(|t| cumulative_volume >= t.volume_threshold)
            .unwrap_or(0);

        CommissionQuote {
            rate: self.tiers[index].rate,
            tier_index: Some(index),
        }
    }
}

/// Cumulative traded notional for one simulation run.
///
/// Never shared between runs; every run starts from zero.
#[derive(Debug, Clone, Default)]
pub struct VolumeLedger {
    cumulative: f64,
}

impl VolumeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cumulative_volume(&self) -> f64 {
        self.cumulative
    }

    /// Price a fill and book its notional.
    ///
    /// The rate is selected from the volume traded *before* this fill; the
    /// fill's own notional is added afterwards.
    pub fn charge(
        &mut self,
        schedule: &CommissionSchedule,
        order_value: Decimal,
    ) -> (Decimal, CommissionQuote) {
        let quote = schedule.quote(self.cumulative);
        let rate = Decimal::from_f64(quote.rate).unwrap_or(Decimal::ZERO) / Decimal::ONE_HUNDRED;
        let commission = (order_value.abs() * rate).max(Decimal::ZERO).round_dp(MONEY_DP);

        self.cumulative += order_value.abs().to_f64().unwrap_or(0.0);

        (commission, quote)
    }
}
