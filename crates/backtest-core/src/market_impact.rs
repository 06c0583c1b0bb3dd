use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Timelike};
use rust_decimal::prelude::*;

use crate::config::ExecutionConfig;
use crate::models::Bar;

/// Daily volatility the volatility factor is normalized against.
pub const REFERENCE_VOLATILITY: f64 = 0.015;
pub const MIN_VOLATILITY_FACTOR: f64 = 0.5;
pub const MAX_VOLATILITY_FACTOR: f64 = 3.0;

/// Market impact using the square root model.
///
/// Model: Impact% = Lambda × sqrt(OrderValue / (ADV × Price)) × 100
///
/// Where:
/// - Lambda: market impact coefficient
/// - OrderValue / Price: order size in shares
/// - ADV: average daily volume in shares
///
/// Returns 0 when ADV or price is missing or non-positive.
pub fn square_root_impact(
    order_value: f64,
    average_daily_volume: Option<f64>,
    price: f64,
    coefficient: f64,
) -> f64 {
    let adv = match average_daily_volume {
        Some(adv) if adv > 0.0 && adv.is_finite() => adv,
        _ => return 0.0,
    };
    if price <= 0.0 || !price.is_finite() || order_value <= 0.0 {
        return 0.0;
    }

    let participation = order_value / (adv * price);
    coefficient * participation.sqrt() * 100.0
}

/// Minutes after midnight for intraday bar timestamps. Date-only bars have
/// no time of day.
pub fn bar_minute_of_day(date: &str) -> Option<u32> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Some(dt.hour() * 60 + dt.minute());
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(date, fmt).ok())
        .map(|dt| dt.hour() * 60 + dt.minute())
}

/// Slippage multiplier for the session edges: the opening and closing
/// windows trade thinner books than mid-session.
pub fn time_of_day_factor(date: &str, config: &ExecutionConfig) -> f64 {
    let minute = match bar_minute_of_day(date) {
        Some(m) => m,
        None => return 1.0,
    };
    if minute < config.market_open_minutes || minute > config.market_close_minutes {
        return 1.0;
    }

    if minute < config.market_open_minutes + config.session_edge_minutes {
        config.open_slippage_multiplier
    } else if minute + config.session_edge_minutes >= config.market_close_minutes {
        config.close_slippage_multiplier
    } else {
        1.0
    }
}

/// Sample standard deviation of close-to-close returns over the `window`
/// returns ending at `index`. `None` with fewer than two returns.
pub fn rolling_volatility(bars: &[Bar], index: usize, window: usize) -> Option<f64> {
    if index >= bars.len() || index < 2 {
        return None;
    }
    let start = index.saturating_sub(window);
    let returns: Vec<f64> = bars[start..=index]
        .windows(2)
        .filter_map(|w| {
            let p0 = w[0].close.to_f64()?;
            let p1 = w[1].close.to_f64()?;
            if p0 > 0.0 {
                Some(p1 / p0 - 1.0)
            } else {
                None
            }
        })
        .collect();

    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Volatility relative to [`REFERENCE_VOLATILITY`], scaled and clamped to
/// [0.5, 3.0].
pub fn volatility_factor(volatility: Option<f64>, multiplier: f64) -> f64 {
    match volatility {
        Some(vol) if vol.is_finite() => (vol / REFERENCE_VOLATILITY * multiplier)
            .clamp(MIN_VOLATILITY_FACTOR, MAX_VOLATILITY_FACTOR),
        _ => 1.0,
    }
}

/// Volatility factors memoized by bar index for the lifetime of one run.
#[derive(Debug, Default)]
pub struct VolatilityCache {
    factors: HashMap<usize, f64>,
}

impl VolatilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factor(&mut self, bars: &[Bar], index: usize, config: &ExecutionConfig) -> f64 {
        *self.factors.entry(index).or_insert_with(|| {
            volatility_factor(
                rolling_volatility(bars, index, config.volatility_window),
                config.volatility_multiplier,
            )
        })
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn close_bar(date: &str, close: f64) -> Bar {
        let px = Decimal::from_f64(close).unwrap();
        Bar {
            date: date.to_string(),
            open: px,
            high: px,
            low: px,
            close: px,
            volume: 1_000_000.0,
        }
    }

    #[test]
    fn test_square_root_impact() {
        // 10,000 shares at $100 against 1M ADV: 0.1 * sqrt(0.01) * 100 = 1%
        let impact = square_root_impact(1_000_000.0, Some(1_000_000.0), 100.0, 0.1);
        assert!((impact - 1.0).abs() < 1e-10);

        // Quadrupling the order doubles the impact.
        let bigger = square_root_impact(4_000_000.0, Some(1_000_000.0), 100.0, 0.1);
        assert!((bigger - 2.0 * impact).abs() < 1e-10);
    }

    #[test]
    fn test_impact_degrades_to_zero() {
        assert_eq!(square_root_impact(1_000.0, None, 100.0, 0.1), 0.0);
        assert_eq!(square_root_impact(1_000.0, Some(0.0), 100.0, 0.1), 0.0);
        assert_eq!(square_root_impact(1_000.0, Some(1e6), 0.0, 0.1), 0.0);
    }

    #[test]
    fn test_bar_minute_of_day() {
        assert_eq!(bar_minute_of_day("2024-03-01"), None);
        assert_eq!(bar_minute_of_day("2024-03-01 09:45:00"), Some(585));
        assert_eq!(bar_minute_of_day("2024-03-01T15:50"), Some(950));
        assert_eq!(bar_minute_of_day("2024-03-01T10:00:00-05:00"), Some(600));
    }

    #[test]
    fn test_time_of_day_factor() {
        let config = ExecutionConfig::default();
        assert_eq!(time_of_day_factor("2024-03-01 09:35:00", &config), 1.5);
        assert_eq!(time_of_day_factor("2024-03-01 12:00:00", &config), 1.0);
        assert_eq!(time_of_day_factor("2024-03-01 15:45:00", &config), 1.3);
        assert_eq!(time_of_day_factor("2024-03-01 20:00:00", &config), 1.0);
        assert_eq!(time_of_day_factor("2024-03-01", &config), 1.0);
    }

    #[test]
    fn test_volatility_factor_clamped() {
        assert_eq!(volatility_factor(None, 1.0), 1.0);
        assert!((volatility_factor(Some(0.015), 1.0) - 1.0).abs() < 1e-12);
        assert_eq!(volatility_factor(Some(0.0), 1.0), MIN_VOLATILITY_FACTOR);
        assert_eq!(volatility_factor(Some(0.5), 1.0), MAX_VOLATILITY_FACTOR);
        assert!((volatility_factor(Some(0.015), 2.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_volatility_needs_two_returns() {
        let bars: Vec<Bar> = (0..5)
            .map(|i| close_bar(&format!("2024-01-0{}", i + 1), 100.0 + i as f64))
            .collect();
        assert!(rolling_volatility(&bars, 0, 20).is_none());
        assert!(rolling_volatility(&bars, 1, 20).is_none());
        assert!(rolling_volatility(&bars, 2, 20).is_some());
    }

    #[test]
    fn test_volatility_cache_memoizes_by_index() {
        let mut price = 100.0;
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                price *= if i % 2 == 0 { 1.02 } else { 0.98 };
                close_bar(&format!("2024-01-{:02}", i + 1), price)
            })
            .collect();
        let config = ExecutionConfig::default();
        let mut cache = VolatilityCache::new();

        let first = cache.factor(&bars, 25, &config);
        let again = cache.factor(&bars, 25, &config);
        assert_eq!(first, again);
        assert_eq!(cache.len(), 1);
        // ~2% daily swings are above the 1.5% reference.
        assert!(first > 1.0);
    }
}
