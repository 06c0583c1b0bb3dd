use std::collections::HashMap;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::{Bar, OrderSide};

/// Manages trailing stop prices for open positions.
pub struct TrailingStopManager {
    /// symbol → (position side, current trailing stop price)
    stops: HashMap<String, (OrderSide, Decimal)>,
    trailing_pct: Decimal,
}

impl TrailingStopManager {
    /// `trailing_stop_percent` is in percent (5.0 = 5%).
    pub fn new(trailing_stop_percent: f64) -> Self {
        Self {
            stops: HashMap::new(),
            trailing_pct: Decimal::from_f64(trailing_stop_percent).unwrap_or(Decimal::ZERO)
                / Decimal::ONE_HUNDRED,
        }
    }

    /// Initialize a trailing stop for a new position.
    pub fn init(&mut self, symbol: &str, side: OrderSide, entry_price: Decimal) {
        self.stops
            .insert(symbol.to_string(), (side, self.level(side, entry_price)));
    }

    /// Ratchet the stop with the bar's favourable extreme (high for longs,
    /// low for shorts). The stop only ever tightens.
    /// Returns the current stop price.
    pub fn update(&mut self, symbol: &str, bar: &Bar) -> Option<Decimal> {
        let trailing_pct = self.trailing_pct;
        let (side, stop) = self.stops.get_mut(symbol)?;
        match side {
            OrderSide::Buy => {
                let new_stop = bar.high * (Decimal::ONE - trailing_pct);
                if new_stop > *stop {
                    *stop = new_stop;
                }
            }
            OrderSide::Sell => {
                let new_stop = bar.low * (Decimal::ONE + trailing_pct);
                if new_stop < *stop {
                    *stop = new_stop;
                }
            }
        }
        Some(*stop)
    }

    /// Get the current trailing stop price for a symbol.
    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.stops.get(symbol).map(|(_, stop)| *stop)
    }

    /// Remove the trailing stop for a closed position.
    pub fn remove(&mut self, symbol: &str) {
        self.stops.remove(symbol);
    }

    fn level(&self, side: OrderSide, reference: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => reference * (Decimal::ONE - self.trailing_pct),
            OrderSide::Sell => reference * (Decimal::ONE + self.trailing_pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: i64, low: i64) -> Bar {
        Bar {
            date: "2024-01-02".to_string(),
            open: Decimal::new(low, 0),
            high: Decimal::new(high, 0),
            low: Decimal::new(low, 0),
            close: Decimal::new(high, 0),
            volume: 1_000.0,
        }
    }

    #[test]
    fn test_long_stop_ratchets_up_only() {
        let mut ts = TrailingStopManager::new(10.0);
        ts.init("AAPL", OrderSide::Buy, Decimal::new(100, 0));
        assert_eq!(ts.get("AAPL"), Some(Decimal::new(90, 0)));

        assert_eq!(ts.update("AAPL", &bar(120, 110)), Some(Decimal::new(108, 0)));
        // A lower high never loosens the stop.
        assert_eq!(ts.update("AAPL", &bar(105, 100)), Some(Decimal::new(108, 0)));
    }

    #[test]
    fn test_short_stop_ratchets_down_only() {
        let mut ts = TrailingStopManager::new(10.0);
        ts.init("AAPL", OrderSide::Sell, Decimal::new(100, 0));
        assert_eq!(ts.get("AAPL"), Some(Decimal::new(110, 0)));

        assert_eq!(ts.update("AAPL", &bar(90, 80)), Some(Decimal::new(88, 0)));
        assert_eq!(ts.update("AAPL", &bar(95, 85)), Some(Decimal::new(88, 0)));
    }

    #[test]
    fn test_remove() {
        let mut ts = TrailingStopManager::new(5.0);
        ts.init("AAPL", OrderSide::Buy, Decimal::new(100, 0));
        ts.remove("AAPL");
        assert_eq!(ts.get("AAPL"), None);
        assert_eq!(ts.update("AAPL", &bar(120, 110)), None);
    }
}
