use rust_decimal::Decimal;

use crate::models::{Bar, OrderSide};

/// Check stop-loss for a position.
///
/// Longs stop out when the bar trades at or BELOW the stop; shorts when it
/// trades at or ABOVE it.
pub fn stop_triggered(side: OrderSide, bar: &Bar, stop_price: Decimal) -> bool {
    match side {
        OrderSide::Buy => bar.low <= stop_price,
        OrderSide::Sell => bar.high >= stop_price,
    }
}

/// Check take-profit for a position.
///
/// Longs take profit when the bar trades at or ABOVE the target; shorts when
/// it trades at or BELOW it.
pub fn target_triggered(side: OrderSide, bar: &Bar, target_price: Decimal) -> bool {
    match side {
        OrderSide::Buy => bar.high >= target_price,
        OrderSide::Sell => bar.low <= target_price,
    }
}

/// Gap-through fill price for a stop.
///
/// If the bar opens beyond the stop, fill at the (worse) open.
pub fn stop_fill_price(side: OrderSide, bar: &Bar, stop_price: Decimal) -> Decimal {
    match side {
        OrderSide::Buy if bar.open <= stop_price => bar.open,
        OrderSide::Sell if bar.open >= stop_price => bar.open,
        _ => stop_price,
    }
}

/// Gap-through fill price for a target.
///
/// If the bar opens beyond the target, fill at the (better) open.
pub fn target_fill_price(side: OrderSide, bar: &Bar, target_price: Decimal) -> Decimal {
    match side {
        OrderSide::Buy if bar.open >= target_price => bar.open,
        OrderSide::Sell if bar.open <= target_price => bar.open,
        _ => target_price,
    }
}

/// A signal reverses a position when it asks for the opposite side.
pub fn is_reversal(position_side: OrderSide, signal_side: Option<OrderSide>) -> bool {
    signal_side == Some(position_side.opposite())
}
