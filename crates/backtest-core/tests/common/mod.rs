#![allow(dead_code)]

use backtest_core::{Bar, Signal};
use chrono::{Duration, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Daily bars following a seeded random walk, with a trend-following signal:
/// buy after two up closes, sell after two down closes.
pub fn trending_market(n: usize, seed: u64) -> (Vec<Bar>, Vec<Signal>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let mut close = 50.0_f64;
    let mut bars: Vec<Bar> = Vec::with_capacity(n);

    for i in 0..n {
        let open = close;
        let drift = if (i / 40) % 2 == 0 { 0.002 } else { -0.002 };
        close = (close * (1.0 + drift + rng.gen_range(-0.02..0.02))).max(1.0);
        let px = |v: f64| Decimal::from_f64(v).unwrap().round_dp(2);
        bars.push(Bar {
            date: (start + Duration::days(i as i64)).format("%Y-%m-%d").to_string(),
            open: px(open),
            high: px(open.max(close) * 1.005),
            low: px(open.min(close) * 0.995),
            close: px(close),
            volume: 1_000_000.0,
        });
    }

    let signals = (0..n)
        .map(|i| {
            if i < 2 {
                return Signal::hold();
            }
            let (c0, c1, c2) = (bars[i - 2].close, bars[i - 1].close, bars[i].close);
            if c2 > c1 && c1 > c0 {
                Signal::buy()
                    .with_stop_loss(c2 * Decimal::new(96, 2))
                    .with_strategy("trend")
            } else if c2 < c1 && c1 < c0 {
                Signal::sell()
                    .with_stop_loss(c2 * Decimal::new(104, 2))
                    .with_strategy("trend")
            } else {
                Signal::hold()
            }
        })
        .collect();

    (bars, signals)
}
