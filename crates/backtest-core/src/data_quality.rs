use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::*;
use tracing::{debug, warn};

use crate::error::{BacktestError, Result};
use crate::models::*;

/// Close-to-close move flagged as a spike.
const SPIKE_THRESHOLD: f64 = 0.20;

/// Parse a bar date: `YYYY-MM-DD`, RFC 3339, or a naive datetime.
pub fn parse_bar_timestamp(date: &str) -> Option<NaiveDateTime> {
    if let Ok(d) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(date, fmt).ok())
}

/// Bars must be strictly ascending by date. Unparseable dates are compared
/// as strings.
pub fn validate_bar_order(bars: &[Bar]) -> Result<()> {
    for (i, pair) in bars.windows(2).enumerate() {
        let (prev, curr) = (&pair[0], &pair[1]);
        let ascending = match (parse_bar_timestamp(&prev.date), parse_bar_timestamp(&curr.date)) {
            (Some(a), Some(b)) => b > a,
            _ => curr.date > prev.date,
        };
        if !ascending {
            let kind = if curr.date == prev.date {
                "duplicate"
            } else {
                "out-of-order"
            };
            return Err(BacktestError::InvalidData(format!(
                "{} bar date {} at index {} (previous {})",
                kind,
                curr.date,
                i + 1,
                prev.date
            )));
        }
    }
    Ok(())
}

/// Audit the input bars for zero volume, inconsistent OHLC and price spikes.
pub fn check_data_quality(bars: &[Bar]) -> DataQualityReport {
    let mut zero_volume_bars = 0usize;
    let mut price_inconsistencies = 0usize;
    let mut price_spikes = 0usize;
    let mut warnings: Vec<DataWarning> = Vec::new();

    for (i, bar) in bars.iter().enumerate() {
        if bar.volume <= 0.0 {
            zero_volume_bars += 1;
            warnings.push(DataWarning {
                date: bar.date.clone(),
                index: i,
                warning_type: "zero_volume".to_string(),
                message: "Bar has zero or negative volume".to_string(),
            });
        }

        let high = bar.high.to_f64().unwrap_or(0.0);
        let low = bar.low.to_f64().unwrap_or(0.0);
        let open = bar.open.to_f64().unwrap_or(0.0);
        let close = bar.close.to_f64().unwrap_or(0.0);

        if high < low || high < open || high < close || low > open || low > close {
            price_inconsistencies += 1;
            warnings.push(DataWarning {
                date: bar.date.clone(),
                index: i,
                warning_type: "price_inconsistency".to_string(),
                message: format!(
                    "OHLC inconsistent: O={:.2} H={:.2} L={:.2} C={:.2}",
                    open, high, low, close
                ),
            });
        }

        if i > 0 {
            let prev_close = bars[i - 1].close.to_f64().unwrap_or(0.0);
            if prev_close > 0.0 {
                let pct_change = ((close - prev_close) / prev_close).abs();
                if pct_change > SPIKE_THRESHOLD {
                    price_spikes += 1;
                    warnings.push(DataWarning {
                        date: bar.date.clone(),
                        index: i,
                        warning_type: "price_spike".to_string(),
                        message: format!(
                            "{:.1}% close-to-close move from {:.2} to {:.2}",
                            pct_change * 100.0,
                            prev_close,
                            close
                        ),
                    });
                }
            }
        }
    }

    for w in &warnings {
        debug!(date = %w.date, index = w.index, kind = %w.warning_type, "{}", w.message);
    }
    if !warnings.is_empty() {
        warn!(
            bars = bars.len(),
            zero_volume_bars,
            price_inconsistencies,
            price_spikes,
            "Data quality issues found"
        );
    }

    DataQualityReport {
        total_bars: bars.len(),
        zero_volume_bars,
        price_inconsistencies,
        price_spikes,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::{Arc, Mutex};

    fn bar(date: &str, o: i64, h: i64, l: i64, c: i64, volume: f64) -> Bar {
        Bar {
            date: date.to_string(),
            open: Decimal::new(o, 0),
            high: Decimal::new(h, 0),
            low: Decimal::new(l, 0),
            close: Decimal::new(c, 0),
            volume,
        }
    }

    #[test]
    fn test_clean_data_has_no_warnings() {
        let bars = vec![
            bar("2024-01-02", 100, 102, 99, 101, 1e6),
            bar("2024-01-03", 101, 103, 100, 102, 1e6),
        ];
        let report = check_data_quality(&bars);
        assert_eq!(report.total_bars, 2);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_flags_zero_volume_inconsistency_and_spike() {
        let bars = vec![
            bar("2024-01-02", 100, 102, 99, 101, 0.0),
            bar("2024-01-03", 101, 100, 102, 101, 1e6),
            bar("2024-01-04", 130, 131, 129, 130, 1e6),
        ];
        let report = check_data_quality(&bars);
        assert_eq!(report.zero_volume_bars, 1);
        assert_eq!(report.price_inconsistencies, 1);
        assert_eq!(report.price_spikes, 1);
        assert_eq!(report.warnings.len(), 3);
        assert_eq!(report.warnings[2].index, 2);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_warns_once_per_audit() {
        let bars = vec![
            bar("2024-01-02", 100, 102, 99, 101, 0.0),
            bar("2024-01-03", 101, 100, 102, 101, 1e6),
            bar("2024-01-04", 130, 131, 129, 130, 1e6),
        ];
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let report = tracing::subscriber::with_default(subscriber, || check_data_quality(&bars));

        assert_eq!(report.warnings.len(), 3);
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert_eq!(output.lines().count(), 1, "{output}");
        assert!(output.contains("Data quality issues found"));
        assert!(output.contains("price_spikes=1"));
    }

    #[test]
    fn test_validate_bar_order() {
        let ok = vec![
            bar("2024-01-02", 1, 1, 1, 1, 1.0),
            bar("2024-01-03", 1, 1, 1, 1, 1.0),
        ];
        assert!(validate_bar_order(&ok).is_ok());

        let dup = vec![
            bar("2024-01-02", 1, 1, 1, 1, 1.0),
            bar("2024-01-02", 1, 1, 1, 1, 1.0),
        ];
        assert!(matches!(
            validate_bar_order(&dup),
            Err(BacktestError::InvalidData(_))
        ));

        let reversed = vec![
            bar("2024-01-03", 1, 1, 1, 1, 1.0),
            bar("2024-01-02", 1, 1, 1, 1, 1.0),
        ];
        assert!(validate_bar_order(&reversed).is_err());
    }

    #[test]
    fn test_intraday_order_uses_timestamps() {
        let bars = vec![
            bar("2024-01-02 09:30:00", 1, 1, 1, 1, 1.0),
            bar("2024-01-02 09:35:00", 1, 1, 1, 1, 1.0),
            bar("2024-01-02T09:40:00Z", 1, 1, 1, 1, 1.0),
        ];
        assert!(validate_bar_order(&bars).is_ok());
        assert!(parse_bar_timestamp("not a date").is_none());
    }
}
