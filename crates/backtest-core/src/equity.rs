use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Percent decline from `peak` to `equity`, clamped to [0, 100].
pub fn drawdown_percent(peak: Decimal, equity: Decimal) -> f64 {
    let peak_f64 = peak.to_f64().unwrap_or(0.0);
    let equity_f64 = equity.to_f64().unwrap_or(0.0);
    if peak_f64 > 0.0 {
        ((peak_f64 - equity_f64) / peak_f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Equity and drawdown curves for one run.
///
/// Seeded with the initial capital; [`EquityTracker::record`] appends one
/// entry per processed bar.
#[derive(Debug, Clone)]
pub struct EquityTracker {
    equity_curve: Vec<Decimal>,
    drawdown_curve: Vec<f64>,
    peak: Decimal,
    max_drawdown: f64,
    current_underwater: usize,
    max_underwater: usize,
}

impl EquityTracker {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            equity_curve: vec![initial_capital],
            drawdown_curve: vec![0.0],
            peak: initial_capital,
            max_drawdown: 0.0,
            current_underwater: 0,
            max_underwater: 0,
        }
    }

    /// Rebuild a tracker from a finished curve.
    pub fn from_curve(curve: &[Decimal]) -> Option<Self> {
        let (first, rest) = curve.split_first()?;
        let mut tracker = Self::new(*first);
        for equity in rest {
            tracker.record(*equity);
        }
        Some(tracker)
    }

    /// Append the equity at the end of a bar. Returns the drawdown.
    pub fn record(&mut self, equity: Decimal) -> f64 {
        if equity > self.peak {
            self.peak = equity;
        }
        let dd = drawdown_percent(self.peak, equity);

        if equity < self.peak {
            self.current_underwater += 1;
            self.max_underwater = self.max_underwater.max(self.current_underwater);
        } else {
            self.current_underwater = 0;
        }

        self.max_drawdown = self.max_drawdown.max(dd);
        self.equity_curve.push(equity);
        self.drawdown_curve.push(dd);
        dd
    }

    /// Replace the most recent bar's equity (used when positions are
    /// force-closed after the bar was marked).
    pub fn restate_last(&mut self, equity: Decimal) -> f64 {
        if self.equity_curve.len() <= 1 {
            return self.record(equity);
        }
        // Replay the whole curve so peak, drawdown and durations stay exact.
        let mut curve = std::mem::take(&mut self.equity_curve);
        curve.pop();
        curve.push(equity);
        let initial = curve[0];
        let mut rebuilt = Self::new(initial);
        for e in &curve[1..] {
            rebuilt.record(*e);
        }
        *self = rebuilt;
        self.current_drawdown()
    }

    pub fn current_equity(&self) -> Decimal {
        self.equity_curve.last().copied().unwrap_or(Decimal::ZERO)
    }

    pub fn current_drawdown(&self) -> f64 {
        self.drawdown_curve.last().copied().unwrap_or(0.0)
    }

    pub fn peak(&self) -> Decimal {
        self.peak
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Longest run of consecutive bars below a prior peak.
    pub fn max_drawdown_duration(&self) -> usize {
        self.max_underwater
    }

    pub fn equity_curve(&self) -> &[Decimal] {
        &self.equity_curve
    }

    pub fn drawdown_curve(&self) -> &[f64] {
        &self.drawdown_curve
    }

    /// Number of per-bar entries recorded after the seed.
    pub fn bars_recorded(&self) -> usize {
        self.equity_curve.len() - 1
    }

    pub fn into_curves(self) -> (Vec<Decimal>, Vec<f64>) {
        (self.equity_curve, self.drawdown_curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    #[test]
    fn test_seed_entry() {
        let t = EquityTracker::new(d(100_000));
        assert_eq!(t.equity_curve(), &[d(100_000)]);
        assert_eq!(t.drawdown_curve(), &[0.0]);
        assert_eq!(t.bars_recorded(), 0);
    }

    #[test]
    fn test_drawdown_from_running_peak() {
        let mut t = EquityTracker::new(d(100));
        t.record(d(120));
        let dd = t.record(d(90));
        assert!((dd - 25.0).abs() < 1e-10);
        assert!((t.max_drawdown() - 25.0).abs() < 1e-10);
        assert_eq!(t.peak(), d(120));
    }

    #[test]
    fn test_max_drawdown_duration() {
        let mut t = EquityTracker::new(d(100));
        for e in [95, 97, 99, 101, 100, 102, 90, 91] {
            t.record(d(e));
        }
        // 95, 97, 99 → 3 bars underwater; later 90, 91 → 2
        assert_eq!(t.max_drawdown_duration(), 3);
    }

    #[test]
    fn test_drawdown_bounds() {
        let mut t = EquityTracker::new(d(100));
        t.record(d(-50));
        assert_eq!(t.current_drawdown(), 100.0);
        for dd in t.drawdown_curve() {
            assert!((0.0..=100.0).contains(dd));
        }
        assert_eq!(drawdown_percent(Decimal::ZERO, d(10)), 0.0);
    }

    #[test]
    fn test_restate_last() {
        let mut t = EquityTracker::new(d(100));
        t.record(d(110));
        t.record(d(95));
        t.restate_last(d(80));
        assert_eq!(t.equity_curve(), &[d(100), d(110), d(80)]);
        assert!((t.current_drawdown() - (30.0 / 110.0 * 100.0)).abs() < 1e-10);
        assert_eq!(t.bars_recorded(), 2);
    }

    #[test]
    fn test_from_curve() {
        let t = EquityTracker::from_curve(&[d(100), d(90), d(120)]).unwrap();
        assert!((t.max_drawdown() - 10.0).abs() < 1e-10);
        assert!(EquityTracker::from_curve(&[]).is_none());
    }
}
