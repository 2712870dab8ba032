// =============================================================================
// Average True Range (ATR)
// =============================================================================
//
// ATR measures how much an asset moves per bar, counting overnight gaps as
// part of the move. The volatility gate in the strategy filters uses it to
// keep new entries out of an overheated tape.
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// The series is Wilder-smoothed, seeded with the SMA of the first `period`
// true ranges. ATR is never negative.
// =============================================================================

use crate::market_data::OhlcvBar;

/// True range of `bar` against the previous close: the bar's own range
/// widened by any gap from the prior session.
fn true_range(bar: &OhlcvBar, prev_close: f64) -> f64 {
    let range = bar.high - bar.low;
    let gap_high = (bar.high - prev_close).abs();
    let gap_low = (bar.low - prev_close).abs();
    range.max(gap_high).max(gap_low)
}

/// Compute the ATR series over `bars` (oldest first), one value per bar
/// starting at index `period`.
///
/// Returns an empty `Vec` when the period is zero or there are fewer than
/// `period + 1` bars (each true range needs a previous close); the series is
/// truncated at the first non-finite value.
pub fn calculate_atr(bars: &[OhlcvBar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return Vec::new();
    }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .collect();

    let seed = true_ranges[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(true_ranges.len() - period + 1);
    series.push(seed);

    let carry = (period - 1) as f64;
    let mut prev = seed;
    for &tr in &true_ranges[period..] {
        let atr = (prev * carry + tr) / period as f64;
        if !atr.is_finite() {
            break;
        }
        series.push(atr);
        prev = atr;
    }

    series
}

/// The most recent ATR value.
pub fn current_atr(bars: &[OhlcvBar], period: usize) -> Option<f64> {
    calculate_atr(bars, period).last().copied()
}

/// ATR as a percentage of the latest close, so volatility is comparable
/// across assets on different price scales.
pub fn current_atr_pct(bars: &[OhlcvBar], period: usize) -> Option<f64> {
    let atr = current_atr(bars, period)?;
    let close = bars.last()?.close;
    if close == 0.0 {
        return None;
    }
    let pct = atr / close * 100.0;
    pct.is_finite().then_some(pct)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(i: i64, high: f64, low: f64, close: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: "AAPL".into(),
            timeframe: "1d".into(),
            timestamp: Utc.timestamp_opt(i * 86_400, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn atr_period_zero() {
        let bars: Vec<OhlcvBar> = (0..20).map(|i| bar(i, 105.0, 95.0, 100.0)).collect();
        assert!(calculate_atr(&bars, 0).is_empty());
    }

    #[test]
    fn atr_insufficient_data() {
        let bars: Vec<OhlcvBar> = (0..10).map(|i| bar(i, 105.0, 95.0, 100.0)).collect();
        assert!(calculate_atr(&bars, 14).is_empty());
        assert!(current_atr(&bars, 14).is_none());
    }

    #[test]
    fn atr_constant_range_stays_at_range() {
        // Constant H-L of 10 with close at midpoint: every TR is 10, so every
        // ATR value is exactly 10.
        let bars: Vec<OhlcvBar> = (0..40).map(|i| bar(i, 105.0, 95.0, 100.0)).collect();
        let series = calculate_atr(&bars, 14);
        assert_eq!(series.len(), 40 - 14);
        for v in series {
            assert!((v - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn atr_counts_gaps_through_prev_close() {
        // Gap up: |H - prevClose| dominates H - L.
        let bars = vec![
            bar(0, 105.0, 95.0, 95.0),
            bar(1, 115.0, 108.0, 112.0),
            bar(2, 118.0, 110.0, 115.0),
            bar(3, 120.0, 113.0, 118.0),
        ];
        let atr = current_atr(&bars, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn atr_non_negative_for_arbitrary_inputs() {
        let bars: Vec<OhlcvBar> = (0..50)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.5).sin() * 10.0;
                bar(i, base + 2.0, base - 2.0, base)
            })
            .collect();
        for v in calculate_atr(&bars, 14) {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn atr_pct_normalises_by_close() {
        // ATR 10 on a close of 100 is 10%.
        let bars: Vec<OhlcvBar> = (0..40).map(|i| bar(i, 105.0, 95.0, 100.0)).collect();
        let pct = current_atr_pct(&bars, 14).unwrap();
        assert!((pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn atr_nan_in_seed_window_returns_empty() {
        let mut bars: Vec<OhlcvBar> = (0..5).map(|i| bar(i, 105.0, 95.0, 100.0)).collect();
        bars[1].high = f64::NAN;
        assert!(calculate_atr(&bars, 3).is_empty());
    }
}
