// =============================================================================
// VWAP — Volume Weighted Average Price
// =============================================================================
//
// Cumulative intraday measure using (high + low + close) / 3 as the typical
// price. Callers reset it per session by passing only the session's bars.

use crate::market_data::OhlcvBar;

/// Compute the cumulative VWAP series over `bars` (oldest first). Bars with
/// zero cumulative volume fall back to the typical price.
pub fn calculate_vwap(bars: &[OhlcvBar]) -> Vec<f64> {
    let mut result = Vec::with_capacity(bars.len());
    let mut cum_tp_vol = 0.0;
    let mut cum_vol = 0.0;

    for bar in bars {
        let typical = (bar.high + bar.low + bar.close) / 3.0;
        cum_tp_vol += typical * bar.volume;
        cum_vol += bar.volume;

        if cum_vol > 0.0 {
            result.push(cum_tp_vol / cum_vol);
        } else {
            result.push(typical);
        }
    }

    result
}

/// The most recent VWAP value.
pub fn current_vwap(bars: &[OhlcvBar]) -> Option<f64> {
    calculate_vwap(bars).last().copied()
}
