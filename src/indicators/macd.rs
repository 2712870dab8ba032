// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
// macd_line   = EMA(fast) - EMA(slow)
// signal_line = EMA(macd_line, signal_period)
// histogram   = macd_line - signal_line
//
// Series are aligned to the slow EMA; standard parameters are (12, 26, 9).

use super::ema::calculate_ema;

/// MACD series, oldest first, aligned with each other.
#[derive(Debug, Clone)]
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Compute MACD over `closes`. Returns `None` when there is not enough data
/// for the slow EMA plus the signal EMA.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);
    if slow_ema.is_empty() {
        return None;
    }

    // Both series end at the latest close; align their tails.
    let len = slow_ema.len().min(fast_ema.len());
    let fast_tail = &fast_ema[fast_ema.len() - len..];
    let slow_tail = &slow_ema[slow_ema.len() - len..];

    let macd_line: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);
    if signal_line.is_empty() {
        return None;
    }

    let tail = signal_line.len();
    let macd_tail = &macd_line[macd_line.len() - tail..];
    let histogram: Vec<f64> = macd_tail
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    Some(MacdResult {
        macd_line: macd_tail.to_vec(),
        signal_line,
        histogram,
    })
}

/// The most recent histogram value (macd line minus signal line). Positive
/// means momentum is expanding; the momentum-confirmation gate in the
/// strategy filters blocks buys while it is negative.
pub fn current_histogram(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<f64> {
    calculate_macd(closes, fast, slow, signal_period)?
        .histogram
        .last()
        .copied()
}
