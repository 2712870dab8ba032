// =============================================================================
// Z-Score — standard deviations from the rolling mean
// =============================================================================
//
// Z < -2 is extremely oversold, Z > 2 extremely overbought. A zero standard
// deviation (flat window) yields a Z of 0.

/// The most recent Z-Score of `closes` over `period`.
pub fn current_zscore(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return Some(0.0);
    }

    let z = (closes[closes.len() - 1] - mean) / std_dev;
    z.is_finite().then_some(z)
}
