// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band (SMA), upper band (SMA + k*σ), lower band (SMA - k*σ).
// The mean-reversion strategy buys extremes below the lower band.

/// Result of a Bollinger Band calculation over the latest window.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate Bollinger Bands over the most recent `period` closes.
///
/// Returns `None` when there are fewer than `period` data points, the period
/// is zero, or the result is non-finite. For any valid input,
/// `lower <= middle <= upper` holds.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std.abs() * std_dev;
    let lower = middle - num_std.abs() * std_dev;

    if upper.is_finite() && lower.is_finite() {
        Some(BollingerBands {
            upper,
            middle,
            lower,
        })
    } else {
        None
    }
}
