// =============================================================================
// Kelly Criterion — adaptive position sizing from historical edge
// =============================================================================
//
// f* = p - (1 - p) / R  where R = avg_win / avg_loss.
//
// Full Kelly is mathematically optimal but brutally volatile; the engine
// scales the raw fraction by the configured mode. Strategies with a negative
// edge size to zero — the formula dictates sitting in cash.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::LedgerStore;

/// Minimum resolved trades before historical metrics are trusted.
const MIN_RESOLVED_TRADES: usize = 10;

/// Kelly scaling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KellyMode {
    Full,
    Half,
    Quarter,
}

impl Default for KellyMode {
    fn default() -> Self {
        Self::Half
    }
}

impl KellyMode {
    fn scale(self) -> f64 {
        match self {
            Self::Full => 1.0,
            Self::Half => 0.5,
            Self::Quarter => 0.25,
        }
    }
}

impl std::fmt::Display for KellyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Half => write!(f, "half"),
            Self::Quarter => write!(f, "quarter"),
        }
    }
}

/// Historical performance sample for one strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceStats {
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

impl PerformanceStats {
    /// Expected profit per trade: p * avg_win - (1 - p) * avg_loss.
    pub fn expectancy(&self) -> f64 {
        self.win_rate * self.avg_win - (1.0 - self.win_rate) * self.avg_loss
    }
}

/// Kelly sizing engine.
#[derive(Debug, Clone, Copy)]
pub struct KellyEngine {
    pub mode: KellyMode,
}

impl KellyEngine {
    pub fn new(mode: KellyMode) -> Self {
        Self { mode }
    }

    /// The scaled Kelly fraction in [0, 1].
    ///
    /// Returns 0 for any invalid input: win rate outside (0, 1) or
    /// non-positive average win/loss.
    pub fn calculate_fraction(&self, win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
        if win_rate <= 0.0 || win_rate >= 1.0 {
            return 0.0;
        }
        if avg_win <= 0.0 || avg_loss <= 0.0 {
            return 0.0;
        }

        let payoff_ratio = avg_win / avg_loss;
        let raw = win_rate - (1.0 - win_rate) / payoff_ratio;

        if raw <= 0.0 {
            return 0.0;
        }

        (raw * self.mode.scale()).min(1.0)
    }

    /// Translate a Kelly fraction into a share quantity using the distance to
    /// the stop. Kelly sizing implies a known per-share risk; with a
    /// degenerate entry/stop the answer is zero.
    pub fn calculate_position_size(
        &self,
        account_equity: Decimal,
        kelly_fraction: f64,
        entry_price: Decimal,
        stop_loss_price: Decimal,
    ) -> Decimal {
        if kelly_fraction <= 0.0
            || entry_price <= Decimal::ZERO
            || stop_loss_price <= Decimal::ZERO
        {
            return Decimal::ZERO;
        }

        let risk_per_share = (entry_price - stop_loss_price).abs();
        if risk_per_share == Decimal::ZERO {
            return Decimal::ZERO;
        }

        let fraction = Decimal::from_f64_retain(kelly_fraction).unwrap_or(Decimal::ZERO);
        let capital_to_risk = account_equity * fraction;

        capital_to_risk / risk_per_share
    }

    /// Derive `(win_rate, avg_win, avg_loss)` for a strategy from its filled
    /// sells with realized P&L. Returns `None` below the statistical baseline
    /// of [`MIN_RESOLVED_TRADES`] resolved outcomes.
    pub fn historical_performance(
        &self,
        ledger: &LedgerStore,
        strategy_name: &str,
    ) -> Option<PerformanceStats> {
        let pnls = ledger.resolved_sell_pnls(strategy_name);

        let mut wins: Vec<f64> = Vec::new();
        let mut losses: Vec<f64> = Vec::new();
        for pnl in pnls {
            let v = pnl.to_f64().unwrap_or(0.0);
            if v > 0.0 {
                wins.push(v);
            } else if v < 0.0 {
                losses.push(v.abs());
            }
        }

        let total = wins.len() + losses.len();
        if total < MIN_RESOLVED_TRADES {
            debug!(
                strategy = strategy_name,
                resolved = total,
                "insufficient history for Kelly metrics"
            );
            return None;
        }

        let win_rate = wins.len() as f64 / total as f64;
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };

        Some(PerformanceStats {
            win_rate,
            avg_win,
            avg_loss,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Trade;
    use crate::types::{Side, TradeStatus};
    use rust_decimal_macros::dec;

    #[test]
    fn fraction_full_mode_known_values() {
        let engine = KellyEngine::new(KellyMode::Full);
        // p = 0.6, R = 2 => f* = 0.6 - 0.4/2 = 0.4
        let f = engine.calculate_fraction(0.6, 200.0, 100.0);
        assert!((f - 0.4).abs() < 1e-12);
    }

    #[test]
    fn fraction_scaled_by_mode() {
        let half = KellyEngine::new(KellyMode::Half);
        let quarter = KellyEngine::new(KellyMode::Quarter);
        assert!((half.calculate_fraction(0.6, 200.0, 100.0) - 0.2).abs() < 1e-12);
        assert!((quarter.calculate_fraction(0.6, 200.0, 100.0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn fraction_zero_on_invalid_inputs() {
        let engine = KellyEngine::new(KellyMode::Full);
        assert_eq!(engine.calculate_fraction(0.0, 100.0, 50.0), 0.0);
        assert_eq!(engine.calculate_fraction(1.0, 100.0, 50.0), 0.0);
        assert_eq!(engine.calculate_fraction(-0.2, 100.0, 50.0), 0.0);
        assert_eq!(engine.calculate_fraction(0.5, 0.0, 50.0), 0.0);
        assert_eq!(engine.calculate_fraction(0.5, 100.0, -1.0), 0.0);
    }

    #[test]
    fn fraction_never_negative() {
        let engine = KellyEngine::new(KellyMode::Full);
        // Negative edge: p = 0.3, R = 1 => f* = 0.3 - 0.7 = -0.4 => clamp 0.
        assert_eq!(engine.calculate_fraction(0.3, 100.0, 100.0), 0.0);
        // Break-even boundary: p(aw + al) == al => f* == 0.
        assert_eq!(engine.calculate_fraction(0.5, 100.0, 100.0), 0.0);
    }

    #[test]
    fn position_size_from_stop_distance() {
        let engine = KellyEngine::new(KellyMode::Full);
        // Risk $10k (equity 100k * f 0.1), $5 per share => 2000 shares.
        let qty = engine.calculate_position_size(dec!(100000), 0.1, dec!(100), dec!(95));
        assert_eq!(qty, dec!(2000));
    }

    #[test]
    fn position_size_zero_when_degenerate() {
        let engine = KellyEngine::new(KellyMode::Full);
        assert_eq!(
            engine.calculate_position_size(dec!(100000), 0.1, dec!(100), dec!(100)),
            Decimal::ZERO
        );
        assert_eq!(
            engine.calculate_position_size(dec!(100000), 0.0, dec!(100), dec!(95)),
            Decimal::ZERO
        );
        assert_eq!(
            engine.calculate_position_size(dec!(100000), 0.1, Decimal::ZERO, dec!(95)),
            Decimal::ZERO
        );
    }

    fn seed_sells(ledger: &LedgerStore, strategy: &str, pnls: &[i64]) {
        for &p in pnls {
            let mut t = Trade::new("AAPL", Side::Sell, dec!(1), strategy);
            t.status = TradeStatus::Filled;
            t.realized_pnl = Some(Decimal::from(p));
            ledger.insert(t);
        }
    }

    #[test]
    fn history_requires_ten_resolved_trades() {
        let ledger = LedgerStore::in_memory();
        let engine = KellyEngine::new(KellyMode::Half);
        seed_sells(&ledger, "momentum_v1", &[100, -50, 100, -50, 100]);
        assert!(engine.historical_performance(&ledger, "momentum_v1").is_none());
    }

    #[test]
    fn history_computes_expected_metrics() {
        let ledger = LedgerStore::in_memory();
        let engine = KellyEngine::new(KellyMode::Half);
        // 6 wins of $100, 4 losses of $50.
        seed_sells(
            &ledger,
            "momentum_v1",
            &[100, 100, 100, 100, 100, 100, -50, -50, -50, -50],
        );
        let stats = engine
            .historical_performance(&ledger, "momentum_v1")
            .unwrap();
        assert!((stats.win_rate - 0.6).abs() < 1e-12);
        assert!((stats.avg_win - 100.0).abs() < 1e-12);
        assert!((stats.avg_loss - 50.0).abs() < 1e-12);
        // Expectancy = 0.6*100 - 0.4*50 = 40.
        assert!((stats.expectancy() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn history_ignores_other_strategies() {
        let ledger = LedgerStore::in_memory();
        let engine = KellyEngine::new(KellyMode::Half);
        seed_sells(
            &ledger,
            "other_strategy",
            &[100, 100, 100, 100, 100, 100, -50, -50, -50, -50],
        );
        assert!(engine.historical_performance(&ledger, "momentum_v1").is_none());
    }
}
