// =============================================================================
// Strategy Contract & Registry
// =============================================================================
//
// Every strategy implements the same three operations over a bar window:
// entry signal generation, exit evaluation for an open position, and
// heuristic position sizing. Concrete behaviour is selected at runtime by the
// `strategy_type` key in the definition's parameter bag — a registry lookup,
// no reflection.
//
// Optional post-processing filters (AI confidence, regime, fundamentals,
// Kelly sizing) may downgrade a signal to HOLD or zero its quantity; they
// never upgrade one.
// =============================================================================

pub mod mean_reversion;
pub mod momentum_breakout;
pub mod sector_rotation;
pub mod smart_dca;

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::StrategyDef;
use crate::indicators::{atr, macd, sma};
use crate::kelly::KellyEngine;
use crate::ledger::LedgerStore;
use crate::market_data::OhlcvBar;
use crate::types::{Signal, SignalAction};

use mean_reversion::MeanReversion;
use momentum_breakout::MomentumBreakout;
use sector_rotation::SectorRotation;
use smart_dca::SmartDca;

/// The three operations every strategy provides.
pub trait TradingStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Decide whether to enter at the last bar.
    fn generate_signal(&self, ticker: &str, bars: &[OhlcvBar]) -> Signal;

    /// Decide whether an open position should be closed.
    fn check_exit(
        &self,
        ticker: &str,
        entry_price: Decimal,
        current_price: Decimal,
        bars: &[OhlcvBar],
    ) -> Signal;

    /// Heuristic share quantity for an entry at `price` given the allocated
    /// equity slice.
    fn calculate_position_size(
        &self,
        ticker: &str,
        price: Decimal,
        account_equity: Decimal,
    ) -> Decimal;
}

/// Strategy types the registry can construct.
pub const SUPPORTED_STRATEGY_TYPES: [&str; 4] = [
    "momentum_breakout",
    "mean_reversion",
    "sector_rotation",
    "smart_dca",
];

/// Construct a strategy from its definition. `None` when `strategy_type` is
/// missing or unknown (a validation error at the caller).
pub fn build_strategy(def: &StrategyDef) -> Option<Box<dyn TradingStrategy>> {
    match def.strategy_type()? {
        "momentum_breakout" => Some(Box::new(MomentumBreakout::new(def))),
        "mean_reversion" => Some(Box::new(MeanReversion::new(def))),
        "sector_rotation" => Some(Box::new(SectorRotation::new(def))),
        "smart_dca" => Some(Box::new(SmartDca::new(def))),
        other => {
            debug!(strategy_type = other, "unknown strategy type");
            None
        }
    }
}

// =============================================================================
// Parameter bag accessors
// =============================================================================

pub(crate) fn param_f64(params: &serde_json::Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

pub(crate) fn param_usize(params: &serde_json::Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub(crate) fn param_bool(params: &serde_json::Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub(crate) fn param_decimal(params: &serde_json::Value, key: &str, default: Decimal) -> Decimal {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .and_then(Decimal::from_f64_retain)
        .unwrap_or(default)
}

// =============================================================================
// Shared exit ladder
// =============================================================================

/// Standard stop-loss / take-profit rungs checked before any
/// strategy-specific reversal condition.
pub(crate) fn stop_or_take_profit(
    strategy_name: &str,
    ticker: &str,
    entry_price: Decimal,
    current_price: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
) -> Option<Signal> {
    if entry_price <= Decimal::ZERO {
        return None;
    }

    let loss_pct = (entry_price - current_price) / entry_price * Decimal::ONE_HUNDRED;
    if loss_pct >= stop_loss_pct {
        return Some(Signal {
            action: SignalAction::Sell,
            ticker: ticker.to_string(),
            price: Some(current_price),
            quantity: Decimal::ZERO,
            confidence: 1.0,
            reason: format!("Stop loss hit: -{loss_pct:.1}% (limit: {stop_loss_pct}%)"),
            strategy_name: strategy_name.to_string(),
        });
    }

    let gain_pct = (current_price - entry_price) / entry_price * Decimal::ONE_HUNDRED;
    if gain_pct >= take_profit_pct {
        return Some(Signal {
            action: SignalAction::Sell,
            ticker: ticker.to_string(),
            price: Some(current_price),
            quantity: Decimal::ZERO,
            confidence: 1.0,
            reason: format!("Take profit hit: +{gain_pct:.1}% (target: {take_profit_pct}%)"),
            strategy_name: strategy_name.to_string(),
        });
    }

    None
}

// =============================================================================
// Post-processing filters
// =============================================================================

/// Downgrade an actionable signal to HOLD when the configured AI model's
/// confidence floor is not met. A definition with `ai_model = "none"` passes
/// everything through.
pub fn apply_ai_filters(signal: Signal, def: &StrategyDef) -> Signal {
    if !signal.is_actionable() || def.ai_model == "none" {
        return signal;
    }

    if signal.confidence < def.ai_confidence_threshold {
        let reason = format!(
            "AI filter: confidence {:.2} below threshold {:.2}",
            signal.confidence, def.ai_confidence_threshold
        );
        debug!(strategy = %signal.strategy_name, ticker = %signal.ticker, %reason, "signal downgraded");
        return Signal::hold(&signal.ticker, &signal.strategy_name, reason);
    }

    signal
}

/// Downgrade buys the current market regime argues against. Three gates,
/// each opt-in through the parameter bag; exits always pass.
///
/// - `regime_filter`: no new longs while the close sits under the long-term
///   trend line (`regime_sma_period`, default 200).
/// - `max_atr_pct`: stand aside when ATR(14) as a percentage of the close
///   exceeds the cap (an overheated tape).
/// - `macd_confirmation`: require a non-negative MACD(12, 26, 9) histogram
///   before committing capital.
pub fn apply_regime_filters(signal: Signal, def: &StrategyDef, bars: &[OhlcvBar]) -> Signal {
    if signal.action != SignalAction::Buy {
        return signal;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let Some(&close) = closes.last() else {
        return signal;
    };

    // Bear-trend gate.
    if param_bool(&def.custom_params, "regime_filter", false) {
        let trend_period = param_usize(&def.custom_params, "regime_sma_period", 200);
        if let Some(sma) = sma::current_sma(&closes, trend_period) {
            if close < sma {
                let reason = format!(
                    "Regime filter: close {close:.2} under SMA{trend_period} {sma:.2} (bearish)"
                );
                return Signal::hold(&signal.ticker, &signal.strategy_name, reason);
            }
        }
    }

    // Volatility gate.
    let max_atr_pct = param_f64(&def.custom_params, "max_atr_pct", 0.0);
    if max_atr_pct > 0.0 {
        if let Some(atr_pct) = atr::current_atr_pct(bars, 14) {
            if atr_pct > max_atr_pct {
                let reason = format!(
                    "Regime filter: ATR {atr_pct:.2}% above volatility cap {max_atr_pct:.2}%"
                );
                return Signal::hold(&signal.ticker, &signal.strategy_name, reason);
            }
        }
    }

    // Momentum confirmation.
    if param_bool(&def.custom_params, "macd_confirmation", false) {
        if let Some(histogram) = macd::current_histogram(&closes, 12, 26, 9) {
            if histogram < 0.0 {
                let reason =
                    format!("Regime filter: MACD histogram {histogram:.3} still negative");
                return Signal::hold(&signal.ticker, &signal.strategy_name, reason);
            }
        }
    }

    signal
}

/// Fundamental screen hook. Scores arrive from an upstream producer; when a
/// floor is configured and the bag carries a score below it, the entry is
/// suppressed.
pub fn apply_fundamental_filters(signal: Signal, def: &StrategyDef) -> Signal {
    if signal.action != SignalAction::Buy {
        return signal;
    }

    let floor = param_f64(&def.custom_params, "min_fundamental_score", 0.0);
    if floor <= 0.0 {
        return signal;
    }

    let score = param_f64(&def.custom_params, "fundamental_score", f64::MAX);
    if score < floor {
        let reason = format!("Fundamental filter: score {score:.2} below floor {floor:.2}");
        return Signal::hold(&signal.ticker, &signal.strategy_name, reason);
    }

    signal
}

/// Apply Kelly sizing on top of the heuristic quantity: when the strategy has
/// a resolved-trade history and a positive Kelly fraction, the Kelly quantity
/// overrides; a non-positive edge zeroes the quantity (sit in cash).
pub fn apply_kelly_sizing(
    mut signal: Signal,
    def: &StrategyDef,
    account_equity: Decimal,
    ledger: &LedgerStore,
    engine: &KellyEngine,
) -> Signal {
    if signal.action != SignalAction::Buy {
        return signal;
    }
    let Some(entry) = signal.price.filter(|p| *p > Decimal::ZERO) else {
        return signal;
    };
    let Some(stats) = engine.historical_performance(ledger, &signal.strategy_name) else {
        return signal;
    };

    let fraction = engine.calculate_fraction(stats.win_rate, stats.avg_win, stats.avg_loss);
    if fraction <= 0.0 {
        debug!(
            strategy = %signal.strategy_name,
            "Kelly fraction non-positive — zeroing quantity"
        );
        signal.quantity = Decimal::ZERO;
        return signal;
    }

    let stop = entry * (Decimal::ONE - def.stop_loss_pct / Decimal::ONE_HUNDRED);
    let kelly_qty = engine
        .calculate_position_size(account_equity, fraction, entry, stop)
        .floor();

    debug!(
        strategy = %signal.strategy_name,
        heuristic = %signal.quantity,
        kelly = %kelly_qty,
        fraction,
        "Kelly sizing applied"
    );
    signal.quantity = kelly_qty;

    signal
}

// =============================================================================
// Test helpers
// =============================================================================


// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kelly::KellyMode;
    use crate::ledger::Trade;
    use crate::types::{Side, TradeStatus};
    use rust_decimal_macros::dec;

    fn def_with(params: serde_json::Value) -> StrategyDef {
        serde_json::from_value(serde_json::json!({
            "name": "momentum_v1",
            "is_active": true,
            "custom_params": params,
        }))
        .unwrap()
    }

    fn buy(confidence: f64) -> Signal {
        Signal {
            action: SignalAction::Buy,
            ticker: "AAPL".into(),
            price: Some(dec!(100)),
            quantity: dec!(10),
            confidence,
            reason: "entry".into(),
            strategy_name: "momentum_v1".into(),
        }
    }

    #[test]
    fn registry_builds_all_supported_types() {
        for ty in SUPPORTED_STRATEGY_TYPES {
            let def = def_with(serde_json::json!({ "strategy_type": ty }));
            let strategy = build_strategy(&def);
            assert!(strategy.is_some(), "failed to build {ty}");
        }
    }

    #[test]
    fn registry_rejects_unknown_type() {
        let def = def_with(serde_json::json!({ "strategy_type": "martingale" }));
        assert!(build_strategy(&def).is_none());
        let no_type = def_with(serde_json::json!({}));
        assert!(build_strategy(&no_type).is_none());
    }

    #[test]
    fn exit_ladder_triggers_stop_loss() {
        let exit = stop_or_take_profit(
            "momentum_v1",
            "AAPL",
            dec!(100),
            dec!(96.9),
            dec!(3),
            dec!(6),
        )
        .unwrap();
        assert_eq!(exit.action, SignalAction::Sell);
        assert!(exit.reason.contains("Stop loss"));
    }

    #[test]
    fn exit_ladder_triggers_take_profit() {
        let exit = stop_or_take_profit(
            "momentum_v1",
            "AAPL",
            dec!(100),
            dec!(106.5),
            dec!(3),
            dec!(6),
        )
        .unwrap();
        assert!(exit.reason.contains("Take profit"));
    }

    #[test]
    fn exit_ladder_quiet_inside_band() {
        assert!(stop_or_take_profit(
            "momentum_v1",
            "AAPL",
            dec!(100),
            dec!(101),
            dec!(3),
            dec!(6)
        )
        .is_none());
    }

    #[test]
    fn ai_filter_gates_low_confidence() {
        let mut def = def_with(serde_json::json!({}));
        def.ai_model = "sentiment".into();
        def.ai_confidence_threshold = 0.7;

        let held = apply_ai_filters(buy(0.5), &def);
        assert_eq!(held.action, SignalAction::Hold);
        assert!(held.reason.contains("AI filter"));

        let passed = apply_ai_filters(buy(0.9), &def);
        assert_eq!(passed.action, SignalAction::Buy);
    }

    #[test]
    fn ai_filter_disabled_without_model() {
        let def = def_with(serde_json::json!({}));
        let passed = apply_ai_filters(buy(0.1), &def);
        assert_eq!(passed.action, SignalAction::Buy);
    }

    #[test]
    fn regime_filter_blocks_buys_in_downtrend() {
        let def = def_with(serde_json::json!({ "regime_filter": true, "regime_sma_period": 20 }));
        // Declining series: last close far below SMA20.
        let closes: Vec<f64> = (1..=40).rev().map(|x| x as f64 * 10.0).collect();
        let bars = testbars::bars_from_closes(&closes);

        let held = apply_regime_filters(buy(0.9), &def, &bars);
        assert_eq!(held.action, SignalAction::Hold);
        assert!(held.reason.contains("Regime filter"));
    }

    #[test]
    fn regime_filter_opt_in_only() {
        let def = def_with(serde_json::json!({}));
        let closes: Vec<f64> = (1..=40).rev().map(|x| x as f64 * 10.0).collect();
        let bars = testbars::bars_from_closes(&closes);
        let passed = apply_regime_filters(buy(0.9), &def, &bars);
        assert_eq!(passed.action, SignalAction::Buy);
    }

    #[test]
    fn volatility_gate_blocks_overheated_tape() {
        // Flat closes with a constant 2% bar range: ATR sits at ~2% of close.
        let bars = testbars::bars_from_closes(&vec![100.0; 40]);

        let tight = def_with(serde_json::json!({ "max_atr_pct": 1.0 }));
        let held = apply_regime_filters(buy(0.9), &tight, &bars);
        assert_eq!(held.action, SignalAction::Hold);
        assert!(held.reason.contains("volatility cap"));

        let loose = def_with(serde_json::json!({ "max_atr_pct": 5.0 }));
        let passed = apply_regime_filters(buy(0.9), &loose, &bars);
        assert_eq!(passed.action, SignalAction::Buy);
    }

    #[test]
    fn macd_confirmation_blocks_contracting_momentum() {
        let def = def_with(serde_json::json!({ "macd_confirmation": true }));

        let falling: Vec<f64> = (1..=120).rev().map(|x| x as f64).collect();
        let held = apply_regime_filters(buy(0.9), &def, &testbars::bars_from_closes(&falling));
        assert_eq!(held.action, SignalAction::Hold);
        assert!(held.reason.contains("MACD"));

        let rising: Vec<f64> = (1..=120).map(|x| x as f64).collect();
        let passed = apply_regime_filters(buy(0.9), &def, &testbars::bars_from_closes(&rising));
        assert_eq!(passed.action, SignalAction::Buy);
    }

    #[test]
    fn fundamental_filter_applies_configured_floor() {
        let def = def_with(serde_json::json!({
            "min_fundamental_score": 0.6,
            "fundamental_score": 0.4,
        }));
        let held = apply_fundamental_filters(buy(0.9), &def);
        assert_eq!(held.action, SignalAction::Hold);

        let no_floor = def_with(serde_json::json!({}));
        assert_eq!(
            apply_fundamental_filters(buy(0.9), &no_floor).action,
            SignalAction::Buy
        );
    }

    #[test]
    fn kelly_passthrough_without_history() {
        let ledger = LedgerStore::in_memory();
        let engine = KellyEngine::new(KellyMode::Half);
        let def = def_with(serde_json::json!({}));

        let sized = apply_kelly_sizing(buy(0.9), &def, dec!(100000), &ledger, &engine);
        assert_eq!(sized.quantity, dec!(10));
    }

    #[test]
    fn kelly_overrides_quantity_with_positive_edge() {
        let ledger = LedgerStore::in_memory();
        // 6 wins $100 / 4 losses $50 => p=0.6, R=2, full f*=0.4, half=0.2.
        for pnl in [100, 100, 100, 100, 100, 100, -50, -50, -50, -50] {
            let mut t = Trade::new("AAPL", Side::Sell, dec!(1), "momentum_v1");
            t.status = TradeStatus::Filled;
            t.realized_pnl = Some(Decimal::from(pnl));
            ledger.insert(t);
        }
        let engine = KellyEngine::new(KellyMode::Half);
        let def = def_with(serde_json::json!({})); // stop_loss_pct default 2%

        let sized = apply_kelly_sizing(buy(0.9), &def, dec!(100000), &ledger, &engine);
        // Risk $20k (f=0.2) over a $2 stop distance => 10,000 shares.
        assert_eq!(sized.quantity, dec!(10000));
    }

    #[test]
    fn kelly_zeroes_quantity_on_negative_edge() {
        let ledger = LedgerStore::in_memory();
        // 3 wins $50 / 7 losses $100: clearly negative edge.
        for pnl in [50, 50, 50, -100, -100, -100, -100, -100, -100, -100] {
            let mut t = Trade::new("AAPL", Side::Sell, dec!(1), "momentum_v1");
            t.status = TradeStatus::Filled;
            t.realized_pnl = Some(Decimal::from(pnl));
            ledger.insert(t);
        }
        let engine = KellyEngine::new(KellyMode::Half);
        let def = def_with(serde_json::json!({}));

        let sized = apply_kelly_sizing(buy(0.9), &def, dec!(100000), &ledger, &engine);
        assert_eq!(sized.quantity, Decimal::ZERO);
    }
}
