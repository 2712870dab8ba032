// =============================================================================
// Mean Reversion — buy oversold quality bouncing off Bollinger support
// =============================================================================
//
// Entry (ALL must hold):
//   1. Close < lower Bollinger band (20, 2σ) — price at an extreme
//   2. Z-Score(20) < -1.5                    — statistically oversold
//   3. RSI(14) < 35                          — momentum confirms
//   4. Close > SMA(200)                      — only in long-term uptrends
//
// Exit (ANY):
//   stop loss (wider than momentum), take profit, close back above SMA(20),
//   RSI > 60.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{param_f64, param_usize, stop_or_take_profit, TradingStrategy};
use crate::config::StrategyDef;
use crate::indicators::{
    bollinger::calculate_bollinger, rsi::current_rsi, sma::current_sma, zscore::current_zscore,
};
use crate::market_data::OhlcvBar;
use crate::types::{Signal, SignalAction};

pub struct MeanReversion {
    name: String,
    bb_period: usize,
    bb_std: f64,
    zscore_threshold: f64,
    rsi_entry: f64,
    rsi_exit: f64,
    sma_trend_period: usize,
    risk_per_trade_pct: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
}

impl MeanReversion {
    pub fn new(def: &StrategyDef) -> Self {
        let p = &def.custom_params;
        Self {
            name: def.name.clone(),
            bb_period: param_usize(p, "bb_period", 20),
            bb_std: param_f64(p, "bb_std_devs", 2.0),
            zscore_threshold: param_f64(p, "zscore_threshold", -1.5),
            rsi_entry: param_f64(p, "rsi_entry_threshold", 35.0),
            rsi_exit: param_f64(p, "rsi_exit_threshold", 60.0),
            sma_trend_period: param_usize(p, "sma_trend_period", 200),
            risk_per_trade_pct: super::param_decimal(p, "risk_per_trade_pct", dec!(1.5)),
            stop_loss_pct: def.stop_loss_pct,
            take_profit_pct: def.take_profit_pct,
        }
    }
}

impl TradingStrategy for MeanReversion {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, ticker: &str, bars: &[OhlcvBar]) -> Signal {
        if bars.len() < self.sma_trend_period {
            return Signal::hold(ticker, &self.name, "Not enough data for trend SMA");
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let (Some(bb), Some(z), Some(rsi), Some(sma_trend)) = (
            calculate_bollinger(&closes, self.bb_period, self.bb_std),
            current_zscore(&closes, self.bb_period),
            current_rsi(&closes, 14),
            current_sma(&closes, self.sma_trend_period),
        ) else {
            return Signal::hold(ticker, &self.name, "Not enough data");
        };

        let close = closes[closes.len() - 1];

        let below_lower_band = close < bb.lower;
        let statistically_oversold = z < self.zscore_threshold;
        let rsi_oversold = rsi < self.rsi_entry;
        let in_uptrend = close > sma_trend;

        if below_lower_band && statistically_oversold && rsi_oversold && in_uptrend {
            let Some(price) = Decimal::from_f64_retain(close) else {
                return Signal::hold(ticker, &self.name, "Non-finite close");
            };
            return Signal {
                action: SignalAction::Buy,
                ticker: ticker.to_string(),
                price: Some(price.round_dp(6)),
                quantity: Decimal::ZERO,
                confidence: (z.abs() / 3.0).min(0.95),
                reason: format!(
                    "Mean reversion: Z={z:.2}, RSI={rsi:.1}, close ${close:.2} < BB lower ${:.2}",
                    bb.lower
                ),
                strategy_name: self.name.clone(),
            };
        }

        Signal::hold(ticker, &self.name, "No mean reversion signal")
    }

    fn check_exit(
        &self,
        ticker: &str,
        entry_price: Decimal,
        current_price: Decimal,
        bars: &[OhlcvBar],
    ) -> Signal {
        if bars.is_empty() {
            return Signal::hold(ticker, &self.name, "No bars");
        }

        if let Some(exit) = stop_or_take_profit(
            &self.name,
            ticker,
            entry_price,
            current_price,
            self.stop_loss_pct,
            self.take_profit_pct,
        ) {
            return exit;
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let close = closes[closes.len() - 1];

        if let Some(sma) = current_sma(&closes, self.bb_period) {
            if sma > 0.0 && close > sma {
                return Signal {
                    action: SignalAction::Sell,
                    ticker: ticker.to_string(),
                    price: Some(current_price),
                    quantity: Decimal::ZERO,
                    confidence: 1.0,
                    reason: format!(
                        "Mean reverted: close ${close:.2} > SMA{} ${sma:.2}",
                        self.bb_period
                    ),
                    strategy_name: self.name.clone(),
                };
            }
        }

        if let Some(rsi) = current_rsi(&closes, 14) {
            if rsi > self.rsi_exit {
                return Signal {
                    action: SignalAction::Sell,
                    ticker: ticker.to_string(),
                    price: Some(current_price),
                    quantity: Decimal::ZERO,
                    confidence: 1.0,
                    reason: format!("RSI recovered: {rsi:.1} > {}", self.rsi_exit),
                    strategy_name: self.name.clone(),
                };
            }
        }

        Signal::hold(ticker, &self.name, "Awaiting reversion")
    }

    fn calculate_position_size(
        &self,
        _ticker: &str,
        price: Decimal,
        account_equity: Decimal,
    ) -> Decimal {
        let risk_amount = account_equity * self.risk_per_trade_pct / Decimal::ONE_HUNDRED;
        let stop_distance = price * self.stop_loss_pct / Decimal::ONE_HUNDRED;

        if stop_distance <= Decimal::ZERO {
            return Decimal::ONE;
        }

        (risk_amount / stop_distance).floor().max(Decimal::ONE)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::super::testbars::bars_from_closes;
    use super::*;

    fn strategy() -> MeanReversion {
        let def: StrategyDef = serde_json::from_value(serde_json::json!({
            "name": "reversion_v1",
            "is_active": true,
            "stop_loss_pct": 5.0,
            "take_profit_pct": 4.0,
            "custom_params": { "strategy_type": "mean_reversion" }
        }))
        .unwrap();
        MeanReversion::new(&def)
    }

    /// Long uptrend followed by a sharp five-bar selloff: oversold on every
    /// short-term measure while still above the 200-bar trend line.
    fn oversold_dip() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..200).map(|i| 50.0 + i as f64 * 0.5).collect();
        for _ in 0..5 {
            let last = *closes.last().unwrap();
            closes.push(last - 3.0);
        }
        closes
    }

    #[test]
    fn emits_buy_on_oversold_dip_in_uptrend() {
        let bars = bars_from_closes(&oversold_dip());
        let signal = strategy().generate_signal("KO", &bars);
        assert_eq!(signal.action, SignalAction::Buy, "reason: {}", signal.reason);
        assert!(signal.reason.contains("Mean reversion"));
    }

    #[test]
    fn holds_when_below_long_term_trend() {
        // Same dip shape but in a long decline: close under SMA200.
        let mut closes: Vec<f64> = (0..200).map(|i| 150.0 - i as f64 * 0.5).collect();
        for _ in 0..5 {
            let last = *closes.last().unwrap();
            closes.push(last - 3.0);
        }
        let bars = bars_from_closes(&closes);
        let signal = strategy().generate_signal("KO", &bars);
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn holds_without_statistical_extreme() {
        // Smooth uptrend, no dip.
        let closes: Vec<f64> = (0..210).map(|i| 50.0 + i as f64 * 0.5).collect();
        let bars = bars_from_closes(&closes);
        let signal = strategy().generate_signal("KO", &bars);
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn holds_on_short_history() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let signal = strategy().generate_signal("KO", &bars_from_closes(&closes));
        assert!(signal.reason.contains("Not enough data"));
    }

    #[test]
    fn exit_when_mean_reached() {
        // Close pushed back above the 20-bar mean.
        let mut closes = vec![100.0; 25];
        closes.push(103.0);
        let bars = bars_from_closes(&closes);
        let signal = strategy().check_exit("KO", dec!(100), dec!(103), &bars);
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.reason.contains("Mean reverted"));
    }

    #[test]
    fn exit_on_wider_stop() {
        let bars = bars_from_closes(&vec![100.0; 30]);
        let signal = strategy().check_exit("KO", dec!(100), dec!(94.9), &bars);
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.reason.contains("Stop loss"));
    }

    #[test]
    fn position_size_uses_tighter_risk_budget() {
        // 1.5% of $100k = $1,500 risk; 5% stop at $100 = $5 => 300 shares.
        let qty = strategy().calculate_position_size("KO", dec!(100), dec!(100000));
        assert_eq!(qty, dec!(300));
    }
}
