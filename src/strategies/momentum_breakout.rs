// =============================================================================
// Momentum Breakout — buy strength breaking above resistance on volume
// =============================================================================
//
// Entry (ALL must hold):
//   1. Close > SMA(20)                — price above trend
//   2. RSI(14) in [40, 70]            — momentum building, not overbought
//   3. Volume > 1.5x 20-bar average   — surge confirms the breakout
//   4. Close > prior bar's high       — breakout above resistance
//
// Exit (ANY):
//   stop loss, take profit, RSI > 80, close < EMA(9)
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{param_f64, param_usize, stop_or_take_profit, TradingStrategy};
use crate::config::StrategyDef;
use crate::indicators::{ema::current_ema, rsi::current_rsi, sma::current_sma};
use crate::market_data::OhlcvBar;
use crate::types::{Signal, SignalAction};

pub struct MomentumBreakout {
    name: String,
    sma_period: usize,
    rsi_period: usize,
    volume_multiplier: f64,
    rsi_entry_low: f64,
    rsi_entry_high: f64,
    rsi_exit_overbought: f64,
    ema_exit_period: usize,
    risk_per_trade_pct: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
}

impl MomentumBreakout {
    pub fn new(def: &StrategyDef) -> Self {
        let p = &def.custom_params;
        Self {
            name: def.name.clone(),
            sma_period: param_usize(p, "sma_period", 20),
            rsi_period: param_usize(p, "rsi_period", 14),
            volume_multiplier: param_f64(p, "volume_multiplier", 1.5),
            rsi_entry_low: param_f64(p, "rsi_entry_low", 40.0),
            rsi_entry_high: param_f64(p, "rsi_entry_high", 70.0),
            rsi_exit_overbought: param_f64(p, "rsi_exit_overbought", 80.0),
            ema_exit_period: param_usize(p, "ema_exit_period", 9),
            risk_per_trade_pct: super::param_decimal(p, "risk_per_trade_pct", dec!(2)),
            stop_loss_pct: def.stop_loss_pct,
            take_profit_pct: def.take_profit_pct,
        }
    }
}

impl TradingStrategy for MomentumBreakout {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, ticker: &str, bars: &[OhlcvBar]) -> Signal {
        if bars.len() < self.sma_period + 1 {
            return Signal::hold(ticker, &self.name, "Not enough data");
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let (Some(sma), Some(rsi)) = (
            current_sma(&closes, self.sma_period),
            current_rsi(&closes, self.rsi_period),
        ) else {
            return Signal::hold(ticker, &self.name, "Not enough data");
        };

        let avg_volume = volumes[volumes.len() - self.sma_period..]
            .iter()
            .sum::<f64>()
            / self.sma_period as f64;

        let close = closes[closes.len() - 1];
        let volume = volumes[volumes.len() - 1];
        let prior_high = bars[bars.len() - 2].high;

        let above_sma = close > sma;
        let rsi_in_range = (self.rsi_entry_low..=self.rsi_entry_high).contains(&rsi);
        let volume_surge = avg_volume > 0.0 && volume > avg_volume * self.volume_multiplier;
        let breakout = close > prior_high;

        if above_sma && rsi_in_range && volume_surge && breakout {
            let Some(price) = Decimal::from_f64_retain(close) else {
                return Signal::hold(ticker, &self.name, "Non-finite close");
            };
            return Signal {
                action: SignalAction::Buy,
                ticker: ticker.to_string(),
                price: Some(price.round_dp(6)),
                quantity: Decimal::ZERO,
                confidence: (rsi / 100.0).min(0.95),
                reason: format!(
                    "Breakout: close ${close:.2} > SMA{} ${sma:.2}, RSI {rsi:.1}, vol {:.1}x avg",
                    self.sma_period,
                    volume / avg_volume
                ),
                strategy_name: self.name.clone(),
            };
        }

        Signal::hold(ticker, &self.name, "No breakout signal")
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

        if let Some(rsi) = current_rsi(&closes, self.rsi_period) {
            if rsi > self.rsi_exit_overbought {
                return Signal {
                    action: SignalAction::Sell,
                    ticker: ticker.to_string(),
                    price: Some(current_price),
                    quantity: Decimal::ZERO,
                    confidence: 1.0,
                    reason: format!("RSI overbought: {rsi:.1} > {}", self.rsi_exit_overbought),
                    strategy_name: self.name.clone(),
                };
            }
        }

        if let Some(ema) = current_ema(&closes, self.ema_exit_period) {
            let close = closes[closes.len() - 1];
            if close < ema {
                return Signal {
                    action: SignalAction::Sell,
                    ticker: ticker.to_string(),
                    price: Some(current_price),
                    quantity: Decimal::ZERO,
                    confidence: 1.0,
                    reason: format!(
                        "Price ${close:.2} below EMA{} ${ema:.2}",
                        self.ema_exit_period
                    ),
                    strategy_name: self.name.clone(),
                };
            }
        }

        Signal::hold(ticker, &self.name, "Holding")
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
    use super::super::testbars::{bars_from_closes, with_last_volume};
    use super::*;

    fn strategy() -> MomentumBreakout {
        let def: StrategyDef = serde_json::from_value(serde_json::json!({
            "name": "momentum_v1",
            "is_active": true,
            "stop_loss_pct": 3.0,
            "take_profit_pct": 6.0,
            "custom_params": { "strategy_type": "momentum_breakout" }
        }))
        .unwrap();
        MomentumBreakout::new(&def)
    }

    /// A zig-zag uptrend (+1.0 / -0.6) that ends with a breakout bar: close
    /// above the prior high, RSI mid-range, on a volume spike.
    fn breakout_closes() -> Vec<f64> {
        let mut closes = vec![50.0];
        for i in 1..40 {
            let step = if i % 2 == 1 { 1.0 } else { -0.6 };
            closes.push(closes[i - 1] + step);
        }
        let last = *closes.last().unwrap();
        closes.push(last + 1.0);
        closes
    }

    #[test]
    fn emits_buy_on_breakout_with_volume() {
        let bars = with_last_volume(bars_from_closes(&breakout_closes()), 5_000.0);
        let signal = strategy().generate_signal("AAPL", &bars);
        assert_eq!(signal.action, SignalAction::Buy, "reason: {}", signal.reason);
        // Entry price equals the last close.
        let last_close = Decimal::from_f64_retain(bars.last().unwrap().close)
            .unwrap()
            .round_dp(6);
        assert_eq!(signal.price, Some(last_close));
        assert!(signal.confidence > 0.0 && signal.confidence <= 0.95);
    }

    #[test]
    fn holds_without_volume_surge() {
        let bars = bars_from_closes(&breakout_closes()); // flat volume
        let signal = strategy().generate_signal("AAPL", &bars);
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn holds_on_short_history() {
        let bars = bars_from_closes(&[100.0, 101.0, 102.0]);
        let signal = strategy().generate_signal("AAPL", &bars);
        assert_eq!(signal.action, SignalAction::Hold);
        assert!(signal.reason.contains("Not enough data"));
    }

    #[test]
    fn exit_on_stop_loss() {
        let bars = bars_from_closes(&vec![100.0; 30]);
        let signal = strategy().check_exit("AAPL", dec!(100), dec!(96.5), &bars);
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.reason.contains("Stop loss"));
    }

    #[test]
    fn exit_on_take_profit() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&closes);
        let signal = strategy().check_exit("AAPL", dec!(100), dec!(107), &bars);
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.reason.contains("Take profit"));
    }

    #[test]
    fn exit_when_price_loses_ema() {
        // Drifting down: close sits under EMA9 while the loss stays inside
        // the stop band.
        let closes: Vec<f64> = (0..30).map(|i| 100.0 - i as f64 * 0.05).collect();
        let bars = bars_from_closes(&closes);
        let signal = strategy().check_exit("AAPL", dec!(99), dec!(98.6), &bars);
        assert_eq!(signal.action, SignalAction::Sell, "reason: {}", signal.reason);
        assert!(signal.reason.contains("EMA"));
    }

    #[test]
    fn position_size_respects_risk_budget() {
        // 2% of $100k = $2,000 risk; 3% stop at $100 = $3 per share => 666.
        let qty = strategy().calculate_position_size("AAPL", dec!(100), dec!(100000));
        assert_eq!(qty, dec!(666));
    }

    #[test]
    fn position_size_floors_at_one_share() {
        let qty = strategy().calculate_position_size("AAPL", dec!(100000), dec!(100));
        assert_eq!(qty, Decimal::ONE);
    }
}
