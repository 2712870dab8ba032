// =============================================================================
// Sector Rotation — ride medium-term momentum inside a long-term uptrend
// =============================================================================
//
// Entry (ALL must hold):
//   1. Close > SMA(200)       — long-term trend is up
//   2. ROC(90) > threshold    — strong medium-term momentum
//
// Exit (ANY):
//   stop loss, take profit, close < SMA(200), ROC(90) < 0
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{param_f64, param_usize, stop_or_take_profit, TradingStrategy};
use crate::config::StrategyDef;
use crate::indicators::{roc::current_roc, sma::current_sma};
use crate::market_data::OhlcvBar;
use crate::types::{Signal, SignalAction};

pub struct SectorRotation {
    name: String,
    roc_period: usize,
    roc_entry_threshold: f64,
    sma_trend_period: usize,
    target_sectors: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
}

impl SectorRotation {
    pub fn new(def: &StrategyDef) -> Self {
        let p = &def.custom_params;
        Self {
            name: def.name.clone(),
            roc_period: param_usize(p, "roc_period", 90),
            roc_entry_threshold: param_f64(p, "roc_entry_threshold", 5.0),
            sma_trend_period: param_usize(p, "sma_trend_period", 200),
            target_sectors: super::param_decimal(p, "target_sectors", dec!(5)),
            stop_loss_pct: def.stop_loss_pct,
            take_profit_pct: def.take_profit_pct,
        }
    }
}

impl TradingStrategy for SectorRotation {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, ticker: &str, bars: &[OhlcvBar]) -> Signal {
        if bars.len() < self.sma_trend_period.max(self.roc_period) + 1 {
            return Signal::hold(ticker, &self.name, "Not enough data");
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let (Some(sma_trend), Some(roc)) = (
            current_sma(&closes, self.sma_trend_period),
            current_roc(&closes, self.roc_period),
        ) else {
            return Signal::hold(ticker, &self.name, "Not enough data");
        };

        let close = closes[closes.len() - 1];

        if close > sma_trend && roc > self.roc_entry_threshold {
            let Some(price) = Decimal::from_f64_retain(close) else {
                return Signal::hold(ticker, &self.name, "Non-finite close");
            };
            return Signal {
                action: SignalAction::Buy,
                ticker: ticker.to_string(),
                price: Some(price.round_dp(6)),
                quantity: Decimal::ZERO,
                confidence: (roc / 20.0).min(0.95),
                reason: format!(
                    "Rotation: ROC({}) {roc:.2}% > {}%, close ${close:.2} > SMA{} ${sma_trend:.2}",
                    self.roc_period, self.roc_entry_threshold, self.sma_trend_period
                ),
                strategy_name: self.name.clone(),
            };
        }

        Signal::hold(ticker, &self.name, "No momentum rotation signal")
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

        if let Some(sma) = current_sma(&closes, self.sma_trend_period) {
            if sma > 0.0 && close < sma {
                return Signal {
                    action: SignalAction::Sell,
                    ticker: ticker.to_string(),
                    price: Some(current_price),
                    quantity: Decimal::ZERO,
                    confidence: 1.0,
                    reason: format!(
                        "Trend broken: close ${close:.2} < SMA{} ${sma:.2}",
                        self.sma_trend_period
                    ),
                    strategy_name: self.name.clone(),
                };
            }
        }

        if let Some(roc) = current_roc(&closes, self.roc_period) {
            if roc < 0.0 {
                return Signal {
                    action: SignalAction::Sell,
                    ticker: ticker.to_string(),
                    price: Some(current_price),
                    quantity: Decimal::ZERO,
                    confidence: 1.0,
                    reason: format!(
                        "Momentum lost: ROC({}) is negative ({roc:.2}%)",
                        self.roc_period
                    ),
                    strategy_name: self.name.clone(),
                };
            }
        }

        Signal::hold(ticker, &self.name, "Riding momentum")
    }

    /// Equal-weight the equity slice across the target sector count.
    fn calculate_position_size(
        &self,
        _ticker: &str,
        price: Decimal,
        account_equity: Decimal,
    ) -> Decimal {
        if price <= Decimal::ZERO || self.target_sectors <= Decimal::ZERO {
            return Decimal::ONE;
        }

        let target_allocation = account_equity / self.target_sectors;
        (target_allocation / price).floor().max(Decimal::ONE)
    }
}

// =============================================================================
// Tests
// =============================================================================
