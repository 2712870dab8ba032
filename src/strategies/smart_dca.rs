// =============================================================================
// Smart DCA — accumulate long-term positions by buying the dip
// =============================================================================
//
// Entry (ANY may hold):
//   1. Close < SMA(50)  — price dipped below the short-term trend
//   2. RSI(14) < 40     — short-term momentum oversold
//
// The optional `vwap_filter` additionally requires the close to sit below
// the anchored VWAP of the bar window, so accumulation only happens below
// where the volume actually traded.
//
// Exits: none. Accumulation only; unwinding is a manual decision.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{param_bool, param_f64, param_usize, TradingStrategy};
use crate::config::StrategyDef;
use crate::indicators::{rsi::current_rsi, sma::current_sma, vwap::current_vwap};
use crate::market_data::OhlcvBar;
use crate::types::{Signal, SignalAction};

pub struct SmartDca {
    name: String,
    sma_period: usize,
    rsi_period: usize,
    rsi_threshold: f64,
    vwap_filter: bool,
    dca_amount: Decimal,
}

impl SmartDca {
    pub fn new(def: &StrategyDef) -> Self {
        let p = &def.custom_params;
        Self {
            name: def.name.clone(),
            sma_period: param_usize(p, "sma_period", 50),
            rsi_period: param_usize(p, "rsi_period", 14),
            rsi_threshold: param_f64(p, "rsi_threshold", 40.0),
            vwap_filter: param_bool(p, "vwap_filter", false),
            dca_amount: super::param_decimal(p, "dca_amount", dec!(500)),
        }
    }
}

impl TradingStrategy for SmartDca {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(&self, ticker: &str, bars: &[OhlcvBar]) -> Signal {
        if bars.len() < self.sma_period.max(self.rsi_period) + 1 {
            return Signal::hold(ticker, &self.name, "Not enough data");
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let (Some(sma), Some(rsi)) = (
            current_sma(&closes, self.sma_period),
            current_rsi(&closes, self.rsi_period),
        ) else {
            return Signal::hold(ticker, &self.name, "Not enough data");
        };

        let close = closes[closes.len() - 1];
        let below_sma = close < sma;
        let oversold = rsi < self.rsi_threshold;

        if below_sma || oversold {
            // Anchored VWAP gate: the dip only counts when it trades below
            // where the window's volume changed hands.
            if self.vwap_filter {
                if let Some(vwap) = current_vwap(bars) {
                    if close >= vwap {
                        return Signal::hold(
                            ticker,
                            &self.name,
                            format!("Dip still above VWAP ${vwap:.2}"),
                        );
                    }
                }
            }

            let mut conditions = Vec::new();
            if below_sma {
                conditions.push(format!("close ${close:.2} < SMA{} ${sma:.2}", self.sma_period));
            }
            if oversold {
                conditions.push(format!(
                    "RSI({}) {rsi:.1} < {}",
                    self.rsi_period, self.rsi_threshold
                ));
            }

            let Some(price) = Decimal::from_f64_retain(close) else {
                return Signal::hold(ticker, &self.name, "Non-finite close");
            };
            return Signal {
                action: SignalAction::Buy,
                ticker: ticker.to_string(),
                price: Some(price.round_dp(6)),
                quantity: Decimal::ZERO,
                confidence: ((100.0 - rsi) / 100.0).min(0.95),
                reason: format!("DCA dip: {}", conditions.join(" AND ")),
                strategy_name: self.name.clone(),
            };
        }

        Signal::hold(ticker, &self.name, "Price is elevated, waiting for dip")
    }

    /// Accumulation never exits on its own.
    fn check_exit(
        &self,
        ticker: &str,
        _entry_price: Decimal,
        _current_price: Decimal,
        _bars: &[OhlcvBar],
    ) -> Signal {
        Signal::hold(ticker, &self.name, "Accumulation only")
    }

    /// Spend a fixed dollar amount per dip, capped by available equity.
    fn calculate_position_size(
        &self,
        _ticker: &str,
        price: Decimal,
        account_equity: Decimal,
    ) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ONE;
        }

        let mut buy_amount = self.dca_amount;
        if buy_amount > account_equity {
            buy_amount = account_equity * dec!(0.95);
        }

        if buy_amount < price {
            return Decimal::ZERO;
        }

        (buy_amount / price).floor().max(Decimal::ONE)
    }
}

// =============================================================================
// Tests
// =============================================================================
