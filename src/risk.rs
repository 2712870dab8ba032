// =============================================================================
// Risk Gate — eight ordered pre-trade checks protecting capital
// =============================================================================
//
// A stateless pipeline over (signal, account?): the first failing check
// short-circuits and its reason is reported. The order is load-bearing —
// cheapest and most restrictive first:
//
//   1. Kill switch          — operator flag halts everything.
//   2. Market hours         — stocks only trade 09:30-16:00 ET on weekdays;
//                             crypto and futures are exempt (24/7).
//   3. Daily drawdown       — today's realized losses vs the loss limit.
//   4. Daily loss limit     — dollar-absolute twin of check 3 (kept distinct
//                             so a future %-based split stays mechanical).
//   5. Daily trade count    — trades today across all statuses.
//   6. Max open positions   — live broker count, local estimate on error.
//   7. Position size        — order value vs % of live equity.
//   8. Sell above cost      — never voluntarily realize a loss.
//
// Broker read errors in checks 6/7 degrade to conservative local fallbacks;
// they never reject a trade on their own.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::accounts::PropFirmAccount;
use crate::broker::BrokerClient;
use crate::config::RiskConfig;
use crate::ledger::LedgerStore;
use crate::types::{Signal, SignalAction};

/// Equity assumed when the broker account endpoint is unreachable.
const FALLBACK_EQUITY: Decimal = dec!(100000);

/// Outcome of a gate run.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub approved: bool,
    pub reason: String,
}

impl GateDecision {
    fn rejected(reason: String) -> Self {
        Self {
            approved: false,
            reason,
        }
    }
}

pub struct RiskGate {
    ledger: Arc<LedgerStore>,
    broker: Arc<dyn BrokerClient>,
}

impl RiskGate {
    pub fn new(ledger: Arc<LedgerStore>, broker: Arc<dyn BrokerClient>) -> Self {
        Self { ledger, broker }
    }

    /// Run the full pipeline against the current clock.
    pub async fn check_trade(
        &self,
        config: Option<&RiskConfig>,
        signal: &Signal,
        account: Option<&PropFirmAccount>,
    ) -> GateDecision {
        self.check_trade_at(config, signal, account, Utc::now()).await
    }

    /// Run the full pipeline at an explicit instant (deterministic tests).
    pub async fn check_trade_at(
        &self,
        config: Option<&RiskConfig>,
        signal: &Signal,
        account: Option<&PropFirmAccount>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let Some(config) = config else {
            warn!("no active risk configuration — rejecting trade");
            return GateDecision::rejected("No active risk configuration found".to_string());
        };

        let account_label = account.map(|a| a.account_number.as_str()).unwrap_or("default");

        let result = self.run_checks(config, signal, now).await;

        match result {
            Err(reason) => {
                warn!(
                    ticker = %signal.ticker,
                    action = %signal.action,
                    account = account_label,
                    %reason,
                    "risk check FAILED"
                );
                GateDecision::rejected(reason)
            }
            Ok(()) => {
                info!(
                    ticker = %signal.ticker,
                    action = %signal.action,
                    quantity = %signal.quantity,
                    account = account_label,
                    "risk check PASSED"
                );
                GateDecision {
                    approved: true,
                    reason: "All risk checks passed".to_string(),
                }
            }
        }
    }

    async fn run_checks(
        &self,
        config: &RiskConfig,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        check_kill_switch(config)?;
        check_market_hours(&signal.ticker, now)?;
        self.check_daily_drawdown(config, now)?;
        self.check_daily_loss_limit(config, now)?;
        self.check_daily_trade_count(config, now)?;
        self.check_max_open_positions(config).await?;
        self.check_position_size(config, signal).await?;
        self.check_sell_above_cost_basis(signal)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Checks 3-5: daily aggregates from the ledger
    // -------------------------------------------------------------------------

    fn check_daily_drawdown(&self, config: &RiskConfig, now: DateTime<Utc>) -> Result<(), String> {
        let daily_pnl = self.ledger.realized_pnl_today(now);
        if daily_pnl >= Decimal::ZERO {
            return Ok(());
        }
        if daily_pnl.abs() >= config.daily_loss_limit {
            return Err(format!(
                "Daily drawdown limit reached — lost ${:.2} (limit: ${})",
                daily_pnl.abs(),
                config.daily_loss_limit
            ));
        }
        Ok(())
    }

    fn check_daily_loss_limit(&self, config: &RiskConfig, now: DateTime<Utc>) -> Result<(), String> {
        let daily_pnl = self.ledger.realized_pnl_today(now);
        if daily_pnl < Decimal::ZERO && daily_pnl.abs() >= config.daily_loss_limit {
            return Err(format!(
                "Daily loss limit hit — ${:.2} lost (limit: ${})",
                daily_pnl.abs(),
                config.daily_loss_limit
            ));
        }
        Ok(())
    }

    fn check_daily_trade_count(
        &self,
        config: &RiskConfig,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let count = self.ledger.count_today(now);
        if count >= config.max_daily_trades as usize {
            return Err(format!(
                "Daily trade limit reached — {count} trades today (limit: {})",
                config.max_daily_trades
            ));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Checks 6-7: broker reads with local fallbacks
    // -------------------------------------------------------------------------

    async fn check_max_open_positions(&self, config: &RiskConfig) -> Result<(), String> {
        let open_positions = match self.broker.get_positions().await {
            Ok(positions) => positions.len(),
            Err(e) => {
                // Approximate but safe: symbols bought and not yet sold.
                warn!(error = %e, "position fetch failed — using local estimate");
                self.ledger.open_symbol_estimate()
            }
        };

        if open_positions >= config.max_open_positions as usize {
            return Err(format!(
                "Max open positions reached — {open_positions} open (limit: {})",
                config.max_open_positions
            ));
        }
        Ok(())
    }

    async fn check_position_size(&self, config: &RiskConfig, signal: &Signal) -> Result<(), String> {
        let Some(price) = signal.price.filter(|p| *p > Decimal::ZERO) else {
            // Market order — no price to validate against.
            return Ok(());
        };
        if signal.quantity <= Decimal::ZERO {
            return Ok(());
        }

        let order_value = signal.quantity * price;

        let equity = match self.broker.get_account().await {
            Ok(account) => account.equity,
            Err(e) => {
                warn!(error = %e, "equity fetch failed — using fallback equity");
                FALLBACK_EQUITY
            }
        };

        let max_position_value = equity * config.max_position_size_pct / Decimal::ONE_HUNDRED;

        if order_value > max_position_value {
            return Err(format!(
                "Position too large — ${:.2} exceeds {}% of equity (${:.2})",
                order_value, config.max_position_size_pct, max_position_value
            ));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Check 8: sell-above-cost-basis
    // -------------------------------------------------------------------------

    fn check_sell_above_cost_basis(&self, signal: &Signal) -> Result<(), String> {
        if signal.action != SignalAction::Sell {
            return Ok(());
        }
        let Some(price) = signal.price.filter(|p| *p > Decimal::ZERO) else {
            // Market sell — nothing to compare pre-fill.
            return Ok(());
        };

        let Some(avg_cost) = self.ledger.average_cost_basis(&signal.ticker, None) else {
            return Ok(());
        };

        if price < avg_cost {
            return Err(format!(
                "Sell price ${:.2} is below average cost basis ${:.2} for {} — refusing to realize a loss",
                price, avg_cost, signal.ticker
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Checks 1-2: pure functions
// =============================================================================

fn check_kill_switch(config: &RiskConfig) -> Result<(), String> {
    if config.kill_switch_active {
        return Err("Kill switch is ACTIVE — all trading halted".to_string());
    }
    Ok(())
}

/// Crypto tickers trade 24/7: pair notation ("BTC/USD") or a bare major coin.
pub fn is_crypto_ticker(ticker: &str) -> bool {
    ticker.contains('/') && !ticker.starts_with('/')
        || matches!(ticker, "BTC" | "ETH" | "SOL" | "DOGE" | "AVAX")
}

/// Futures tickers get extended hours: "/ES"-style roots and micro contracts.
pub fn is_futures_ticker(ticker: &str) -> bool {
    ticker.starts_with('/') || ticker.starts_with("MES") || ticker.starts_with("MNQ")
}

/// US/Eastern UTC offset for the given instant.
///
/// DST runs from the second Sunday of March to the first Sunday of November;
/// the boundary is evaluated against the standard-time calendar date, which
/// is exact for everything a market-hours gate cares about.
fn us_eastern_offset(now: DateTime<Utc>) -> FixedOffset {
    let est = FixedOffset::west_opt(5 * 3600).expect("static offset");
    let local = now.with_timezone(&est).date_naive();
    let (year, month, day) = (local.year(), local.month(), local.day());

    let nth_sunday = |month: u32, from_day: u32| -> u32 {
        (from_day..from_day + 7)
            .find(|d| {
                chrono::NaiveDate::from_ymd_opt(year, month, *d)
                    .map(|date| date.weekday() == Weekday::Sun)
                    .unwrap_or(false)
            })
            .unwrap_or(from_day)
    };

    let dst = match month {
        4..=10 => true,
        3 => day >= nth_sunday(3, 8),
        11 => day < nth_sunday(11, 1),
        _ => false,
    };

    if dst {
        FixedOffset::west_opt(4 * 3600).expect("static offset")
    } else {
        est
    }
}

/// The given instant expressed in US/Eastern local time.
pub fn eastern_time(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    now.with_timezone(&us_eastern_offset(now))
}

/// Stocks only trade Monday-Friday, 09:30-16:00 US/Eastern. Crypto and
/// futures bypass the calendar entirely.
pub fn check_market_hours(ticker: &str, now: DateTime<Utc>) -> Result<(), String> {
    if is_crypto_ticker(ticker) || is_futures_ticker(ticker) {
        return Ok(());
    }

    let now_et = now.with_timezone(&us_eastern_offset(now));

    if matches!(now_et.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(format!(
            "Market closed — weekend ({})",
            now_et.format("%A")
        ));
    }

    let market_open = NaiveTime::from_hms_opt(9, 30, 0).expect("static time");
    let market_close = NaiveTime::from_hms_opt(16, 0, 0).expect("static time");
    let current = now_et.time();

    if current < market_open || current > market_close {
        return Err(format!(
            "Market closed — current time {} ET (open 09:30-16:00)",
            now_et.format("%H:%M")
        ));
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
