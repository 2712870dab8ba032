// =============================================================================
// Prop Firm Accounts — challenge tracking with ledger-derived equity
// =============================================================================
//
// An account never stores its own P&L. Equity, drawdown, and progress are
// computed on read by aggregating filled trades that carry this account's
// broker_account_id. The relation is by id — the account does not own the
// trade rows.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::LedgerStore;
use crate::types::AccountPhase;

fn generate_account_id() -> String {
    format!("acct_{}", Uuid::new_v4().simple())
}

fn default_account_size() -> Decimal {
    dec!(50000)
}

fn default_max_daily_drawdown_pct() -> Decimal {
    dec!(5)
}

fn default_max_total_drawdown_pct() -> Decimal {
    dec!(10)
}

fn default_profit_target_pct() -> Decimal {
    dec!(10)
}

fn default_profit_split_pct() -> Decimal {
    dec!(80)
}

fn default_min_trading_days() -> u32 {
    10
}

/// A prop-firm trading account or challenge.
///
/// Firm limits are what the external firm enforces; the risk gate and the
/// evaluation sweep read them to auto-stop before a violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropFirmAccount {
    #[serde(default = "generate_account_id")]
    pub account_id: String,
    /// Display name, e.g. "FTMO 100K Challenge #2".
    pub name: String,
    /// Firm slug, e.g. "ftmo", "topstep", "apex_trader".
    #[serde(default)]
    pub firm: String,
    #[serde(default)]
    pub account_number: String,
    /// Broker-side account id the trade rows reference.
    #[serde(default)]
    pub broker_account_id: String,

    #[serde(default)]
    pub phase: AccountPhase,
    #[serde(default = "crate::config::default_true")]
    pub is_active: bool,

    #[serde(default = "default_account_size")]
    pub account_size: Decimal,

    // Firm-specific limits
    #[serde(default = "default_max_daily_drawdown_pct")]
    pub max_daily_drawdown_pct: Decimal,
    #[serde(default = "default_max_total_drawdown_pct")]
    pub max_total_drawdown_pct: Decimal,
    #[serde(default = "default_profit_target_pct")]
    pub profit_target_pct: Decimal,
    #[serde(default = "default_profit_split_pct")]
    pub profit_split_pct: Decimal,
    #[serde(default = "default_min_trading_days")]
    pub min_trading_days: u32,
    #[serde(default)]
    pub trading_days_completed: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PropFirmAccount {
    pub fn new(name: &str, firm: &str, broker_account_id: &str, account_size: Decimal) -> Self {
        Self {
            account_id: generate_account_id(),
            name: name.to_string(),
            firm: firm.to_string(),
            account_number: broker_account_id.to_string(),
            broker_account_id: broker_account_id.to_string(),
            phase: AccountPhase::Evaluation,
            is_active: true,
            account_size,
            max_daily_drawdown_pct: default_max_daily_drawdown_pct(),
            max_total_drawdown_pct: default_max_total_drawdown_pct(),
            profit_target_pct: default_profit_target_pct(),
            profit_split_pct: default_profit_split_pct(),
            min_trading_days: default_min_trading_days(),
            trading_days_completed: 0,
            created_at: Utc::now(),
        }
    }

    // -------------------------------------------------------------------------
    // Derived metrics (computed on read from the ledger)
    // -------------------------------------------------------------------------

    /// Dollar amount needed to hit the profit target.
    pub fn profit_target_amount(&self) -> Decimal {
        self.account_size * self.profit_target_pct / Decimal::ONE_HUNDRED
    }

    /// Total realized P&L across filled trades for this account.
    pub fn total_pnl(&self, ledger: &LedgerStore) -> Decimal {
        if self.broker_account_id.is_empty() {
            return Decimal::ZERO;
        }
        ledger.realized_pnl_for_account(&self.broker_account_id)
    }

    /// Account size plus realized P&L.
    pub fn current_equity(&self, ledger: &LedgerStore) -> Decimal {
        self.account_size + self.total_pnl(ledger)
    }

    /// Current total drawdown as a percentage of the starting size.
    /// Zero while P&L is non-negative.
    pub fn total_drawdown_pct(&self, ledger: &LedgerStore) -> Decimal {
        let pnl = self.total_pnl(ledger);
        if pnl >= Decimal::ZERO || self.account_size <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        pnl.abs() / self.account_size * Decimal::ONE_HUNDRED
    }

    /// Progress toward the profit target (0-100+).
    pub fn progress_pct(&self, ledger: &LedgerStore) -> Decimal {
        let target = self.profit_target_amount();
        if target <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.total_pnl(ledger) / target * Decimal::ONE_HUNDRED
    }

    /// An account is passing iff it has not failed and total drawdown is
    /// inside the firm limit.
    pub fn is_passing(&self, ledger: &LedgerStore) -> bool {
        if self.phase == AccountPhase::Failed {
            return false;
        }
        self.total_drawdown_pct(ledger) < self.max_total_drawdown_pct
    }

    /// Check firm-rule compliance. Returns `(compliant, reason)`.
    pub fn check_compliance(&self, ledger: &LedgerStore) -> (bool, String) {
        if self.phase == AccountPhase::Failed {
            return (false, "Account has failed the challenge".to_string());
        }

        let dd = self.total_drawdown_pct(ledger);
        if dd >= self.max_total_drawdown_pct {
            return (
                false,
                format!(
                    "Total drawdown {:.2}% exceeds limit {}%",
                    dd, self.max_total_drawdown_pct
                ),
            );
        }

        (true, "Account in compliance".to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
