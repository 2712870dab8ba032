// =============================================================================
// Evaluation Engine — prop-firm challenge lifecycle
// =============================================================================
//
// A periodic sweep walks every active account in an in-flight phase
// (evaluation, verification, funded) and:
//
//   - halts accounts that breach their max total drawdown (phase -> failed,
//     critical alert);
//   - halts evaluation/verification accounts that hit the profit target
//     (is_active -> false, phase preserved pending manual graduation,
//     "passed" alert);
//   - warns when an account is >= 80% of the way to its max drawdown.
//
// Halting only flips is_active so the strategy runner and allocator skip the
// account; promotion to verification or funded stays a manual decision.
// =============================================================================

use std::sync::Arc;

use chrono::{NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::accounts::PropFirmAccount;
use crate::app_state::AppState;
use crate::ledger::LedgerStore;
use crate::notifier::Notifier;
use crate::risk::eastern_time;
use crate::types::AccountPhase;

/// Warn once an account consumes this share of its drawdown allowance.
const DRAWDOWN_WARNING_RATIO: Decimal = dec!(80);

/// The outcome the sweep decided for one account.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountVerdict {
    /// Nothing to do.
    Continue,
    /// Firm rules breached — the challenge is over.
    Failed(String),
    /// Profit target hit — halt and await manual graduation.
    Passed(String),
}

/// Pure transition decision for a single account.
pub fn evaluate_account(account: &PropFirmAccount, ledger: &LedgerStore) -> AccountVerdict {
    let (compliant, reason) = account.check_compliance(ledger);
    if !compliant {
        return AccountVerdict::Failed(format!("FAILED: {reason}"));
    }

    if matches!(
        account.phase,
        AccountPhase::Evaluation | AccountPhase::Verification
    ) {
        let target = account.profit_target_amount();
        let pnl = account.total_pnl(ledger);
        if target > Decimal::ZERO && pnl >= target {
            let pct_gained = if account.account_size > Decimal::ZERO {
                pnl / account.account_size * Decimal::ONE_HUNDRED
            } else {
                Decimal::ZERO
            };
            return AccountVerdict::Passed(format!(
                "PASSED {}: hit profit target ({pct_gained:.2}% / ${pnl:.2})",
                account.phase
            ));
        }
    }

    AccountVerdict::Continue
}

pub struct EvaluationManager {
    notifier: Arc<Notifier>,
}

impl EvaluationManager {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }

    /// Walk all active in-flight accounts, apply verdicts, and persist any
    /// changes. Returns how many accounts were halted.
    pub async fn process_all_accounts(&self, state: &AppState) -> usize {
        // Snapshot the accounts; mutations are applied back under the lock.
        let accounts: Vec<PropFirmAccount> = state.config.read().accounts.clone();

        let mut halted = 0;
        for account in accounts {
            if !account.is_active
                || !matches!(
                    account.phase,
                    AccountPhase::Evaluation | AccountPhase::Verification | AccountPhase::Funded
                )
            {
                continue;
            }

            match evaluate_account(&account, &state.ledger) {
                AccountVerdict::Continue => {}
                AccountVerdict::Failed(reason) => {
                    self.halt_account(state, &account, &reason, Some(AccountPhase::Failed))
                        .await;
                    halted += 1;
                }
                AccountVerdict::Passed(reason) => {
                    self.halt_account(state, &account, &reason, None).await;
                    halted += 1;
                }
            }
        }

        if halted > 0 {
            state.save_config();
        }
        halted
    }

    /// Deactivate the account (and optionally move its phase), then alert.
    async fn halt_account(
        &self,
        state: &AppState,
        account: &PropFirmAccount,
        reason: &str,
        new_phase: Option<AccountPhase>,
    ) {
        info!(account = %account.name, %reason, "halting account");

        {
            let mut config = state.config.write();
            if let Some(entry) = config
                .accounts
                .iter_mut()
                .find(|a| a.account_id == account.account_id)
            {
                entry.is_active = false;
                if let Some(phase) = new_phase {
                    entry.phase = phase;
                }
            }
        }
        state.increment_version();

        let passed = reason.starts_with("PASSED");
        let level = if passed { "INFO" } else { "CRITICAL" };
        let equity = account.current_equity(&state.ledger);
        let pnl = account.total_pnl(&state.ledger);
        self.notifier
            .send_system_alert(
                &format!("ACCOUNT HALTED: {}", account.name),
                &format!("{reason} | Equity ${equity:.2} | Total P&L ${pnl:.2}"),
                level,
            )
            .await;
    }

    /// Intraday drawdown proximity warnings, then the pass/fail automation.
    pub async fn sweep_drawdown_warnings(&self, state: &AppState) {
        let accounts: Vec<PropFirmAccount> = state.config.read().accounts.clone();

        for account in accounts {
            if !account.is_active
                || !matches!(
                    account.phase,
                    AccountPhase::Evaluation | AccountPhase::Verification | AccountPhase::Funded
                )
            {
                continue;
            }

            let max_dd = account.max_total_drawdown_pct;
            if max_dd <= Decimal::ZERO {
                continue;
            }
            let pct_to_max =
                account.total_drawdown_pct(&state.ledger) / max_dd * Decimal::ONE_HUNDRED;
            if pct_to_max >= DRAWDOWN_WARNING_RATIO {
                warn!(
                    account = %account.name,
                    pct_to_max = %pct_to_max.round_dp(1),
                    "account approaching max drawdown"
                );
                self.notifier
                    .send_drawdown_warning(&account, &state.ledger, pct_to_max)
                    .await;
            }
        }

        self.process_all_accounts(state).await;
    }
}

// =============================================================================
// Periodic tasks
// =============================================================================

/// Intraday sweep: drawdown warnings + challenge pass/fail automation.
pub async fn run_drawdown_sweep_loop(state: Arc<AppState>) {
    info!("drawdown sweep starting");
    let manager = EvaluationManager::new(state.notifier.clone());
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
    loop {
        interval.tick().await;
        manager.sweep_drawdown_warnings(&state).await;
    }
}

/// End-of-day report, sent once per day shortly after the 16:00 ET close.
pub async fn run_eod_report_loop(state: Arc<AppState>) {
    info!("end-of-day reporter starting");
    let mut last_sent: Option<NaiveDate> = None;
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
    loop {
        interval.tick().await;

        let now_et = eastern_time(Utc::now());
        let today = now_et.date_naive();

        let due = now_et.hour() == 16 && now_et.minute() >= 15;
        if !due || last_sent == Some(today) {
            continue;
        }

        let accounts: Vec<PropFirmAccount> = state
            .config
            .read()
            .accounts
            .iter()
            .filter(|a| a.is_active)
            .cloned()
            .collect();

        state.notifier.send_eod_report(&accounts, &state.ledger).await;
        info!(accounts = accounts.len(), "end-of-day report sent");
        last_sent = Some(today);
    }
}

// =============================================================================
// Tests
// =============================================================================
