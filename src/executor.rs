// =============================================================================
// Executor — block trade execution pipeline
// =============================================================================
//
// One validated signal in, a list of ledger trades out:
//
//   1. Resolve candidate prop-firm accounts from the strategy definition.
//   2. Run the risk gate per account; rejected accounts become qty-0 stubs.
//   3. Aggregate the survivors into ONE master block order.
//   4. Submit the block through the routing layer (slippage-capped limits).
//   5. Prorate the master fill into per-account ledger rows by equity weight.
//   6. Track cost basis on buys, realized P&L on sells.
//   7. Alert on fills.
//
// The block is all-or-nothing at the broker: a submit failure materializes
// `error` rows for every approved account and is never partially retried.
// =============================================================================

use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use crate::accounts::PropFirmAccount;
use crate::broker::{BrokerClient, OrderRequest};
use crate::config::DeskConfig;
use crate::ledger::{LedgerStore, Trade};
use crate::notifier::Notifier;
use crate::risk::RiskGate;
use crate::routing::BlockRouter;
use crate::types::{OrderType, Side, Signal, SignalAction, TradeStatus};

/// Slippage cap applied to priced buys (limit at +1%).
const BUY_SLIPPAGE_CAP: Decimal = dec!(1.01);
/// Slippage cap applied to priced, non-panic sells (limit at -1%).
const SELL_SLIPPAGE_CAP: Decimal = dec!(0.99);

pub struct Executor {
    ledger: Arc<LedgerStore>,
    broker: Arc<dyn BrokerClient>,
    notifier: Arc<Notifier>,
    gate: RiskGate,
}

impl Executor {
    pub fn new(
        ledger: Arc<LedgerStore>,
        broker: Arc<dyn BrokerClient>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let gate = RiskGate::new(ledger.clone(), broker.clone());
        Self {
            ledger,
            broker,
            notifier,
            gate,
        }
    }

    /// Execute a validated signal as a block order.
    ///
    /// `config` is the caller's fresh snapshot of the desk configuration —
    /// read per signal, never cached across ticks.
    pub async fn execute_signal(
        &self,
        config: &DeskConfig,
        signal: &Signal,
        webhook_id: Option<&str>,
    ) -> Vec<Trade> {
        let Some(side) = signal.action.as_side() else {
            warn!(ticker = %signal.ticker, "non-actionable signal reached the executor — ignored");
            return Vec::new();
        };

        let risk_config = config.active_risk_config();
        let candidates = self.resolve_accounts(config, &signal.strategy_name);

        // ── 1-2. Per-account risk gate ───────────────────────────────────
        let mut approved: Vec<Option<PropFirmAccount>> = Vec::new();
        let mut trades: Vec<Trade> = Vec::new();

        for account in candidates {
            let decision = self
                .gate
                .check_trade(risk_config, signal, account.as_ref())
                .await;

            if decision.approved {
                approved.push(account);
            } else {
                let mut stub = Trade::new(&signal.ticker, side, Decimal::ZERO, &signal.strategy_name);
                stub.status = TradeStatus::Rejected;
                stub.risk_approved = false;
                stub.risk_reason = decision.reason.clone();
                stub.error_message = decision.reason.clone();
                stub.broker_account_id = account
                    .as_ref()
                    .map(|a| a.broker_account_id.clone())
                    .unwrap_or_default();
                if let Some(wh) = webhook_id {
                    stub.webhook_id = wh.to_string();
                }
                warn!(
                    ticker = %signal.ticker,
                    account = %stub.broker_account_id,
                    reason = %decision.reason,
                    "trade rejected"
                );
                trades.push(self.ledger.insert(stub));
            }
        }

        if approved.is_empty() {
            warn!(
                strategy = %signal.strategy_name,
                ticker = %signal.ticker,
                "block trade aborted: all accounts failed the risk check"
            );
            return trades;
        }

        // ── 3-4. Aggregate and submit the master order ───────────────────
        let total_quantity = signal.quantity;
        let (order_type, limit_price) = choose_order_type(signal);

        let mut request = OrderRequest::new(&signal.ticker, total_quantity, side);
        request.order_type = order_type;
        request.limit_price = limit_price;

        let router = BlockRouter::new(self.broker.clone(), config.ib_routing_tag.clone());

        let (status, master_order_id, master_fill_price, error_message) =
            match router.submit_block_order(&signal.strategy_name, request).await {
                Ok(ack) => {
                    let status = if ack.filled_avg_price.is_some() {
                        TradeStatus::Filled
                    } else {
                        TradeStatus::Submitted
                    };
                    (status, ack.order_id, ack.filled_avg_price, String::new())
                }
                Err(e) => {
                    error!(ticker = %signal.ticker, error = %e, "master block order failed");
                    self.notifier
                        .send_system_alert(
                            &format!("Block order failed: {}", signal.ticker),
                            &e.to_string(),
                            "ERROR",
                        )
                        .await;
                    (TradeStatus::Error, String::new(), None, e.to_string())
                }
            };

        // ── 5-6. Distribute into per-account ledger rows ─────────────────
        let weights = equity_weights(&approved, &self.ledger);

        for (account, weight) in approved.iter().zip(weights) {
            let acct_qty = (total_quantity * weight)
                .round_dp_with_strategy(6, RoundingStrategy::ToZero);

            let mut trade = Trade::new(&signal.ticker, side, acct_qty, &signal.strategy_name);
            trade.order_type = order_type;
            trade.status = status;
            trade.requested_price = signal.price;
            trade.broker_order_id = master_order_id.clone();
            trade.broker_account_id = account
                .as_ref()
                .map(|a| a.broker_account_id.clone())
                .unwrap_or_default();
            trade.risk_approved = true;
            trade.risk_reason = "Passed block check".to_string();
            trade.error_message = error_message.clone();
            if let Some(wh) = webhook_id {
                trade.webhook_id = wh.to_string();
            }

            if status == TradeStatus::Filled {
                if let Some(fill) = master_fill_price {
                    trade.fill_price = Some(fill);
                    let (cost_basis, realized_pnl) =
                        cost_basis_fields(&self.ledger, &trade, fill, acct_qty);
                    trade.cost_basis = cost_basis;
                    trade.realized_pnl = realized_pnl;
                }
            }

            let stored = self.ledger.insert(trade);

            info!(
                trade_id = %stored.trade_id,
                account = %stored.broker_account_id,
                qty = %stored.quantity,
                status = %stored.status,
                order_id = %stored.broker_order_id,
                "block slice recorded"
            );

            if stored.status == TradeStatus::Filled {
                self.notifier.send_trade_alert(&stored).await;
            }

            trades.push(stored);
        }

        trades
    }

    /// Candidate accounts for a strategy: active prop-firm accounts named in
    /// the definition, or the single default (master) broker account.
    fn resolve_accounts(
        &self,
        config: &DeskConfig,
        strategy_name: &str,
    ) -> Vec<Option<PropFirmAccount>> {
        let accounts: Vec<PropFirmAccount> = config
            .strategy_by_name(strategy_name)
            .filter(|def| def.is_active && !def.account_numbers.is_empty())
            .map(|def| {
                config
                    .accounts
                    .iter()
                    .filter(|a| a.is_active && def.account_numbers.contains(&a.account_number))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if accounts.is_empty() {
            vec![None]
        } else {
            accounts.into_iter().map(Some).collect()
        }
    }
}

/// Smart slippage control for the master order:
/// - priced buys cap slippage with a limit at +1%;
/// - panic/stop sells go straight to market;
/// - other priced sells limit at -1%;
/// - everything else is a market order.
fn choose_order_type(signal: &Signal) -> (OrderType, Option<Decimal>) {
    let Some(price) = signal.price.filter(|p| *p > Decimal::ZERO) else {
        return (OrderType::Market, None);
    };

    match signal.action {
        SignalAction::Buy => (OrderType::Limit, Some(price * BUY_SLIPPAGE_CAP)),
        SignalAction::Sell => {
            let reason = signal.reason.to_lowercase();
            if reason.contains("panic") || reason.contains("stop") {
                (OrderType::Market, None)
            } else {
                (OrderType::Limit, Some(price * SELL_SLIPPAGE_CAP))
            }
        }
        SignalAction::Hold => (OrderType::Market, None),
    }
}

/// Per-account proration weights from current equity. Falls back to a uniform
/// split when the combined equity is zero (or the default account is in play).
fn equity_weights(accounts: &[Option<PropFirmAccount>], ledger: &LedgerStore) -> Vec<Decimal> {
    let n = accounts.len();
    if n == 0 {
        return Vec::new();
    }

    let equities: Vec<Decimal> = accounts
        .iter()
        .map(|a| match a {
            Some(acct) => acct.current_equity(ledger),
            None => Decimal::ZERO,
        })
        .collect();

    let total: Decimal = equities.iter().copied().sum();
    if total <= Decimal::ZERO {
        let uniform = Decimal::ONE / Decimal::from(n as u64);
        return vec![uniform; n];
    }

    equities.into_iter().map(|e| e / total).collect()
}

/// Cost-basis bookkeeping for one fill.
///
/// Buys record the fill price as their cost basis. Sells look up the weighted
/// average cost of prior filled buys — scoped to the trade's broker account
/// when set, global otherwise — and realize `(fill - avg_cost) * qty`. A sell
/// with no priced buys behind it realizes zero and logs a warning.
pub fn cost_basis_fields(
    ledger: &LedgerStore,
    trade: &Trade,
    fill_price: Decimal,
    quantity: Decimal,
) -> (Option<Decimal>, Option<Decimal>) {
    match trade.side {
        Side::Buy => (Some(fill_price), None),
        Side::Sell => {
            let scope = if trade.broker_account_id.is_empty() {
                None
            } else {
                Some(trade.broker_account_id.as_str())
            };

            match ledger.average_cost_basis(&trade.symbol, scope) {
                Some(avg_cost) if avg_cost > Decimal::ZERO => {
                    let pnl = (fill_price - avg_cost) * quantity;
                    (Some(avg_cost), Some(pnl))
                }
                _ => {
                    warn!(
                        trade_id = %trade.trade_id,
                        symbol = %trade.symbol,
                        "no cost basis found for sell — realized P&L set to 0"
                    );
                    (None, Some(Decimal::ZERO))
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
