// =============================================================================
// Ledger — append-only trade store with derived cost-basis / P&L queries
// =============================================================================
//
// Every order attempt (approved, rejected, or errored) becomes a Trade row.
// Rows are never deleted. Core identity fields (trade_id, symbol, side,
// created_at) are immutable after insert; quantity is mutable only while the
// status is non-terminal (broker fill updates may adopt the broker-reported
// filled quantity). Everything derived — account equity, cost basis, daily
// P&L — is computed by aggregating rows, never cached.
//
// Persistence is a JSONL journal: each insert or update appends a full
// snapshot line; loading replays the file keeping the last line per trade_id.
// =============================================================================

use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{OrderType, Side, TradeStatus};

/// Generate a prefixed unique id for trades.
fn generate_trade_id() -> String {
    format!("trd_{}", Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Trade record
// ---------------------------------------------------------------------------

/// Immutable record of an order attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    #[serde(default)]
    pub order_type: OrderType,
    pub status: TradeStatus,

    // Pricing
    #[serde(default)]
    pub requested_price: Option<Decimal>,
    #[serde(default)]
    pub fill_price: Option<Decimal>,
    /// Per-share acquisition price. Set once on fill.
    #[serde(default)]
    pub cost_basis: Option<Decimal>,
    /// Realized P&L. Set only on sells.
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,

    // Source tracking
    pub strategy: String,
    #[serde(default)]
    pub webhook_id: String,
    #[serde(default)]
    pub broker_order_id: String,
    #[serde(default)]
    pub broker_account_id: String,

    // Risk check result
    #[serde(default)]
    pub risk_approved: bool,
    #[serde(default)]
    pub risk_reason: String,

    #[serde(default)]
    pub error_message: String,

    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// A fresh pending trade with defaulted bookkeeping fields.
    pub fn new(symbol: &str, side: Side, quantity: Decimal, strategy: &str) -> Self {
        let now = Utc::now();
        Self {
            trade_id: generate_trade_id(),
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            status: TradeStatus::Pending,
            requested_price: None,
            fill_price: None,
            cost_basis: None,
            realized_pnl: None,
            strategy: strategy.to_string(),
            webhook_id: String::new(),
            broker_order_id: String::new(),
            broker_account_id: String::new(),
            risk_approved: false,
            risk_reason: String::new(),
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The set of fields a post-insert update is allowed to touch.
///
/// `symbol`, `side` and `created_at` have no representation here on purpose:
/// identity is immutable by construction.
#[derive(Debug, Clone, Default)]
pub struct TradeUpdate {
    pub status: Option<TradeStatus>,
    pub fill_price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub cost_basis: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub broker_order_id: Option<String>,
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Thread-safe append-only trade store with an optional JSONL journal.
pub struct LedgerStore {
    trades: RwLock<Vec<Trade>>,
    journal_path: Option<PathBuf>,
}

impl LedgerStore {
    /// A store with no journal (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            trades: RwLock::new(Vec::new()),
            journal_path: None,
        }
    }

    /// Open (or create) a journal-backed store, replaying any existing file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut trades: Vec<Trade> = Vec::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read ledger journal {}", path.display()))?;

            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Trade>(line) {
                    Ok(trade) => {
                        // Last line per trade_id wins, position preserved.
                        match trades.iter_mut().find(|t| t.trade_id == trade.trade_id) {
                            Some(existing) => *existing = trade,
                            None => trades.push(trade),
                        }
                    }
                    Err(e) => {
                        warn!(line = lineno + 1, error = %e, "skipping malformed ledger line");
                    }
                }
            }
            info!(path = %path.display(), count = trades.len(), "ledger journal replayed");
        }

        Ok(Self {
            trades: RwLock::new(trades),
            journal_path: Some(path),
        })
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append a new trade row. Returns the stored copy.
    pub fn insert(&self, trade: Trade) -> Trade {
        {
            let mut trades = self.trades.write();
            trades.push(trade.clone());
        }
        self.journal_append(&trade);
        debug!(
            trade_id = %trade.trade_id,
            symbol = %trade.symbol,
            side = %trade.side,
            status = %trade.status,
            "trade inserted"
        );
        trade
    }

    /// Apply a guarded update to an existing trade.
    ///
    /// Enforced rules:
    /// - status changes must follow [`TradeStatus::can_transition`];
    /// - `quantity` and `fill_price` may only change while the current status
    ///   is non-terminal (re-applying the identical value is always allowed,
    ///   so duplicate fill events stay idempotent).
    pub fn apply_update(&self, trade_id: &str, update: TradeUpdate) -> Result<Trade> {
        let updated = {
            let mut trades = self.trades.write();
            let trade = trades
                .iter_mut()
                .find(|t| t.trade_id == trade_id)
                .with_context(|| format!("trade {trade_id} not found"))?;

            if let Some(next) = update.status {
                if !trade.status.can_transition(next) {
                    bail!(
                        "illegal status transition {} -> {} for trade {}",
                        trade.status,
                        next,
                        trade_id
                    );
                }
            }

            if let Some(qty) = update.quantity {
                if trade.status.is_terminal() && qty != trade.quantity {
                    bail!(
                        "quantity is immutable once trade {} is {}",
                        trade_id,
                        trade.status
                    );
                }
            }

            if let Some(px) = update.fill_price {
                if trade.status.is_terminal() && trade.fill_price.is_some_and(|p| p != px) {
                    bail!(
                        "fill_price is immutable once trade {} is {}",
                        trade_id,
                        trade.status
                    );
                }
            }

            // All guards passed — apply.
            if let Some(next) = update.status {
                trade.status = next;
            }
            if let Some(qty) = update.quantity {
                trade.quantity = qty;
            }
            if let Some(px) = update.fill_price {
                trade.fill_price = Some(px);
            }
            if let Some(cb) = update.cost_basis {
                trade.cost_basis = Some(cb);
            }
            if let Some(pnl) = update.realized_pnl {
                trade.realized_pnl = Some(pnl);
            }
            if let Some(oid) = update.broker_order_id {
                trade.broker_order_id = oid;
            }
            if let Some(msg) = update.error_message {
                trade.error_message = msg;
            }
            trade.updated_at = Utc::now();
            trade.clone()
        };

        self.journal_append(&updated);
        Ok(updated)
    }

    fn journal_append(&self, trade: &Trade) {
        let Some(path) = &self.journal_path else {
            return;
        };
        let line = match serde_json::to_string(trade) {
            Ok(l) => l,
            Err(e) => {
                warn!(trade_id = %trade.trade_id, error = %e, "failed to serialise trade for journal");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to append to ledger journal");
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub fn get(&self, trade_id: &str) -> Option<Trade> {
        self.trades
            .read()
            .iter()
            .find(|t| t.trade_id == trade_id)
            .cloned()
    }

    /// All trades sharing a broker order id (one per block-participant
    /// account).
    pub fn find_by_order_id(&self, broker_order_id: &str) -> Vec<Trade> {
        if broker_order_id.is_empty() {
            return Vec::new();
        }
        self.trades
            .read()
            .iter()
            .filter(|t| t.broker_order_id == broker_order_id)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Trade> {
        self.trades.read().clone()
    }

    pub fn len(&self) -> usize {
        self.trades.read().len()
    }

    // -------------------------------------------------------------------------
    // Daily aggregates (UTC trading day, matching row creation timestamps)
    // -------------------------------------------------------------------------

    /// Count of today's trades across all statuses.
    pub fn count_today(&self, now: DateTime<Utc>) -> usize {
        let today = now.date_naive();
        self.trades
            .read()
            .iter()
            .filter(|t| t.created_at.date_naive() == today)
            .count()
    }

    /// Sum of realized P&L over today's filled trades.
    pub fn realized_pnl_today(&self, now: DateTime<Utc>) -> Decimal {
        let today = now.date_naive();
        self.trades
            .read()
            .iter()
            .filter(|t| t.created_at.date_naive() == today && t.status == TradeStatus::Filled)
            .filter_map(|t| t.realized_pnl)
            .sum()
    }

    // -------------------------------------------------------------------------
    // Position / cost-basis aggregates
    // -------------------------------------------------------------------------

    /// Local approximation of open position count when the broker is
    /// unreachable: symbols with filled buys that have no filled sell.
    pub fn open_symbol_estimate(&self) -> usize {
        let trades = self.trades.read();
        let bought: HashSet<&str> = trades
            .iter()
            .filter(|t| t.side == Side::Buy && t.status == TradeStatus::Filled)
            .map(|t| t.symbol.as_str())
            .collect();
        let sold: HashSet<&str> = trades
            .iter()
            .filter(|t| t.side == Side::Sell && t.status == TradeStatus::Filled)
            .map(|t| t.symbol.as_str())
            .collect();
        bought.difference(&sold).count()
    }

    /// Weighted-average cost basis over filled buys of `symbol`.
    ///
    /// Scope: per broker account when `account_id` is a non-empty id, global
    /// across accounts otherwise. Returns `None` when no priced buy quantity
    /// exists.
    pub fn average_cost_basis(&self, symbol: &str, account_id: Option<&str>) -> Option<Decimal> {
        let trades = self.trades.read();

        let mut total_cost = Decimal::ZERO;
        let mut total_qty = Decimal::ZERO;

        for t in trades.iter().filter(|t| {
            t.symbol == symbol && t.side == Side::Buy && t.status == TradeStatus::Filled
        }) {
            if let Some(scope) = account_id {
                if !scope.is_empty() && t.broker_account_id != scope {
                    continue;
                }
            }
            if let Some(cb) = t.cost_basis {
                if cb > Decimal::ZERO {
                    total_cost += cb * t.quantity;
                    total_qty += t.quantity;
                }
            }
        }

        if total_qty > Decimal::ZERO {
            Some(total_cost / total_qty)
        } else {
            None
        }
    }

    /// Net open quantity for a symbol: filled buys minus filled sells.
    pub fn net_position_qty(&self, symbol: &str) -> Decimal {
        self.trades
            .read()
            .iter()
            .filter(|t| t.symbol == symbol && t.status == TradeStatus::Filled)
            .map(|t| match t.side {
                Side::Buy => t.quantity,
                Side::Sell => -t.quantity,
            })
            .sum()
    }

    /// Total realized P&L for one broker account over filled trades.
    pub fn realized_pnl_for_account(&self, broker_account_id: &str) -> Decimal {
        if broker_account_id.is_empty() {
            return Decimal::ZERO;
        }
        self.trades
            .read()
            .iter()
            .filter(|t| {
                t.broker_account_id == broker_account_id && t.status == TradeStatus::Filled
            })
            .filter_map(|t| t.realized_pnl)
            .sum()
    }

    /// Realized P&L values of every filled sell belonging to `strategy`
    /// (the resolved-outcome sample the Kelly engine and allocator feed on).
    pub fn resolved_sell_pnls(&self, strategy: &str) -> Vec<Decimal> {
        self.trades
            .read()
            .iter()
            .filter(|t| {
                t.strategy == strategy && t.side == Side::Sell && t.status == TradeStatus::Filled
            })
            .filter_map(|t| t.realized_pnl)
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filled_buy(symbol: &str, qty: Decimal, cost: Decimal, account: &str) -> Trade {
        let mut t = Trade::new(symbol, Side::Buy, qty, "momentum_v1");
        t.status = TradeStatus::Filled;
        t.fill_price = Some(cost);
        t.cost_basis = Some(cost);
        t.broker_account_id = account.to_string();
        t
    }

    #[test]
    fn insert_then_get_round_trips() {
        let ledger = LedgerStore::in_memory();
        let t = ledger.insert(Trade::new("AAPL", Side::Buy, dec!(10), "momentum_v1"));
        let fetched = ledger.get(&t.trade_id).unwrap();
        assert_eq!(fetched.symbol, "AAPL");
        assert_eq!(fetched.quantity, dec!(10));
        assert_eq!(fetched.status, TradeStatus::Pending);
    }

    #[test]
    fn illegal_status_transition_is_rejected() {
        let ledger = LedgerStore::in_memory();
        let mut t = Trade::new("AAPL", Side::Buy, dec!(10), "momentum_v1");
        t.status = TradeStatus::Filled;
        let t = ledger.insert(t);

        let err = ledger
            .apply_update(
                &t.trade_id,
                TradeUpdate {
                    status: Some(TradeStatus::Submitted),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("illegal status transition"));
    }

    #[test]
    fn quantity_immutable_once_terminal() {
        let ledger = LedgerStore::in_memory();
        let t = ledger.insert(filled_buy("AAPL", dec!(10), dec!(150), ""));

        let err = ledger
            .apply_update(
                &t.trade_id,
                TradeUpdate {
                    quantity: Some(dec!(12)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("immutable"));

        // Re-applying the same quantity stays idempotent.
        let ok = ledger.apply_update(
            &t.trade_id,
            TradeUpdate {
                quantity: Some(dec!(10)),
                ..Default::default()
            },
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn quantity_mutable_while_submitted() {
        let ledger = LedgerStore::in_memory();
        let mut t = Trade::new("AAPL", Side::Buy, dec!(10), "momentum_v1");
        t.status = TradeStatus::Submitted;
        let t = ledger.insert(t);

        let updated = ledger
            .apply_update(
                &t.trade_id,
                TradeUpdate {
                    status: Some(TradeStatus::Filled),
                    quantity: Some(dec!(9.5)),
                    fill_price: Some(dec!(150.25)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.quantity, dec!(9.5));
        assert_eq!(updated.status, TradeStatus::Filled);
        assert_eq!(updated.fill_price, Some(dec!(150.25)));
    }

    #[test]
    fn duplicate_fill_replay_is_idempotent() {
        let ledger = LedgerStore::in_memory();
        let mut t = Trade::new("AAPL", Side::Buy, dec!(10), "momentum_v1");
        t.status = TradeStatus::Submitted;
        let t = ledger.insert(t);

        let fill = TradeUpdate {
            status: Some(TradeStatus::Filled),
            fill_price: Some(dec!(150.25)),
            quantity: Some(dec!(10)),
            cost_basis: Some(dec!(150.25)),
            ..Default::default()
        };
        ledger.apply_update(&t.trade_id, fill.clone()).unwrap();
        // Same event delivered twice by the stream — second apply succeeds
        // without changing anything.
        let again = ledger.apply_update(&t.trade_id, fill).unwrap();
        assert_eq!(again.fill_price, Some(dec!(150.25)));
        assert_eq!(again.quantity, dec!(10));
    }

    #[test]
    fn conflicting_fill_price_on_terminal_is_rejected() {
        let ledger = LedgerStore::in_memory();
        let t = ledger.insert(filled_buy("AAPL", dec!(10), dec!(150), ""));
        let err = ledger
            .apply_update(
                &t.trade_id,
                TradeUpdate {
                    fill_price: Some(dec!(151)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("fill_price"));
    }

    #[test]
    fn weighted_average_cost_basis() {
        let ledger = LedgerStore::in_memory();
        ledger.insert(filled_buy("AAPL", dec!(10), dec!(100), ""));
        ledger.insert(filled_buy("AAPL", dec!(30), dec!(120), ""));
        // (10*100 + 30*120) / 40 = 115
        let avg = ledger.average_cost_basis("AAPL", None).unwrap();
        assert_eq!(avg, dec!(115));
    }

    #[test]
    fn cost_basis_scoped_per_account_when_set() {
        let ledger = LedgerStore::in_memory();
        ledger.insert(filled_buy("TSLA", dec!(10), dec!(200), "ACCT-A"));
        ledger.insert(filled_buy("TSLA", dec!(10), dec!(300), "ACCT-B"));

        assert_eq!(
            ledger.average_cost_basis("TSLA", Some("ACCT-A")).unwrap(),
            dec!(200)
        );
        assert_eq!(
            ledger.average_cost_basis("TSLA", Some("ACCT-B")).unwrap(),
            dec!(300)
        );
        // Global scope blends both accounts.
        assert_eq!(ledger.average_cost_basis("TSLA", None).unwrap(), dec!(250));
    }

    #[test]
    fn no_cost_basis_without_priced_buys() {
        let ledger = LedgerStore::in_memory();
        assert!(ledger.average_cost_basis("NVDA", None).is_none());

        // Unfilled buy contributes nothing.
        ledger.insert(Trade::new("NVDA", Side::Buy, dec!(5), "momentum_v1"));
        assert!(ledger.average_cost_basis("NVDA", None).is_none());
    }

    #[test]
    fn net_position_nets_buys_against_sells() {
        let ledger = LedgerStore::in_memory();
        ledger.insert(filled_buy("AAPL", dec!(10), dec!(100), ""));
        ledger.insert(filled_buy("AAPL", dec!(5), dec!(110), ""));

        let mut sell = Trade::new("AAPL", Side::Sell, dec!(4), "momentum_v1");
        sell.status = TradeStatus::Filled;
        ledger.insert(sell);

        assert_eq!(ledger.net_position_qty("AAPL"), dec!(11));
        assert_eq!(ledger.net_position_qty("MSFT"), Decimal::ZERO);
    }

    #[test]
    fn open_symbol_estimate_subtracts_sold_symbols() {
        let ledger = LedgerStore::in_memory();
        ledger.insert(filled_buy("AAPL", dec!(10), dec!(100), ""));
        ledger.insert(filled_buy("TSLA", dec!(10), dec!(200), ""));

        let mut sell = Trade::new("AAPL", Side::Sell, dec!(10), "momentum_v1");
        sell.status = TradeStatus::Filled;
        ledger.insert(sell);

        assert_eq!(ledger.open_symbol_estimate(), 1);
    }

    #[test]
    fn daily_aggregates_cover_only_today() {
        let ledger = LedgerStore::in_memory();
        let mut old = filled_buy("AAPL", dec!(10), dec!(100), "");
        old.created_at = Utc::now() - chrono::Duration::days(2);
        old.realized_pnl = Some(dec!(500));
        ledger.insert(old);

        let mut today = Trade::new("AAPL", Side::Sell, dec!(5), "momentum_v1");
        today.status = TradeStatus::Filled;
        today.realized_pnl = Some(dec!(-75));
        ledger.insert(today);

        let now = Utc::now();
        assert_eq!(ledger.count_today(now), 1);
        assert_eq!(ledger.realized_pnl_today(now), dec!(-75));
    }

    #[test]
    fn account_pnl_sums_filled_trades_only() {
        let ledger = LedgerStore::in_memory();
        let mut a = filled_buy("AAPL", dec!(10), dec!(100), "ACCT-A");
        a.realized_pnl = Some(dec!(40));
        ledger.insert(a);

        let mut pending = Trade::new("AAPL", Side::Sell, dec!(5), "momentum_v1");
        pending.broker_account_id = "ACCT-A".into();
        pending.realized_pnl = Some(dec!(999));
        ledger.insert(pending);

        assert_eq!(ledger.realized_pnl_for_account("ACCT-A"), dec!(40));
        assert_eq!(ledger.realized_pnl_for_account(""), Decimal::ZERO);
    }

    #[test]
    fn journal_replay_applies_last_wins() {
        let path = std::env::temp_dir().join(format!("ledger_test_{}.jsonl", Uuid::new_v4()));

        {
            let ledger = LedgerStore::open(&path).unwrap();
            let mut t = Trade::new("AAPL", Side::Buy, dec!(10), "momentum_v1");
            t.status = TradeStatus::Submitted;
            let t = ledger.insert(t);
            ledger
                .apply_update(
                    &t.trade_id,
                    TradeUpdate {
                        status: Some(TradeStatus::Filled),
                        fill_price: Some(dec!(150.25)),
                        cost_basis: Some(dec!(150.25)),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let reloaded = LedgerStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let t = &reloaded.all()[0];
        assert_eq!(t.status, TradeStatus::Filled);
        assert_eq!(t.fill_price, Some(dec!(150.25)));

        let _ = std::fs::remove_file(&path);
    }
}
