// =============================================================================
// Broker Abstraction — the only surface the core talks to a brokerage through
// =============================================================================
//
// Wire protocols are out of scope: the executor, risk gate, and sweeps depend
// exclusively on this trait. The REST implementation lives in `rest`; the
// asynchronous trade-update stream consumer lives in `stream`.
// =============================================================================

pub mod rest;
pub mod stream;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OrderType, Side};

/// Errors surfaced by broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(String),
    #[error("broker returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to parse broker response: {0}")]
    Parse(String),
    #[error("broker client not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Account snapshot returned by [`BrokerClient::get_account`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: String,
    pub status: String,
    pub buying_power: Decimal,
    pub equity: Decimal,
    pub cash: Decimal,
    pub portfolio_value: Decimal,
    pub pattern_day_trader: bool,
}

/// A new-order request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: Decimal,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: String,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// A day market order; callers override type/prices as needed.
    pub fn new(symbol: &str, qty: Decimal, side: Side) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty,
            side,
            order_type: OrderType::Market,
            time_in_force: "day".to_string(),
            limit_price: None,
            stop_price: None,
            client_order_id: None,
        }
    }
}

/// Acknowledgement returned by [`BrokerClient::submit_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub qty: Decimal,
    pub side: String,
    pub order_type: String,
    pub status: String,
    pub submitted_at: String,
    /// Present when the order filled synchronously (paper brokers, IOC fills).
    pub filled_avg_price: Option<Decimal>,
}

/// A position held at the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub side: String,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pl: Decimal,
    pub unrealized_plpc: Decimal,
}

/// Trade-update event kinds delivered by the broker push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeEventKind {
    Fill,
    PartialFill,
    Rejected,
    Canceled,
    Suspended,
}

/// A parsed trade-update pushed over the broker stream.
#[derive(Debug, Clone)]
pub struct TradeUpdateEvent {
    pub kind: TradeEventKind,
    pub order_id: String,
    pub filled_avg_price: Option<Decimal>,
    pub filled_qty: Option<Decimal>,
}

/// The broker interface the execution core depends on.
///
/// `cancel_all_orders` / `close_all_positions` are the kill-switch actuators.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_account(&self) -> BrokerResult<AccountSnapshot>;
    async fn submit_order(&self, request: OrderRequest) -> BrokerResult<OrderAck>;
    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>>;
    async fn cancel_all_orders(&self) -> BrokerResult<u32>;
    async fn close_all_positions(&self) -> BrokerResult<u32>;
}

// =============================================================================
// Test double
// =============================================================================

#[cfg(test)]
pub mod testing {
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    /// Scriptable in-memory broker for gate and executor tests.
    pub struct MockBroker {
        pub equity: Decimal,
        pub positions: Vec<BrokerPosition>,
        /// Fill price returned on every submit ack; `None` acks as accepted.
        pub fill_price: Option<Decimal>,
        pub fail_account: bool,
        pub fail_positions: bool,
        pub fail_submit: bool,
        pub submitted: Mutex<Vec<OrderRequest>>,
    }

    impl MockBroker {
        pub fn filling_at(price: Decimal) -> Self {
            Self {
                fill_price: Some(price),
                ..Self::default()
            }
        }

        pub fn position(symbol: &str, qty: Decimal) -> BrokerPosition {
            BrokerPosition {
                symbol: symbol.to_string(),
                qty,
                side: "long".to_string(),
                avg_entry_price: dec!(100),
                current_price: dec!(100),
                market_value: qty * dec!(100),
                unrealized_pl: Decimal::ZERO,
                unrealized_plpc: Decimal::ZERO,
            }
        }
    }

    impl Default for MockBroker {
        fn default() -> Self {
            Self {
                equity: dec!(100000),
                positions: Vec::new(),
                fill_price: None,
                fail_account: false,
                fail_positions: false,
                fail_submit: false,
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrokerClient for MockBroker {
        async fn get_account(&self) -> BrokerResult<AccountSnapshot> {
            if self.fail_account {
                return Err(BrokerError::Transport("account endpoint down".into()));
            }
            Ok(AccountSnapshot {
                id: "mock-account".into(),
                status: "ACTIVE".into(),
                buying_power: self.equity * dec!(2),
                equity: self.equity,
                cash: self.equity,
                portfolio_value: self.equity,
                pattern_day_trader: false,
            })
        }

        async fn submit_order(&self, request: OrderRequest) -> BrokerResult<OrderAck> {
            if self.fail_submit {
                return Err(BrokerError::Api {
                    status: 403,
                    message: "insufficient buying power".into(),
                });
            }
            let ack = OrderAck {
                order_id: format!("ord_{}", Uuid::new_v4().simple()),
                client_order_id: request.client_order_id.clone().unwrap_or_default(),
                symbol: request.symbol.clone(),
                qty: request.qty,
                side: request.side.to_string(),
                order_type: request.order_type.to_string(),
                status: if self.fill_price.is_some() {
                    "filled".into()
                } else {
                    "accepted".into()
                },
                submitted_at: "2026-02-25T12:00:00Z".into(),
                filled_avg_price: self.fill_price,
            };
            self.submitted.lock().push(request);
            Ok(ack)
        }

        async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
            if self.fail_positions {
                return Err(BrokerError::Transport("positions endpoint down".into()));
            }
            Ok(self.positions.clone())
        }

        async fn cancel_all_orders(&self) -> BrokerResult<u32> {
            Ok(0)
        }

        async fn close_all_positions(&self) -> BrokerResult<u32> {
            Ok(self.positions.len() as u32)
        }
    }
}
