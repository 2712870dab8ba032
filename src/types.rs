// =============================================================================
// Shared types used across the Meridian execution core
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl Default for OrderType {
    fn default() -> Self {
        Self::Market
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Limit => write!(f, "limit"),
            Self::Stop => write!(f, "stop"),
            Self::StopLimit => write!(f, "stop_limit"),
        }
    }
}

/// Life-cycle status of a ledger trade.
///
/// Legal transitions:
///   Pending   -> Submitted | Filled | Cancelled | Rejected | Error
///   Submitted -> Filled | Partial | Cancelled | Rejected | Error
///   Partial   -> Filled | Cancelled
/// Filled, Cancelled, Rejected and Error are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Submitted,
    Filled,
    Partial,
    Cancelled,
    Rejected,
    Error,
}

impl TradeStatus {
    /// Whether no further status changes are allowed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Error
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    /// Re-applying the current status is allowed (idempotent fill replays).
    pub fn can_transition(self, next: TradeStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(
                next,
                Self::Submitted | Self::Filled | Self::Cancelled | Self::Rejected | Self::Error
            ),
            Self::Submitted => matches!(
                next,
                Self::Filled | Self::Partial | Self::Cancelled | Self::Rejected | Self::Error
            ),
            Self::Partial => matches!(next, Self::Filled | Self::Cancelled),
            _ => false,
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Filled => "filled",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// What a signal asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

impl SignalAction {
    /// Convert an actionable signal action into an order side.
    pub fn as_side(self) -> Option<Side> {
        match self {
            Self::Buy => Some(Side::Buy),
            Self::Sell => Some(Side::Sell),
            Self::Hold => None,
        }
    }
}

/// A typed trade signal, produced by a strategy or the webhook boundary.
///
/// Raw webhook payloads are validated into this structure once; all internal
/// code operates on the struct, never on loose JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub ticker: String,
    /// Intended price. `None` means market-priced (no pre-fill price check
    /// possible).
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    /// Strategy confidence in [0, 1].
    pub confidence: f64,
    pub reason: String,
    pub strategy_name: String,
}

impl Signal {
    /// A HOLD signal carrying only an explanation.
    pub fn hold(ticker: &str, strategy_name: &str, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            ticker: ticker.to_string(),
            price: None,
            quantity: Decimal::ZERO,
            confidence: 0.0,
            reason: reason.into(),
            strategy_name: strategy_name.to_string(),
        }
    }

    /// Whether this signal should reach the executor at all.
    pub fn is_actionable(&self) -> bool {
        matches!(self.action, SignalAction::Buy | SignalAction::Sell)
    }
}

/// Challenge phase of a prop-firm account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountPhase {
    Evaluation,
    Verification,
    Funded,
    Suspended,
    Failed,
}

impl Default for AccountPhase {
    fn default() -> Self {
        Self::Evaluation
    }
}

impl std::fmt::Display for AccountPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Evaluation => "evaluation",
            Self::Verification => "verification",
            Self::Funded => "funded",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Asset class a strategy trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stocks,
    Futures,
    Crypto,
}

impl Default for AssetClass {
    fn default() -> Self {
        Self::Stocks
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stocks => write!(f, "stocks"),
            Self::Futures => write!(f, "futures"),
            Self::Crypto => write!(f, "crypto"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
