// =============================================================================
// Broker Trade-Update Stream — long-lived fill listener
// =============================================================================
//
// Consumes `trade_updates` events pushed by the broker and applies them to
// the ledger. The handler tolerates out-of-order delivery:
//   - updates for unknown order ids are ignored (the order may have been
//     placed outside the system, or the rows are not yet persisted);
//   - duplicate fill events are idempotent (re-applying identical values is
//     legal in the ledger's update path).
//
// The connection reconnects with exponential backoff; missed fills are
// reconciled by a periodic sync outside this module.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{TradeEventKind, TradeUpdateEvent};
use crate::executor::cost_basis_fields;
use crate::ledger::{LedgerStore, TradeUpdate};
use crate::notifier::Notifier;
use crate::types::TradeStatus;

/// Cap on the reconnect delay.
const MAX_BACKOFF_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a raw stream payload into a [`TradeUpdateEvent`].
///
/// Accepts both the enveloped form `{"stream": "trade_updates", "data": {..}}`
/// and a bare `{"event": ..., "order": {..}}` object. Returns `None` for
/// unrelated or malformed messages.
pub fn parse_trade_update(text: &str) -> Option<TradeUpdateEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;

    let data = if value.get("stream").is_some() {
        if value["stream"].as_str() != Some("trade_updates") {
            return None;
        }
        &value["data"]
    } else {
        &value
    };

    let kind = match data["event"].as_str()? {
        "fill" => TradeEventKind::Fill,
        "partial_fill" => TradeEventKind::PartialFill,
        "rejected" => TradeEventKind::Rejected,
        "canceled" => TradeEventKind::Canceled,
        "suspended" => TradeEventKind::Suspended,
        _ => return None,
    };

    let order = &data["order"];
    let order_id = order["id"].as_str()?.to_string();

    let parse_dec = |v: &serde_json::Value| -> Option<Decimal> {
        if let Some(s) = v.as_str() {
            s.parse().ok()
        } else {
            v.as_f64().and_then(Decimal::from_f64_retain)
        }
    };

    Some(TradeUpdateEvent {
        kind,
        order_id,
        filled_avg_price: parse_dec(&order["filled_avg_price"]),
        filled_qty: parse_dec(&order["filled_qty"]),
    })
}

// ---------------------------------------------------------------------------
// Applying updates
// ---------------------------------------------------------------------------

/// Apply one trade-update event to the ledger rows sharing its order id.
///
/// Block orders materialize several rows per broker order; a fill refreshes
/// each row's quantity proportionally so the per-account split is preserved
/// against the broker-reported filled quantity.
pub async fn handle_trade_update(
    ledger: &LedgerStore,
    notifier: &Notifier,
    event: TradeUpdateEvent,
) {
    let trades = ledger.find_by_order_id(&event.order_id);
    if trades.is_empty() {
        debug!(order_id = %event.order_id, "trade update for unknown order — ignored");
        return;
    }

    match event.kind {
        TradeEventKind::Fill | TradeEventKind::PartialFill => {
            let status = if event.kind == TradeEventKind::Fill {
                TradeStatus::Filled
            } else {
                TradeStatus::Partial
            };

            let prior_total: Decimal = trades.iter().map(|t| t.quantity).sum();

            for trade in &trades {
                if trade.status.is_terminal() && trade.status != status {
                    debug!(
                        trade_id = %trade.trade_id,
                        status = %trade.status,
                        "skipping fill update for terminal trade"
                    );
                    continue;
                }

                // Refresh quantity to this row's share of the broker-reported
                // filled quantity.
                let quantity = match event.filled_qty {
                    Some(filled) if prior_total > Decimal::ZERO => Some(
                        (filled * trade.quantity / prior_total)
                            .round_dp_with_strategy(6, rust_decimal::RoundingStrategy::ToZero),
                    ),
                    _ => None,
                };

                let fill_price = event.filled_avg_price.or(trade.fill_price);

                let (cost_basis, realized_pnl) = match fill_price {
                    Some(px) => {
                        let effective_qty = quantity.unwrap_or(trade.quantity);
                        cost_basis_fields(ledger, trade, px, effective_qty)
                    }
                    None => (None, None),
                };

                let update = TradeUpdate {
                    status: Some(status),
                    fill_price,
                    quantity,
                    cost_basis,
                    realized_pnl,
                    ..Default::default()
                };

                match ledger.apply_update(&trade.trade_id, update) {
                    Ok(updated) => {
                        info!(
                            trade_id = %updated.trade_id,
                            symbol = %updated.symbol,
                            status = %updated.status,
                            fill_price = ?updated.fill_price,
                            "fill update applied"
                        );
                        if event.kind == TradeEventKind::Fill {
                            notifier.send_trade_alert(&updated).await;
                        }
                    }
                    Err(e) => {
                        warn!(
                            trade_id = %trade.trade_id,
                            error = %e,
                            "fill update rejected by ledger"
                        );
                    }
                }
            }
        }

        TradeEventKind::Rejected | TradeEventKind::Canceled | TradeEventKind::Suspended => {
            let (status, label) = match event.kind {
                TradeEventKind::Rejected => (TradeStatus::Rejected, "rejected"),
                TradeEventKind::Canceled => (TradeStatus::Cancelled, "canceled"),
                _ => (TradeStatus::Error, "suspended"),
            };

            for trade in &trades {
                if trade.status.is_terminal() {
                    continue;
                }
                let update = TradeUpdate {
                    status: Some(status),
                    error_message: Some(format!("Broker {label} order {}", event.order_id)),
                    ..Default::default()
                };
                if let Err(e) = ledger.apply_update(&trade.trade_id, update) {
                    warn!(trade_id = %trade.trade_id, error = %e, "status update rejected");
                    continue;
                }
                notifier
                    .send_system_alert(
                        &format!("Order {label}: {}", trade.symbol),
                        &format!("Broker {label} order {}", event.order_id),
                        "WARNING",
                    )
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Run one stream connection until it drops. Authentication and subscription
/// are sent immediately after connect.
async fn run_stream_once(
    url: &str,
    ledger: &Arc<LedgerStore>,
    notifier: &Arc<Notifier>,
) -> Result<()> {
    let (ws, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to broker stream at {url}"))?;

    info!(url, "broker trade-update stream connected");

    let (mut write, mut read) = ws.split();

    let api_key = std::env::var("BROKER_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BROKER_API_SECRET").unwrap_or_default();

    let auth = serde_json::json!({
        "action": "auth",
        "key": api_key,
        "secret": api_secret,
    });
    write.send(Message::Text(auth.to_string())).await?;

    let listen = serde_json::json!({
        "action": "listen",
        "data": { "streams": ["trade_updates"] },
    });
    write.send(Message::Text(listen.to_string())).await?;

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                if let Some(event) = parse_trade_update(&text) {
                    handle_trade_update(ledger, notifier, event).await;
                }
            }
            Message::Ping(payload) => {
                write.send(Message::Pong(payload)).await?;
            }
            Message::Close(frame) => {
                info!(?frame, "broker stream closed by remote");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Long-lived consumer: reconnects forever with exponential backoff, resetting
/// the backoff after each successful connection.
pub async fn run_with_reconnect(url: String, ledger: Arc<LedgerStore>, notifier: Arc<Notifier>) {
    let mut attempt: u32 = 0;

    loop {
        match run_stream_once(&url, &ledger, &notifier).await {
            Ok(()) => {
                attempt = 0;
            }
            Err(e) => {
                warn!(error = %e, attempt, "broker stream error");
                attempt = attempt.saturating_add(1);
            }
        }

        let delay = (1u64 << attempt.min(6)).min(MAX_BACKOFF_SECS);
        debug!(delay_secs = delay, "reconnecting to broker stream");
        tokio::time::sleep(tokio::time::Duration::from_secs(delay)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
