// =============================================================================
// TradingView Webhook Receiver
// =============================================================================
//
// POST /api/v1/webhooks/tradingview/
//
// Pipeline per request:
//   1. Authenticate via X-API-Token (401 on mismatch).
//   2. Throttle by source address (429 past the allowance).
//   3. Log the raw payload as a WebhookEvent — every request is recorded.
//   4. Validate the payload into a typed Signal (400 on failure).
//   5. Dispatch through the executor; 500 when the master order errored.
//
// Responses use the `{status, data, message}` envelope.
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::auth::validate_webhook_token;
use crate::app_state::{AppState, WebhookEvent, WebhookStatus};
use crate::types::{Signal, SignalAction, TradeStatus};

/// Validate a raw webhook payload into a typed [`Signal`].
///
/// Rules: `ticker`, `action` and `quantity` are required; `action` must be
/// buy or sell; `quantity` must parse as a positive number; `price` is
/// optional and must be positive when present. String and numeric JSON forms
/// are both accepted for the numeric fields.
pub fn validate_payload(payload: &Value) -> Result<Signal, String> {
    let ticker = payload
        .get("ticker")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("ticker is required")?;

    let action = match payload.get("action").and_then(|v| v.as_str()) {
        Some("buy") => SignalAction::Buy,
        Some("sell") => SignalAction::Sell,
        Some(other) => return Err(format!("action must be buy or sell, got '{other}'")),
        None => return Err("action is required".to_string()),
    };

    let quantity = parse_decimal_field(payload, "quantity")?
        .ok_or("quantity is required")?;
    if quantity <= Decimal::ZERO {
        return Err("quantity must be positive".to_string());
    }

    let price = match parse_decimal_field(payload, "price")? {
        Some(p) if p > Decimal::ZERO => Some(p),
        Some(_) => None, // "0" is the serializer default for "no price"
        None => None,
    };

    let strategy = payload
        .get("strategy")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(Signal {
        action,
        ticker: ticker.to_uppercase(),
        price,
        quantity,
        confidence: 1.0,
        reason: "External webhook signal".to_string(),
        strategy_name: strategy,
    })
}

fn parse_decimal_field(payload: &Value, key: &str) -> Result<Option<Decimal>, String> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                return Ok(None);
            }
            Decimal::from_str(s.trim())
                .map(Some)
                .map_err(|_| format!("{key} must be a valid number"))
        }
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(Decimal::from_f64_retain)
            .map(Some)
            .ok_or_else(|| format!("{key} must be a valid number")),
        Some(_) => Err(format!("{key} must be a number or numeric string")),
    }
}

fn source_address(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn envelope(status: &str, data: Value, message: &str) -> Value {
    json!({ "status": status, "data": data, "message": message })
}

/// The webhook handler.
pub async fn receive_tradingview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let source = source_address(&headers);

    // ── 1. Authenticate ─────────────────────────────────────────────────
    let token = headers
        .get("x-api-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !validate_webhook_token(token) {
        warn!(%source, "webhook auth failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(envelope("error", Value::Null, "Unauthorized")),
        );
    }

    // ── 2. Throttle ─────────────────────────────────────────────────────
    let limit = state.config.read().webhook_rate_limit_per_min;
    if !state.webhook_throttle.allow(&source, limit, Utc::now()) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(envelope("error", Value::Null, "Rate limit exceeded")),
        );
    }

    // ── 3. Log the raw event ────────────────────────────────────────────
    let webhook_id = state.record_webhook_event(WebhookEvent::received(payload.clone(), &source));

    // ── 4. Validate ─────────────────────────────────────────────────────
    let signal = match validate_payload(&payload) {
        Ok(signal) => signal,
        Err(reason) => {
            state.update_webhook_event(&webhook_id, |e| {
                e.status = WebhookStatus::Rejected;
                e.error_message = reason.clone();
            });
            info!(%webhook_id, %reason, "webhook rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(envelope(
                    "error",
                    json!({ "errors": reason }),
                    "Invalid payload",
                )),
            );
        }
    };

    state.update_webhook_event(&webhook_id, |e| {
        e.status = WebhookStatus::Validated;
        e.ticker = signal.ticker.clone();
        e.action = signal.action.to_string();
        e.quantity = signal.quantity.to_string();
        e.strategy = signal.strategy_name.clone();
    });

    // ── 5. Dispatch ─────────────────────────────────────────────────────
    let config = state.config.read().clone();
    if config.active_risk_config().is_none() {
        state.alert_missing_risk_config().await;
    }

    let trades = state
        .executor
        .execute_signal(&config, &signal, Some(&webhook_id))
        .await;

    // A broker submit failure surfaces as error rows on the block.
    if let Some(errored) = trades.iter().find(|t| t.status == TradeStatus::Error) {
        let message = format!("Execution failed: {}", errored.error_message);
        state.update_webhook_event(&webhook_id, |e| {
            e.status = WebhookStatus::Error;
            e.error_message = message.clone();
        });
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(envelope("error", Value::Null, &message)),
        );
    }

    state.update_webhook_event(&webhook_id, |e| e.status = WebhookStatus::Dispatched);

    let trade_ids: Vec<String> = trades.iter().map(|t| t.trade_id.clone()).collect();
    info!(
        %webhook_id,
        trades = trade_ids.len(),
        ticker = %signal.ticker,
        action = %signal.action,
        "webhook dispatched"
    );

    (
        StatusCode::OK,
        Json(envelope(
            "success",
            json!({
                "webhook_id": webhook_id,
                "trade_ids": trade_ids,
                "symbol": signal.ticker,
                "side": signal.action.to_string(),
                "quantity": signal.quantity.to_string(),
            }),
            &format!("Signal received and {} trades executed", trades.len()),
        )),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn valid_payload_parses_into_signal() {
        let payload = json!({
            "ticker": "aapl",
            "action": "buy",
            "quantity": "10",
            "price": "185.50",
            "strategy": "momentum_v1",
            "timestamp": "2026-02-25T12:00:00Z"
        });
        let signal = validate_payload(&payload).unwrap();
        assert_eq!(signal.ticker, "AAPL");
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.quantity, dec!(10));
        assert_eq!(signal.price, Some(dec!(185.50)));
        assert_eq!(signal.strategy_name, "momentum_v1");
    }

    #[test]
    fn numeric_json_fields_accepted() {
        let payload = json!({
            "ticker": "AAPL",
            "action": "sell",
            "quantity": 2.5,
            "strategy": "momentum_v1"
        });
        let signal = validate_payload(&payload).unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.quantity, dec!(2.5));
        assert!(signal.price.is_none());
    }

    #[test]
    fn missing_ticker_rejected() {
        let payload = json!({ "action": "buy", "quantity": "10" });
        let err = validate_payload(&payload).unwrap_err();
        assert!(err.contains("ticker"));
    }

    #[test]
    fn bad_action_rejected() {
        let payload = json!({ "ticker": "AAPL", "action": "short", "quantity": "10" });
        let err = validate_payload(&payload).unwrap_err();
        assert!(err.contains("action"));
    }

    #[test]
    fn non_positive_quantity_rejected() {
        for qty in ["0", "-5", "abc"] {
            let payload = json!({ "ticker": "AAPL", "action": "buy", "quantity": qty });
            assert!(validate_payload(&payload).is_err(), "quantity {qty} passed");
        }
        let missing = json!({ "ticker": "AAPL", "action": "buy" });
        assert!(validate_payload(&missing).is_err());
    }

    #[test]
    fn zero_price_treated_as_market_order() {
        let payload = json!({
            "ticker": "AAPL",
            "action": "buy",
            "quantity": "10",
            "price": "0"
        });
        let signal = validate_payload(&payload).unwrap();
        assert!(signal.price.is_none());
    }

    #[test]
    fn source_address_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.9, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(source_address(&headers), "203.0.113.9");
        assert_eq!(source_address(&HeaderMap::new()), "unknown");
    }
}
