// =============================================================================
// REST Broker Client — header-key authenticated HTTP implementation
// =============================================================================
//
// SECURITY: the secret key is sent only as a request header and is never
// logged or serialized. Every call uses a bounded 5 s timeout so a slow
// broker cannot wedge the risk gate or the executor.
// =============================================================================

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{
    AccountSnapshot, BrokerClient, BrokerError, BrokerPosition, BrokerResult, OrderAck,
    OrderRequest,
};
use crate::types::OrderType;

/// Bounded timeout applied to every broker HTTP call.
const REQUEST_TIMEOUT_SECS: u64 = 5;

/// REST client for an Alpaca-style brokerage API (paper or live base URL).
#[derive(Clone)]
pub struct RestBrokerClient {
    base_url: String,
    client: reqwest::Client,
}

impl RestBrokerClient {
    /// Build a client from explicit credentials.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let api_secret = api_secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("APCA-API-KEY-ID", val);
        }
        if let Ok(val) = HeaderValue::from_str(&api_secret) {
            default_headers.insert("APCA-API-SECRET-KEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        let base_url = base_url.into();
        debug!(base_url = %base_url, "RestBrokerClient initialised");

        Self { base_url, client }
    }

    /// Build a client from `BROKER_API_KEY` / `BROKER_API_SECRET` /
    /// `BROKER_BASE_URL` (defaults to the paper-trading endpoint).
    pub fn from_env() -> Self {
        let api_key = std::env::var("BROKER_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("BROKER_API_SECRET").unwrap_or_default();
        let base_url = std::env::var("BROKER_BASE_URL")
            .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());
        Self::new(api_key, api_secret, base_url)
    }

    /// Issue a request and decode the JSON body, surfacing non-2xx statuses
    /// with the broker's error payload.
    async fn decode(resp: reqwest::Response) -> BrokerResult<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::Parse(e.to_string()))?;

        if !status.is_success() {
            return Err(BrokerError::Api {
                status: status.as_u16(),
                message: body.to_string(),
            });
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Value parsing helpers (brokers return numbers as strings)
    // -------------------------------------------------------------------------

    fn parse_decimal(val: &serde_json::Value) -> Decimal {
        if let Some(s) = val.as_str() {
            s.parse().unwrap_or(Decimal::ZERO)
        } else if let Some(f) = val.as_f64() {
            Decimal::from_f64_retain(f).unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    }

    fn parse_opt_decimal(val: &serde_json::Value) -> Option<Decimal> {
        if let Some(s) = val.as_str() {
            return s.parse().ok();
        }
        val.as_f64().and_then(Decimal::from_f64_retain)
    }

    fn parse_str(val: &serde_json::Value) -> String {
        val.as_str().unwrap_or_default().to_string()
    }

    fn parse_ack(body: &serde_json::Value) -> OrderAck {
        OrderAck {
            order_id: Self::parse_str(&body["id"]),
            client_order_id: Self::parse_str(&body["client_order_id"]),
            symbol: Self::parse_str(&body["symbol"]),
            qty: Self::parse_decimal(&body["qty"]),
            side: Self::parse_str(&body["side"]),
            order_type: Self::parse_str(&body["type"]),
            status: Self::parse_str(&body["status"]),
            submitted_at: Self::parse_str(&body["submitted_at"]),
            filled_avg_price: Self::parse_opt_decimal(&body["filled_avg_price"]),
        }
    }
}

#[async_trait]
impl BrokerClient for RestBrokerClient {
    async fn get_account(&self) -> BrokerResult<AccountSnapshot> {
        let url = format!("{}/v2/account", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body = Self::decode(resp).await?;

        Ok(AccountSnapshot {
            id: Self::parse_str(&body["id"]),
            status: Self::parse_str(&body["status"]),
            buying_power: Self::parse_decimal(&body["buying_power"]),
            equity: Self::parse_decimal(&body["equity"]),
            cash: Self::parse_decimal(&body["cash"]),
            portfolio_value: Self::parse_decimal(&body["portfolio_value"]),
            pattern_day_trader: body["pattern_day_trader"].as_bool().unwrap_or(false),
        })
    }

    async fn submit_order(&self, request: OrderRequest) -> BrokerResult<OrderAck> {
        let url = format!("{}/v2/orders", self.base_url);

        let mut payload = serde_json::json!({
            "symbol": request.symbol.clone(),
            "qty": request.qty.to_string(),
            "side": request.side.to_string(),
            "type": request.order_type.to_string(),
            "time_in_force": request.time_in_force.clone(),
        });
        if let Some(limit) = request.limit_price {
            payload["limit_price"] = serde_json::Value::String(limit.to_string());
        }
        if let Some(stop) = request.stop_price {
            payload["stop_price"] = serde_json::Value::String(stop.to_string());
        }
        if let Some(coid) = &request.client_order_id {
            payload["client_order_id"] = serde_json::Value::String(coid.clone());
        }

        // Limit orders without a limit price are a caller bug the broker would
        // reject anyway; catch it here with a clearer message.
        if request.order_type == OrderType::Limit && request.limit_price.is_none() {
            return Err(BrokerError::NotConfigured(
                "limit order submitted without a limit price".to_string(),
            ));
        }

        info!(
            symbol = %request.symbol,
            side = %request.side,
            qty = %request.qty,
            order_type = %request.order_type,
            "submitting order"
        );

        let resp = self.client.post(&url).json(&payload).send().await?;
        let body = Self::decode(resp).await?;
        let ack = Self::parse_ack(&body);

        info!(order_id = %ack.order_id, status = %ack.status, "order submitted");
        Ok(ack)
    }

    async fn get_positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        let url = format!("{}/v2/positions", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body = Self::decode(resp).await?;

        let entries = body
            .as_array()
            .ok_or_else(|| BrokerError::Parse("positions response is not an array".into()))?;

        let positions = entries
            .iter()
            .map(|p| BrokerPosition {
                symbol: Self::parse_str(&p["symbol"]),
                qty: Self::parse_decimal(&p["qty"]),
                side: Self::parse_str(&p["side"]),
                avg_entry_price: Self::parse_decimal(&p["avg_entry_price"]),
                current_price: Self::parse_decimal(&p["current_price"]),
                market_value: Self::parse_decimal(&p["market_value"]),
                unrealized_pl: Self::parse_decimal(&p["unrealized_pl"]),
                unrealized_plpc: Self::parse_decimal(&p["unrealized_plpc"]),
            })
            .collect();

        Ok(positions)
    }

    async fn cancel_all_orders(&self) -> BrokerResult<u32> {
        let url = format!("{}/v2/orders", self.base_url);
        let resp = self.client.delete(&url).send().await?;
        let body = Self::decode(resp).await?;

        let count = body.as_array().map(|a| a.len() as u32).unwrap_or(0);
        warn!(count, "kill switch: cancelled open orders");
        Ok(count)
    }

    async fn close_all_positions(&self) -> BrokerResult<u32> {
        let url = format!("{}/v2/positions", self.base_url);
        let resp = self.client.delete(&url).send().await?;
        let body = Self::decode(resp).await?;

        let count = body.as_array().map(|a| a.len() as u32).unwrap_or(0);
        warn!(count, "kill switch: closed positions");
        Ok(count)
    }
}

impl std::fmt::Debug for RestBrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBrokerClient")
            .field("base_url", &self.base_url)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
