// =============================================================================
// Notifier — fire-and-forget webhook alerts (Discord-style embeds)
// =============================================================================
//
// A failed alert is logged and swallowed; notification problems must never
// block or fail a trade. The notifier is disabled entirely when no webhook
// URL is configured.
// =============================================================================

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error};

use crate::accounts::PropFirmAccount;
use crate::ledger::{LedgerStore, Trade};
use crate::types::Side;

const COLOR_GREEN: u32 = 0x2ECC71;
const COLOR_RED: u32 = 0xE74C3C;
const COLOR_ORANGE: u32 = 0xFF8C00;
const COLOR_PURPLE: u32 = 0x9B59B6;

pub struct Notifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    /// Build from `DISCORD_WEBHOOK_URL`; absent means disabled.
    pub fn from_env() -> Self {
        let webhook_url = std::env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.is_empty());
        Self::new(webhook_url)
    }

    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        Self {
            webhook_url,
            client,
        }
    }

    /// A notifier that drops everything (tests, dry runs).
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    // -------------------------------------------------------------------------
    // Alert surfaces
    // -------------------------------------------------------------------------

    /// Broadcast an executed trade.
    pub async fn send_trade_alert(&self, trade: &Trade) {
        self.dispatch(trade_embed(trade)).await;
    }

    /// Broadcast a system event (broker errors, task crashes, halts).
    pub async fn send_system_alert(&self, title: &str, message: &str, level: &str) {
        self.dispatch(system_embed(title, message, level)).await;
    }

    /// Urgent alert when an account approaches its max drawdown limit.
    pub async fn send_drawdown_warning(
        &self,
        account: &PropFirmAccount,
        ledger: &LedgerStore,
        pct_to_max: Decimal,
    ) {
        self.dispatch(drawdown_embed(account, ledger, pct_to_max))
            .await;
    }

    /// End-of-day summary across the active accounts.
    pub async fn send_eod_report(&self, accounts: &[PropFirmAccount], ledger: &LedgerStore) {
        if accounts.is_empty() {
            return;
        }
        self.dispatch(eod_embed(accounts, ledger)).await;
    }

    async fn dispatch(&self, embed: serde_json::Value) {
        let Some(url) = &self.webhook_url else {
            debug!("notifier disabled — alert dropped");
            return;
        };

        let payload = json!({ "embeds": [embed] });
        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if !resp.status().is_success() => {
                error!(status = %resp.status(), "alert webhook returned an error");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "failed to push alert webhook");
            }
        }
    }
}

// =============================================================================
// Embed builders (pure, unit-testable)
// =============================================================================

fn trade_embed(trade: &Trade) -> serde_json::Value {
    let color = if trade.side == Side::Buy {
        COLOR_GREEN
    } else {
        COLOR_RED
    };

    let price = trade
        .fill_price
        .map(|p| format!("${p:.2}"))
        .unwrap_or_else(|| "pending".to_string());

    let mut fields = vec![
        json!({ "name": "Action", "value": trade.side.to_string().to_uppercase(), "inline": true }),
        json!({ "name": "Quantity", "value": trade.quantity.to_string(), "inline": true }),
        json!({ "name": "Price", "value": price, "inline": true }),
        json!({ "name": "Strategy", "value": trade.strategy.clone(), "inline": false }),
    ];

    if trade.side == Side::Sell {
        if let Some(pnl) = trade.realized_pnl {
            let pnl_str = if pnl >= Decimal::ZERO {
                format!("+${pnl:.2}")
            } else {
                format!("-${:.2}", pnl.abs())
            };
            fields.push(json!({ "name": "Realized P&L", "value": pnl_str, "inline": false }));
        }
    }

    json!({
        "title": format!("TRADE EXECUTED: {}", trade.symbol),
        "color": color,
        "fields": fields,
        "footer": { "text": "Meridian Execution Core" },
    })
}

fn system_embed(title: &str, message: &str, level: &str) -> serde_json::Value {
    let color = match level.to_uppercase().as_str() {
        "WARNING" => 0xF1C40F,
        "ERROR" => COLOR_RED,
        "CRITICAL" => 0x992D22,
        _ => 0x3498DB,
    };

    json!({
        "title": format!("[{}] {}", level.to_uppercase(), title),
        "description": message,
        "color": color,
        "footer": { "text": "Meridian System Monitor" },
    })
}

fn drawdown_embed(
    account: &PropFirmAccount,
    ledger: &LedgerStore,
    pct_to_max: Decimal,
) -> serde_json::Value {
    json!({
        "title": format!("DRAWDOWN WARNING: {}", account.name),
        "color": COLOR_ORANGE,
        "description": format!("Account is {pct_to_max:.1}% of the way to MAX LOSS."),
        "fields": [
            { "name": "Current Equity", "value": format!("${:.2}", account.current_equity(ledger)), "inline": true },
            { "name": "Total Drawdown", "value": format!("{:.2}%", account.total_drawdown_pct(ledger)), "inline": true },
            { "name": "Max Allowed", "value": format!("{:.2}%", account.max_total_drawdown_pct), "inline": true },
        ],
        "footer": { "text": "Meridian Risk Manager" },
    })
}

fn eod_embed(accounts: &[PropFirmAccount], ledger: &LedgerStore) -> serde_json::Value {
    let fields: Vec<serde_json::Value> = accounts
        .iter()
        .map(|acc| {
            let status = if acc.is_passing(ledger) { "Pass" } else { "Fail" };
            json!({
                "name": format!("{} ({})", acc.name, status),
                "value": format!(
                    "Equity: ${:.2} | PnL: ${:.2} | Target: {:.1}%",
                    acc.current_equity(ledger),
                    acc.total_pnl(ledger),
                    acc.progress_pct(ledger)
                ),
                "inline": false,
            })
        })
        .collect();

    json!({
        "title": "End of Day Portfolio Report",
        "color": COLOR_PURPLE,
        "description": format!("Daily closing summary for {} active accounts.", accounts.len()),
        "fields": fields,
        "footer": { "text": "Meridian Portfolio Tracker" },
    })
}

// =============================================================================
// Tests
// =============================================================================
