// =============================================================================
// Central Application State — Meridian Execution Core
// =============================================================================
//
// The single source of truth shared across the async tasks. Subsystems that
// manage their own interior mutability (ledger, bar store) are held behind
// Arc; everything else mutable sits under parking_lot::RwLock. No lock is
// ever held across an await point — callers clone what they need first.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::broker::BrokerClient;
use crate::config::DeskConfig;
use crate::executor::Executor;
use crate::ledger::LedgerStore;
use crate::market_data::BarStore;
use crate::notifier::Notifier;

/// Maximum number of webhook audit records retained in memory.
const MAX_WEBHOOK_EVENTS: usize = 500;

// =============================================================================
// Webhook audit records
// =============================================================================

/// Processing state of an ingested webhook request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Received,
    Validated,
    Dispatched,
    Rejected,
    Error,
}

/// Audit record of one webhook request. Every request is logged regardless of
/// outcome.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub webhook_id: String,
    pub source: String,
    pub payload: Value,
    pub status: WebhookStatus,
    pub error_message: String,

    // Parsed fields, populated on successful validation.
    pub ticker: String,
    pub action: String,
    pub quantity: String,
    pub strategy: String,

    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn received(payload: Value, ip_address: &str) -> Self {
        Self {
            webhook_id: format!("wh_{}", Uuid::new_v4().simple()),
            source: "tradingview".to_string(),
            payload,
            status: WebhookStatus::Received,
            error_message: String::new(),
            ticker: String::new(),
            action: String::new(),
            quantity: String::new(),
            strategy: String::new(),
            ip_address: ip_address.to_string(),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    /// Monotonically increasing version counter, bumped on every meaningful
    /// state mutation.
    pub state_version: AtomicU64,

    /// Desk configuration: risk profiles, strategies, prop accounts. Read on
    /// every signal.
    pub config: RwLock<DeskConfig>,
    /// Where the desk configuration is persisted.
    pub config_path: PathBuf,

    pub ledger: Arc<LedgerStore>,
    pub bars: Arc<BarStore>,
    pub broker: Arc<dyn BrokerClient>,
    pub notifier: Arc<Notifier>,
    pub executor: Arc<Executor>,

    /// Capped ring of webhook audit records, newest last.
    pub webhook_events: RwLock<Vec<WebhookEvent>>,

    /// Per-source ingress rate limiter for the webhook endpoint.
    pub webhook_throttle: crate::api::throttle::IngressThrottle,

    /// Whether the missing-RiskConfig alert already fired this process.
    missing_config_alerted: AtomicBool,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: DeskConfig,
        config_path: PathBuf,
        ledger: Arc<LedgerStore>,
        bars: Arc<BarStore>,
        broker: Arc<dyn BrokerClient>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let executor = Arc::new(Executor::new(
            ledger.clone(),
            broker.clone(),
            notifier.clone(),
        ));

        Self {
            state_version: AtomicU64::new(1),
            config: RwLock::new(config),
            config_path,
            ledger,
            bars,
            broker,
            notifier,
            executor,
            webhook_events: RwLock::new(Vec::new()),
            webhook_throttle: crate::api::throttle::IngressThrottle::new(),
            missing_config_alerted: AtomicBool::new(false),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version tracking ────────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Config persistence ──────────────────────────────────────────────

    /// Persist the current desk configuration (clone outside the lock, then
    /// atomic write).
    pub fn save_config(&self) {
        let snapshot = self.config.read().clone();
        if let Err(e) = snapshot.save(&self.config_path) {
            error!(error = %e, "failed to persist desk config");
        }
    }

    /// Alert exactly once per process when no active risk profile exists.
    pub async fn alert_missing_risk_config(&self) {
        if self
            .missing_config_alerted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!("no active risk configuration — every trade will be rejected");
            self.notifier
                .send_system_alert(
                    "No active risk configuration",
                    "Every trade is being rejected until a RiskConfig is activated.",
                    "CRITICAL",
                )
                .await;
        }
    }

    // ── Webhook audit ───────────────────────────────────────────────────

    /// Record a webhook event, evicting the oldest past the retention cap.
    /// Returns the event's id.
    pub fn record_webhook_event(&self, event: WebhookEvent) -> String {
        let id = event.webhook_id.clone();
        let mut events = self.webhook_events.write();
        events.push(event);
        while events.len() > MAX_WEBHOOK_EVENTS {
            events.remove(0);
        }
        drop(events);
        self.increment_version();
        id
    }

    /// Mutate a recorded webhook event in place.
    pub fn update_webhook_event(&self, webhook_id: &str, apply: impl FnOnce(&mut WebhookEvent)) {
        let mut events = self.webhook_events.write();
        if let Some(event) = events.iter_mut().find(|e| e.webhook_id == webhook_id) {
            apply(event);
        }
        drop(events);
        self.increment_version();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::MockBroker;

    fn state() -> AppState {
        AppState::new(
            DeskConfig::default(),
            PathBuf::from("/tmp/desk_config_test.json"),
            Arc::new(LedgerStore::in_memory()),
            Arc::new(BarStore::new(500)),
            Arc::new(MockBroker::default()),
            Arc::new(Notifier::disabled()),
        )
    }

    #[test]
    fn version_counter_increments() {
        let state = state();
        let before = state.current_state_version();
        state.increment_version();
        assert_eq!(state.current_state_version(), before + 1);
    }

    #[test]
    fn webhook_ring_caps_retention() {
        let state = state();
        for _ in 0..(MAX_WEBHOOK_EVENTS + 10) {
            state.record_webhook_event(WebhookEvent::received(serde_json::json!({}), "10.0.0.1"));
        }
        assert_eq!(state.webhook_events.read().len(), MAX_WEBHOOK_EVENTS);
    }

    #[test]
    fn webhook_event_updates_in_place() {
        let state = state();
        let id = state.record_webhook_event(WebhookEvent::received(
            serde_json::json!({"ticker": "AAPL"}),
            "10.0.0.1",
        ));

        state.update_webhook_event(&id, |e| {
            e.status = WebhookStatus::Validated;
            e.ticker = "AAPL".into();
        });

        let events = state.webhook_events.read();
        let event = events.iter().find(|e| e.webhook_id == id).unwrap();
        assert_eq!(event.status, WebhookStatus::Validated);
        assert_eq!(event.ticker, "AAPL");
    }

    #[tokio::test]
    async fn missing_config_alert_fires_once() {
        let state = state();
        // Both calls succeed; the second is a no-op (verified by the CAS flag).
        state.alert_missing_risk_config().await;
        state.alert_missing_risk_config().await;
        assert!(state.missing_config_alerted.load(Ordering::SeqCst));
    }
}
