// =============================================================================
// Meridian Execution Core — Main Entry Point
// =============================================================================
//
// A single process running the full trade pipeline as concurrent tasks:
// webhook ingress, the periodic strategy runner, the drawdown / end-of-day
// sweeps, and the broker fill-update listener. The ledger database is the
// only shared mutable store; everything derived is recomputed from it.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meridian_desk::api;
use meridian_desk::app_state::AppState;
use meridian_desk::broker::rest::RestBrokerClient;
use meridian_desk::broker::{self, BrokerClient};
use meridian_desk::config::DeskConfig;
use meridian_desk::evaluation;
use meridian_desk::key_vault;
use meridian_desk::ledger::LedgerStore;
use meridian_desk::market_data::BarStore;
use meridian_desk::notifier::Notifier;
use meridian_desk::runner;

/// Resolve broker credentials, preferring encrypted-at-rest values.
///
/// `BROKER_API_KEY_ENC` / `BROKER_API_SECRET_ENC` hold vault ciphertexts
/// decrypted with `ENCRYPTION_KEY`; the plain `BROKER_API_KEY` /
/// `BROKER_API_SECRET` variables are the fallback.
fn broker_credentials() -> (String, String) {
    let enc_key = std::env::var("BROKER_API_KEY_ENC").unwrap_or_default();
    let enc_secret = std::env::var("BROKER_API_SECRET_ENC").unwrap_or_default();

    if !enc_key.is_empty() && !enc_secret.is_empty() {
        match (
            key_vault::decrypt_key(&enc_key),
            key_vault::decrypt_key(&enc_secret),
        ) {
            (Ok(key), Ok(secret)) => {
                info!(api_key = %key_vault::mask_key(&key), "broker credentials decrypted from vault");
                return (key, secret);
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to decrypt broker credentials — falling back to plain env");
            }
        }
    }

    (
        std::env::var("BROKER_API_KEY").unwrap_or_default(),
        std::env::var("BROKER_API_SECRET").unwrap_or_default(),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian execution core starting up");

    // ── 2. Desk configuration ────────────────────────────────────────────
    let config_path = PathBuf::from(
        std::env::var("MERIDIAN_CONFIG_PATH").unwrap_or_else(|_| "desk_config.json".to_string()),
    );
    let config = DeskConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load desk config, using defaults");
        DeskConfig::default()
    });

    if config.active_risk_config().is_none() {
        warn!("no active risk configuration — every trade will be rejected until one is activated");
    }
    info!(
        strategies = config.strategies.len(),
        accounts = config.accounts.len(),
        kelly_mode = %config.kelly_mode,
        "desk config ready"
    );

    // ── 3. Ledger ────────────────────────────────────────────────────────
    let ledger_path =
        std::env::var("MERIDIAN_LEDGER_PATH").unwrap_or_else(|_| "ledger.jsonl".to_string());
    let ledger = Arc::new(LedgerStore::open(&ledger_path)?);
    info!(path = %ledger_path, trades = ledger.len(), "ledger opened");

    // ── 4. Broker client & notifier ──────────────────────────────────────
    let (api_key, api_secret) = broker_credentials();
    let base_url = std::env::var("BROKER_BASE_URL")
        .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());
    let broker_client: Arc<dyn BrokerClient> =
        Arc::new(RestBrokerClient::new(api_key, api_secret, base_url));

    let notifier = Arc::new(Notifier::from_env());
    if !notifier.is_configured() {
        info!("notifier webhook not configured — alerts disabled");
    }

    // ── 5. Shared state ──────────────────────────────────────────────────
    let bars = Arc::new(BarStore::new(500));
    let state = Arc::new(AppState::new(
        config,
        config_path,
        ledger.clone(),
        bars,
        broker_client,
        notifier.clone(),
    ));

    // ── 6. HTTP ingress ──────────────────────────────────────────────────
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let api_state = state.clone();
    let api_addr = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = tokio::net::TcpListener::bind(&api_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %api_addr, "webhook API listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 7. Strategy runner ───────────────────────────────────────────────
    tokio::spawn(runner::run_strategy_loop(state.clone()));

    // ── 8. Risk sweeps ───────────────────────────────────────────────────
    tokio::spawn(evaluation::run_drawdown_sweep_loop(state.clone()));
    tokio::spawn(evaluation::run_eod_report_loop(state.clone()));

    // ── 9. Broker fill-update listener ───────────────────────────────────
    match std::env::var("BROKER_STREAM_URL") {
        Ok(stream_url) if !stream_url.is_empty() => {
            tokio::spawn(broker::stream::run_with_reconnect(
                stream_url,
                ledger,
                notifier,
            ));
        }
        _ => {
            warn!("BROKER_STREAM_URL not set — fill updates disabled, relying on submit-time acks");
        }
    }

    info!("all subsystems running — Ctrl+C to stop");

    // ── 10. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    state.save_config();
    info!("Meridian execution core shut down complete");
    Ok(())
}
