// =============================================================================
// Strategy Runner — periodic evaluation of active strategies
// =============================================================================
//
// Every tick, for each active strategy:
//   1. Split live equity across strategies (expectancy-weighted allocator).
//   2. Generate an entry signal per configured symbol over recent bars.
//   3. Run the AI / fundamental / regime filters.
//   4. Size the entry (heuristic, then Kelly override when history exists).
//   5. Evaluate exits for symbols with an open net position.
//   6. Dispatch actionable signals through the block executor.
//
// Dry-run mode logs what would have been dispatched without trading.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::allocator::PortfolioAllocator;
use crate::app_state::AppState;
use crate::config::{DeskConfig, StrategyDef};
use crate::kelly::KellyEngine;
use crate::market_data::BarKey;
use crate::risk::check_market_hours;
use crate::strategies::{
    apply_ai_filters, apply_fundamental_filters, apply_kelly_sizing, apply_regime_filters,
    build_strategy, TradingStrategy, SUPPORTED_STRATEGY_TYPES,
};
use crate::types::{AssetClass, SignalAction};

/// Equity assumed when the broker account endpoint is unreachable.
const FALLBACK_EQUITY: Decimal = dec!(100000);

/// Minimum bars required before a symbol is evaluated.
const MIN_BARS: usize = 50;

/// Bars handed to each strategy per evaluation.
const BAR_WINDOW: usize = 250;

/// Run one full pass over the active strategies.
pub async fn run_strategies_once(state: &Arc<AppState>, dry_run: bool) {
    let config = state.config.read().clone();

    if config.active_risk_config().is_none() {
        state.alert_missing_risk_config().await;
    }

    let active: Vec<&StrategyDef> = config.active_strategies();
    if active.is_empty() {
        debug!("no active strategies");
        return;
    }

    let total_equity = match state.broker.get_account().await {
        Ok(account) => account.equity,
        Err(e) => {
            warn!(error = %e, "broker equity fetch failed — using fallback for allocation");
            FALLBACK_EQUITY
        }
    };

    let kelly = KellyEngine::new(config.kelly_mode);
    let allocations =
        PortfolioAllocator::new(total_equity).strategy_allocations(&active, &state.ledger, &kelly);

    for def in active {
        let allocated = allocations
            .get(&def.name)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if allocated <= Decimal::ZERO {
            warn!(strategy = %def.name, "no capital allocated — skipped");
            continue;
        }
        run_strategy(state, &config, def, allocated, &kelly, dry_run).await;
    }
}

async fn run_strategy(
    state: &Arc<AppState>,
    config: &DeskConfig,
    def: &StrategyDef,
    allocated_equity: Decimal,
    kelly: &KellyEngine,
    dry_run: bool,
) {
    let Some(strategy) = build_strategy(def) else {
        warn!(
            strategy = %def.name,
            strategy_type = ?def.strategy_type(),
            supported = ?SUPPORTED_STRATEGY_TYPES,
            "no or invalid strategy_type in custom_params"
        );
        return;
    };

    if def.symbols.is_empty() {
        warn!(strategy = %def.name, "no symbols configured");
        return;
    }

    for ticker in &def.symbols {
        let key = BarKey::new(ticker.clone(), def.timeframe.clone());
        let bars = state.bars.bars(&key, BAR_WINDOW);
        if bars.len() < MIN_BARS {
            debug!(
                strategy = %def.name,
                %ticker,
                bars = bars.len(),
                "skip — insufficient bar history"
            );
            continue;
        }

        // ── Entry ───────────────────────────────────────────────────────
        let mut signal = strategy.generate_signal(ticker, &bars);
        signal = apply_ai_filters(signal, def);
        signal = apply_fundamental_filters(signal, def);
        signal = apply_regime_filters(signal, def, &bars);

        if signal.is_actionable() {
            if let Some(price) = signal.price {
                signal.quantity = strategy.calculate_position_size(ticker, price, allocated_equity);
            }
            signal = apply_kelly_sizing(signal, def, allocated_equity, &state.ledger, kelly);

            if signal.quantity <= Decimal::ZERO {
                debug!(strategy = %def.name, %ticker, "entry zero-sized — skipped");
            } else if dry_run {
                info!(
                    strategy = %def.name,
                    %ticker,
                    action = %signal.action,
                    qty = %signal.quantity,
                    price = ?signal.price,
                    reason = %signal.reason,
                    "DRY RUN — signal not dispatched"
                );
            } else {
                dispatch(state, config, &signal).await;
            }
        } else {
            debug!(strategy = %def.name, %ticker, reason = %signal.reason, "hold");
        }

        // ── Exit for an open position ───────────────────────────────────
        check_position_exit(state, config, def, strategy.as_ref(), ticker, &bars, dry_run).await;
    }
}

/// Evaluate the strategy's exit ladder for a symbol the ledger shows an open
/// net position in.
async fn check_position_exit(
    state: &Arc<AppState>,
    config: &DeskConfig,
    def: &StrategyDef,
    strategy: &dyn TradingStrategy,
    ticker: &str,
    bars: &[crate::market_data::OhlcvBar],
    dry_run: bool,
) {
    let open_qty = state.ledger.net_position_qty(ticker);
    if open_qty <= Decimal::ZERO {
        return;
    }
    let Some(entry_price) = state.ledger.average_cost_basis(ticker, None) else {
        return;
    };
    let Some(current_price) = bars
        .last()
        .and_then(|b| Decimal::from_f64_retain(b.close))
    else {
        return;
    };

    let mut signal = strategy.check_exit(ticker, entry_price, current_price, bars);
    if signal.action != SignalAction::Sell {
        return;
    }
    signal.quantity = open_qty;
    signal.strategy_name = def.name.clone();

    if dry_run {
        info!(
            strategy = %def.name,
            %ticker,
            qty = %open_qty,
            reason = %signal.reason,
            "DRY RUN — exit not dispatched"
        );
        return;
    }

    dispatch(state, config, &signal).await;
}

async fn dispatch(state: &Arc<AppState>, config: &DeskConfig, signal: &crate::types::Signal) {
    let trades = state.executor.execute_signal(config, signal, None).await;
    let statuses: Vec<String> = trades
        .iter()
        .map(|t| {
            let account = if t.broker_account_id.is_empty() {
                "default"
            } else {
                t.broker_account_id.as_str()
            };
            format!("{account}:{}", t.status)
        })
        .collect();
    info!(
        strategy = %signal.strategy_name,
        ticker = %signal.ticker,
        action = %signal.action,
        qty = %signal.quantity,
        results = ?statuses,
        "signal dispatched"
    );
}

/// Whether the runner should evaluate at all right now: always when a
/// non-stock strategy is active (crypto and futures trade around the clock),
/// otherwise only inside US equity market hours.
pub fn should_run(config: &DeskConfig, now: chrono::DateTime<chrono::Utc>) -> bool {
    let active = config.active_strategies();
    if active.is_empty() {
        return false;
    }
    if active.iter().any(|s| s.asset_class != AssetClass::Stocks) {
        return true;
    }
    // Any plain equity symbol stands in for the session check.
    check_market_hours("SPY", now).is_ok()
}

/// The periodic runner task: one pass per minute while the market allows it.
/// `MERIDIAN_DRY_RUN=1` evaluates and logs signals without dispatching.
pub async fn run_strategy_loop(state: Arc<AppState>) {
    let dry_run = std::env::var("MERIDIAN_DRY_RUN")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    info!(dry_run, "strategy runner starting");

    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
    loop {
        interval.tick().await;

        let gate_open = {
            let config = state.config.read();
            should_run(&config, chrono::Utc::now())
        };
        if !gate_open {
            debug!("outside trading window — runner idle");
            continue;
        }

        run_strategies_once(&state, dry_run).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
