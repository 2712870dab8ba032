// =============================================================================
// Desk Configuration — risk profiles, strategy definitions, routing settings
// =============================================================================
//
// Configuration-driven: the risk gate and the executor read these values on
// every signal, never from hardcoded constants and never through a cache that
// can go stale past one tick. Persistence uses the atomic tmp + rename
// pattern to prevent corruption on crash. All fields carry serde defaults so
// that adding new fields never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::accounts::PropFirmAccount;
use crate::kelly::KellyMode;
use crate::types::AssetClass;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

pub fn default_true() -> bool {
    true
}

fn default_profile_name() -> String {
    "default".to_string()
}

fn default_max_daily_drawdown_pct() -> Decimal {
    dec!(5)
}

fn default_max_total_drawdown_pct() -> Decimal {
    dec!(10)
}

fn default_max_position_size_pct() -> Decimal {
    dec!(5)
}

fn default_max_open_positions() -> u32 {
    10
}

fn default_max_daily_trades() -> u32 {
    50
}

fn default_daily_loss_limit() -> Decimal {
    dec!(1000)
}

fn default_position_size_pct() -> Decimal {
    dec!(2)
}

fn default_max_positions() -> u32 {
    5
}

fn default_stop_loss_pct() -> Decimal {
    dec!(2)
}

fn default_take_profit_pct() -> Decimal {
    dec!(4)
}

fn default_ai_model() -> String {
    "none".to_string()
}

fn default_ai_confidence_threshold() -> f64 {
    0.70
}

fn default_timeframe() -> String {
    "1d".to_string()
}

fn default_routing_tag() -> String {
    "PFRM_IB".to_string()
}

fn default_webhook_rate_limit() -> u32 {
    60
}

fn generate_strategy_id() -> String {
    format!("stg_{}", Uuid::new_v4().simple())
}

// =============================================================================
// RiskConfig
// =============================================================================

/// Risk parameters for a trading profile. Exactly one profile should be
/// active; the first active record wins when several are flagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_profile_name")]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// When true, ALL trading is halted immediately.
    #[serde(default)]
    pub kill_switch_active: bool,

    // Drawdown limits
    #[serde(default = "default_max_daily_drawdown_pct")]
    pub max_daily_drawdown_pct: Decimal,
    #[serde(default = "default_max_total_drawdown_pct")]
    pub max_total_drawdown_pct: Decimal,

    // Position limits
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: Decimal,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,

    // Daily limits
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    /// Maximum dollar loss per day before auto-stop.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            name: default_profile_name(),
            is_active: true,
            kill_switch_active: false,
            max_daily_drawdown_pct: default_max_daily_drawdown_pct(),
            max_total_drawdown_pct: default_max_total_drawdown_pct(),
            max_position_size_pct: default_max_position_size_pct(),
            max_open_positions: default_max_open_positions(),
            max_daily_trades: default_max_daily_trades(),
            daily_loss_limit: default_daily_loss_limit(),
        }
    }
}

// =============================================================================
// StrategyDef
// =============================================================================

/// A configurable trading strategy definition. The concrete behaviour is
/// selected by `custom_params.strategy_type` through the strategy registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDef {
    #[serde(default = "generate_strategy_id")]
    pub strategy_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub asset_class: AssetClass,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Ticker symbols this strategy trades.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Prop-firm account numbers this strategy routes to. Empty means the
    /// default (master) broker account.
    #[serde(default)]
    pub account_numbers: Vec<String>,

    // Position management
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: Decimal,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,

    // AI filter configuration
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
    #[serde(default = "default_ai_confidence_threshold")]
    pub ai_confidence_threshold: f64,

    /// Strategy-specific parameter bag. Must carry `strategy_type`.
    #[serde(default)]
    pub custom_params: serde_json::Value,
}

impl StrategyDef {
    /// The registry selector, if configured.
    pub fn strategy_type(&self) -> Option<&str> {
        self.custom_params.get("strategy_type").and_then(|v| v.as_str())
    }
}

// =============================================================================
// DeskConfig
// =============================================================================

/// Top-level desk configuration: risk profiles, strategy definitions, linked
/// prop-firm accounts, and routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskConfig {
    #[serde(default = "default_risk_configs")]
    pub risk_configs: Vec<RiskConfig>,
    #[serde(default)]
    pub strategies: Vec<StrategyDef>,
    #[serde(default)]
    pub accounts: Vec<PropFirmAccount>,

    /// Institutional routing prefix agreed with the clearing firm. Embedded
    /// in every block order's client_order_id for volume-rebate attribution.
    #[serde(default = "default_routing_tag")]
    pub ib_routing_tag: String,

    /// Kelly scaling mode applied by the strategy runner.
    #[serde(default)]
    pub kelly_mode: KellyMode,

    /// Webhook ingress throttle, requests per source per minute.
    #[serde(default = "default_webhook_rate_limit")]
    pub webhook_rate_limit_per_min: u32,
}

fn default_risk_configs() -> Vec<RiskConfig> {
    vec![RiskConfig::default()]
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            risk_configs: default_risk_configs(),
            strategies: Vec::new(),
            accounts: Vec::new(),
            ib_routing_tag: default_routing_tag(),
            kelly_mode: KellyMode::default(),
            webhook_rate_limit_per_min: default_webhook_rate_limit(),
        }
    }
}

impl DeskConfig {
    /// The active risk profile — first record flagged `is_active`.
    pub fn active_risk_config(&self) -> Option<&RiskConfig> {
        self.risk_configs.iter().find(|c| c.is_active)
    }

    /// All strategy definitions currently enabled.
    pub fn active_strategies(&self) -> Vec<&StrategyDef> {
        self.strategies.iter().filter(|s| s.is_active).collect()
    }

    /// Find a strategy definition by name.
    pub fn strategy_by_name(&self, name: &str) -> Option<&StrategyDef> {
        self.strategies.iter().find(|s| s.name == name)
    }

    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read desk config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse desk config from {}", path.display()))?;

        info!(
            path = %path.display(),
            risk_profiles = config.risk_configs.len(),
            strategies = config.strategies.len(),
            accounts = config.accounts.len(),
            "desk config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration using an atomic write (tmp, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise desk config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "desk config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_active_profile() {
        let cfg = DeskConfig::default();
        let active = cfg.active_risk_config().unwrap();
        assert_eq!(active.name, "default");
        assert!(!active.kill_switch_active);
        assert_eq!(active.max_daily_trades, 50);
        assert_eq!(active.max_open_positions, 10);
        assert_eq!(active.daily_loss_limit, dec!(1000));
    }

    #[test]
    fn first_active_profile_wins() {
        let mut cfg = DeskConfig::default();
        cfg.risk_configs[0].is_active = false;
        cfg.risk_configs.push(RiskConfig {
            name: "aggressive".into(),
            ..RiskConfig::default()
        });
        cfg.risk_configs.push(RiskConfig {
            name: "backup".into(),
            ..RiskConfig::default()
        });
        assert_eq!(cfg.active_risk_config().unwrap().name, "aggressive");
    }

    #[test]
    fn no_active_profile_yields_none() {
        let mut cfg = DeskConfig::default();
        cfg.risk_configs[0].is_active = false;
        assert!(cfg.active_risk_config().is_none());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: DeskConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.risk_configs.len(), 1);
        assert_eq!(cfg.ib_routing_tag, "PFRM_IB");
        assert_eq!(cfg.webhook_rate_limit_per_min, 60);
        assert!(cfg.strategies.is_empty());
    }

    #[test]
    fn strategy_def_reads_type_from_params() {
        let json = serde_json::json!({
            "name": "momentum_v1",
            "is_active": true,
            "symbols": ["AAPL", "MSFT"],
            "custom_params": { "strategy_type": "momentum_breakout", "sma_period": 20 }
        });
        let def: StrategyDef = serde_json::from_value(json).unwrap();
        assert_eq!(def.strategy_type(), Some("momentum_breakout"));
        assert_eq!(def.stop_loss_pct, dec!(2));
        assert_eq!(def.ai_model, "none");
    }

    #[test]
    fn roundtrip_serialisation() {
        let mut cfg = DeskConfig::default();
        cfg.strategies.push(StrategyDef {
            strategy_id: generate_strategy_id(),
            name: "momentum_v1".into(),
            description: String::new(),
            is_active: true,
            asset_class: AssetClass::Stocks,
            timeframe: "1d".into(),
            symbols: vec!["AAPL".into()],
            account_numbers: vec!["ACCT-A".into()],
            position_size_pct: dec!(2),
            max_positions: 5,
            stop_loss_pct: dec!(3),
            take_profit_pct: dec!(6),
            ai_model: "none".into(),
            ai_confidence_threshold: 0.7,
            custom_params: serde_json::json!({ "strategy_type": "momentum_breakout" }),
        });

        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: DeskConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg2.strategies.len(), 1);
        assert_eq!(cfg2.strategies[0].stop_loss_pct, dec!(3));
        assert_eq!(
            cfg2.strategies[0].strategy_type(),
            Some("momentum_breakout")
        );
    }
}
