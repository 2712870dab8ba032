// =============================================================================
// Portfolio Allocator — expectancy-weighted capital split across strategies
// =============================================================================
//
// Every active strategy starts from a base score of 1.0 so it always receives
// some capital; a proven positive statistical edge (expectancy over resolved
// trades) adds a bonus on top. Scores are normalised to weights summing to 1,
// so the allocations always add back up to the total equity.
// =============================================================================

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::config::StrategyDef;
use crate::kelly::KellyEngine;
use crate::ledger::LedgerStore;

pub struct PortfolioAllocator {
    total_equity: Decimal,
}

impl PortfolioAllocator {
    pub fn new(total_equity: Decimal) -> Self {
        Self { total_equity }
    }

    /// Map each active strategy name to its allocated capital.
    ///
    /// Strategies with fewer than the statistical baseline of resolved trades
    /// contribute only their base score (no performance bonus either way).
    pub fn strategy_allocations(
        &self,
        strategies: &[&StrategyDef],
        ledger: &LedgerStore,
        kelly: &KellyEngine,
    ) -> HashMap<String, Decimal> {
        let active: Vec<&&StrategyDef> = strategies.iter().filter(|s| s.is_active).collect();
        if active.is_empty() {
            return HashMap::new();
        }

        let mut scores: Vec<(String, Decimal)> = Vec::with_capacity(active.len());
        let mut total_score = Decimal::ZERO;

        for strat in &active {
            // Base score guarantees every active strategy a positive share.
            let mut score = dec!(1.0);

            if let Some(stats) = kelly.historical_performance(ledger, &strat.name) {
                let expectancy = stats.expectancy();
                if expectancy > 0.0 {
                    if let Some(bonus) = Decimal::from_f64_retain(expectancy) {
                        score += bonus;
                    }
                }
                debug!(
                    strategy = %strat.name,
                    win_rate = stats.win_rate,
                    expectancy,
                    "allocator performance metrics"
                );
            }

            total_score += score;
            scores.push((strat.name.clone(), score));
        }

        let mut allocations = HashMap::with_capacity(scores.len());
        for (name, score) in scores {
            let weight = score / total_score;
            let allocated = self.total_equity * weight;
            info!(
                strategy = %name,
                weight_pct = %(weight * Decimal::ONE_HUNDRED).round_dp(1),
                allocated = %allocated.round_dp(2),
                "capital allocated"
            );
            allocations.insert(name, allocated);
        }

        allocations
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kelly::KellyMode;
    use crate::ledger::Trade;
    use crate::types::{Side, TradeStatus};

    fn def(name: &str, active: bool) -> StrategyDef {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "is_active": active,
        }))
        .unwrap()
    }

    fn seed_winning_history(ledger: &LedgerStore, strategy: &str) {
        // 8 wins of $100, 2 losses of $50: expectancy = 0.8*100 - 0.2*50 = 70.
        for pnl in [100, 100, 100, 100, 100, 100, 100, 100, -50, -50] {
            let mut t = Trade::new("AAPL", Side::Sell, dec!(1), strategy);
            t.status = TradeStatus::Filled;
            t.realized_pnl = Some(Decimal::from(pnl));
            ledger.insert(t);
        }
    }

    #[test]
    fn equal_split_without_history() {
        let ledger = LedgerStore::in_memory();
        let kelly = KellyEngine::new(KellyMode::Half);
        let a = def("alpha", true);
        let b = def("beta", true);

        let allocator = PortfolioAllocator::new(dec!(100000));
        let allocations = allocator.strategy_allocations(&[&a, &b], &ledger, &kelly);

        assert_eq!(allocations[&"alpha".to_string()], dec!(50000));
        assert_eq!(allocations[&"beta".to_string()], dec!(50000));
    }

    #[test]
    fn allocations_sum_to_total_equity() {
        let ledger = LedgerStore::in_memory();
        let kelly = KellyEngine::new(KellyMode::Half);
        seed_winning_history(&ledger, "alpha");
        let a = def("alpha", true);
        let b = def("beta", true);
        let c = def("gamma", true);

        let total = dec!(100000);
        let allocations =
            PortfolioAllocator::new(total).strategy_allocations(&[&a, &b, &c], &ledger, &kelly);

        let sum: Decimal = allocations.values().copied().sum();
        assert!((sum - total).abs() < dec!(0.0001), "sum was {sum}");
    }

    #[test]
    fn proven_edge_earns_larger_share() {
        let ledger = LedgerStore::in_memory();
        let kelly = KellyEngine::new(KellyMode::Half);
        seed_winning_history(&ledger, "alpha");
        let a = def("alpha", true);
        let b = def("beta", true);

        let allocations =
            PortfolioAllocator::new(dec!(100000)).strategy_allocations(&[&a, &b], &ledger, &kelly);

        assert!(allocations[&"alpha".to_string()] > allocations[&"beta".to_string()]);
        // Every active strategy still gets a strictly positive share.
        assert!(allocations[&"beta".to_string()] > Decimal::ZERO);
    }

    #[test]
    fn inactive_strategies_excluded() {
        let ledger = LedgerStore::in_memory();
        let kelly = KellyEngine::new(KellyMode::Half);
        let a = def("alpha", true);
        let b = def("beta", false);

        let allocations =
            PortfolioAllocator::new(dec!(100000)).strategy_allocations(&[&a, &b], &ledger, &kelly);

        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[&"alpha".to_string()], dec!(100000));
    }

    #[test]
    fn empty_strategy_set_yields_empty_map() {
        let ledger = LedgerStore::in_memory();
        let kelly = KellyEngine::new(KellyMode::Half);
        let allocations =
            PortfolioAllocator::new(dec!(100000)).strategy_allocations(&[], &ledger, &kelly);
        assert!(allocations.is_empty());
    }
}
