//! Per-market-type performance tracking
//!
//! Updates use the ADJUSTED Brier score: this layer measures the whole
//! system (model + adjustments), not the model alone.

use crate::types::{
    MarketType, MarketTypePerformance, TradeRecord, BRIER_HISTORY_AFTER_SWAP, BRIER_HISTORY_LIMIT,
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketTypeManager {
    performances: HashMap<MarketType, MarketTypePerformance>,
}

impl MarketTypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(performances: HashMap<MarketType, MarketTypePerformance>) -> Self {
        Self { performances }
    }

    pub fn performances(&self) -> impl Iterator<Item = &MarketTypePerformance> {
        self.performances.values()
    }

    pub fn get(&self, market_type: MarketType) -> Option<&MarketTypePerformance> {
        self.performances.get(&market_type)
    }

    fn ensure(&mut self, market_type: MarketType) -> &mut MarketTypePerformance {
        self.performances
            .entry(market_type)
            .or_insert_with(|| MarketTypePerformance::new(market_type))
    }

    /// Fold a resolved trade into the per-type stats. Executed trades add
    /// realized pnl; skips add counterfactual pnl and an observed-skip count.
    pub fn update_from_resolution(&mut self, record: &TradeRecord, counterfactual_pnl: f64) {
        if record.actual_outcome.is_none() || record.voided {
            return;
        }

        let perf = self.ensure(record.market_type);
        perf.total_trades += 1;

        if let Some(brier) = record.brier_adjusted {
            perf.brier_scores.push(brier);
            if perf.brier_scores.len() > BRIER_HISTORY_LIMIT {
                let excess = perf.brier_scores.len() - BRIER_HISTORY_LIMIT;
                perf.brier_scores.drain(..excess);
            }
        }

        if record.is_executed() {
            perf.total_pnl += record.pnl.unwrap_or(0.0);
        } else {
            perf.total_observed_skips += 1;
            perf.counterfactual_pnl += counterfactual_pnl;
        }
    }

    pub fn edge_adjustment(&self, market_type: MarketType) -> f64 {
        self.performances
            .get(&market_type)
            .map(|p| p.edge_adjustment())
            .unwrap_or(0.0)
    }

    pub fn should_disable(&self, market_type: MarketType) -> bool {
        self.performances
            .get(&market_type)
            .map(|p| p.should_disable())
            .unwrap_or(false)
    }

    /// On model swap: keep only the most recent Brier scores per type
    pub fn dampen_on_swap(&mut self) {
        for perf in self.performances.values_mut() {
            if perf.brier_scores.len() > BRIER_HISTORY_AFTER_SWAP {
                let excess = perf.brier_scores.len() - BRIER_HISTORY_AFTER_SWAP;
                perf.brier_scores.drain(..excess);
            }
        }
    }

    pub fn clear(&mut self) {
        self.performances.clear();
    }
}
