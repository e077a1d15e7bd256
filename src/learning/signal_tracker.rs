//! Two-dimensional signal performance tracker
//!
//! Counts wins and losses for every (source_tier, info_type) combo per
//! market type, both when the combo was present and when it was absent.
//! Correctness here uses the ADJUSTED prediction: the tracker scores the
//! system's final output, not the model's raw guess.

use crate::types::{InfoType, MarketType, SignalTracker, SourceTier, TradeRecord};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignalTrackerManager {
    trackers: HashMap<(SourceTier, InfoType, MarketType), SignalTracker>,
}

impl SignalTrackerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(trackers: HashMap<(SourceTier, InfoType, MarketType), SignalTracker>) -> Self {
        Self { trackers }
    }

    pub fn trackers(&self) -> impl Iterator<Item = &SignalTracker> {
        self.trackers.values()
    }

    pub fn get(
        &self,
        tier: SourceTier,
        info: InfoType,
        market_type: MarketType,
    ) -> Option<&SignalTracker> {
        self.trackers.get(&(tier, info, market_type))
    }

    /// Every (tier, info_type) combo ever observed for this market type
    pub fn observed_combos(&self, market_type: MarketType) -> HashSet<(SourceTier, InfoType)> {
        self.trackers
            .keys()
            .filter(|(_, _, mt)| *mt == market_type)
            .map(|(tier, info, _)| (*tier, *info))
            .collect()
    }

    pub fn weight(&self, tier: SourceTier, info: InfoType, market_type: MarketType) -> f64 {
        self.trackers
            .get(&(tier, info, market_type))
            .map(|t| t.weight())
            .unwrap_or(1.0)
    }

    fn ensure(
        &mut self,
        tier: SourceTier,
        info: InfoType,
        market_type: MarketType,
    ) -> &mut SignalTracker {
        self.trackers
            .entry((tier, info, market_type))
            .or_insert_with(|| SignalTracker::new(tier, info, market_type))
    }

    /// Fold a resolved trade into every combo observed for its market type
    pub fn update_from_resolution(&mut self, record: &TradeRecord) {
        let Some(outcome) = record.actual_outcome else {
            return;
        };
        if record.voided {
            return;
        }

        let predicted_yes = record.adjusted_probability > 0.5;
        let was_correct = predicted_yes == outcome;

        let present: HashSet<(SourceTier, InfoType)> = record
            .signal_tags
            .iter()
            .map(|tag| (tag.source_tier, tag.info_type))
            .collect();

        let mut combos = self.observed_combos(record.market_type);
        combos.extend(present.iter().copied());

        for (tier, info) in combos {
            let tracker = self.ensure(tier, info, record.market_type);
            let is_present = present.contains(&(tier, info));
            match (is_present, was_correct) {
                (true, true) => tracker.present_winning += 1,
                (true, false) => tracker.present_losing += 1,
                (false, true) => tracker.absent_winning += 1,
                (false, false) => tracker.absent_losing += 1,
            }
        }
    }

    pub fn clear(&mut self) {
        self.trackers.clear();
    }
}
