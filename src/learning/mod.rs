//! Three-layer statistical learning system
//!
//! Calibration (RAW inputs), market-type performance and the signal tracker
//! (both ADJUSTED inputs), plus the adjustment pipeline they feed. The whole
//! state is owned by one logical updater: scans read a cloned snapshot, only
//! the resolution path mutates.

pub mod adjust;
pub mod calibration;
pub mod market_type;
pub mod signal_tracker;
pub mod swap;

pub use adjust::{adjust_prediction, Adjustment};
pub use calibration::CalibrationManager;
pub use market_type::MarketTypeManager;
pub use signal_tracker::SignalTrackerManager;
pub use swap::{handle_model_swap, recalculate_learning, void_trade};

use crate::engine::resolution::hypothetical_pnl;
use crate::error::Result;
use crate::storage::Database;
use crate::types::TradeRecord;
use chrono::{DateTime, Utc};

/// The three learning managers, loaded from the store at startup and
/// persisted after each resolution
#[derive(Debug, Clone, PartialEq)]
pub struct LearningState {
    pub calibration: CalibrationManager,
    pub market_types: MarketTypeManager,
    pub signal_trackers: SignalTrackerManager,
}

impl LearningState {
    pub fn new() -> Self {
        Self {
            calibration: CalibrationManager::new(),
            market_types: MarketTypeManager::new(),
            signal_trackers: SignalTrackerManager::new(),
        }
    }

    pub async fn load(db: &Database) -> Result<Self> {
        Ok(Self {
            calibration: CalibrationManager::from_buckets(db.load_calibration().await?),
            market_types: MarketTypeManager::from_map(db.load_market_type_performance().await?),
            signal_trackers: SignalTrackerManager::from_map(db.load_signal_trackers().await?),
        })
    }

    pub fn reset(&mut self) {
        self.calibration.reset_to_priors();
        self.market_types.clear();
        self.signal_trackers.clear();
    }

    /// Fold one resolved, non-void record into all three layers.
    /// Brier scores must already be set (see [`ensure_brier_scores`]).
    pub fn apply_resolution(&mut self, record: &TradeRecord, now: DateTime<Utc>) {
        if record.actual_outcome.is_none() || record.voided {
            return;
        }

        // Layer 1: calibration, routed and scored by RAW values
        self.calibration.update_from_resolution(record, now);

        // Layer 2: market type, scored by ADJUSTED Brier
        let counterfactual = if record.is_executed() {
            0.0
        } else {
            hypothetical_pnl(record)
        };
        self.market_types.update_from_resolution(record, counterfactual);

        // Layer 3: signal tracker, correctness by ADJUSTED prediction
        self.signal_trackers.update_from_resolution(record);
    }
}

impl Default for LearningState {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill in both Brier scores from the resolved outcome when missing
pub fn ensure_brier_scores(record: &mut TradeRecord) {
    let Some(outcome) = record.actual_outcome else {
        return;
    };
    let actual = if outcome { 1.0 } else { 0.0 };
    if record.brier_raw.is_none() {
        record.brier_raw = Some((record.raw_probability - actual).powi(2));
    }
    if record.brier_adjusted.is_none() {
        record.brier_adjusted = Some((record.adjusted_probability - actual).powi(2));
    }
}

/// Handle a freshly resolved record: compute Brier scores, update all three
/// layers, and persist the learning state together with the record in one
/// transaction.
pub async fn on_trade_resolved(
    record: &mut TradeRecord,
    learning: &mut LearningState,
    db: &Database,
) -> Result<()> {
    if record.voided || record.actual_outcome.is_none() {
        return Ok(());
    }

    ensure_brier_scores(record);
    learning.apply_resolution(record, Utc::now());
    db.persist_learning(learning, Some(record)).await?;

    tracing::info!(
        market_id = %record.market_id,
        brier_raw = ?record.brier_raw,
        brier_adjusted = ?record.brier_adjusted,
        "learning updated"
    );
    Ok(())
}
