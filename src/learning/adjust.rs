//! Five-step adjustment pipeline
//!
//! Turns the model's raw output into the values the decision engine trades
//! on. The steps run in a fixed order: confidence calibration, signal-type
//! weighting, probability shrinkage, market-type edge penalty, temporal
//! decay. The penalty raises the edge bar downstream; it never touches the
//! probability itself.

use crate::learning::LearningState;
use crate::types::{InfoType, MarketType, SignalTag};
use chrono::{DateTime, Utc};

/// Default signal age assumed when no tag carries a timestamp
const UNKNOWN_AGE_HOURS: f64 = 2.0;

/// Output of the adjustment pipeline, with per-step deltas for the audit row
#[derive(Debug, Clone, Copy)]
pub struct Adjustment {
    pub probability: f64,
    pub confidence: f64,
    pub extra_edge: f64,
    pub calibration_delta: f64,
    pub signal_weight_delta: f64,
}

/// Run the full pipeline against a consistent learning-state snapshot
pub fn adjust_prediction(
    raw_probability: f64,
    raw_confidence: f64,
    market_type: MarketType,
    signal_tags: &[SignalTag],
    learning: &LearningState,
    now: DateTime<Utc>,
) -> Adjustment {
    // Step 1: Bayesian calibration of confidence
    let correction = learning.calibration.correction_for(raw_confidence);
    let mut confidence = (raw_confidence + correction).clamp(0.50, 0.99);
    let calibration_delta = confidence - raw_confidence;

    // Step 2: signal-type weighting of confidence
    let mut signal_weight_delta = 0.0;
    if !signal_tags.is_empty() {
        let mean_weight = signal_tags
            .iter()
            .map(|tag| {
                learning
                    .signal_trackers
                    .weight(tag.source_tier, tag.info_type, market_type)
            })
            .sum::<f64>()
            / signal_tags.len() as f64;
        let before = confidence;
        confidence = (confidence + (mean_weight - 1.0) * 0.1).clamp(0.50, 0.99);
        signal_weight_delta = confidence - before;
    }

    // Step 3: probability shrinkage around 0.50, symmetric on both sides
    let bucket = learning.calibration.find_bucket(raw_confidence);
    let mut probability = raw_probability;
    if bucket.sample_count() >= 10 && bucket.midpoint() > 0.0 {
        let shrinkage = bucket.expected_accuracy() / bucket.midpoint();
        probability = 0.5 + (raw_probability - 0.5) * shrinkage;
    }
    probability = probability.clamp(0.01, 0.99);

    // Step 4: market-type edge penalty, consumed at the decision stage
    let extra_edge = learning.market_types.edge_adjustment(market_type);

    // Step 5: temporal decay of confidence
    let mut freshest_age: Option<f64> = None;
    let mut has_recent_i1 = false;
    for tag in signal_tags {
        if let Some(ts) = tag.timestamp {
            let age_hours = (now - ts).num_seconds().max(0) as f64 / 3600.0;
            freshest_age = Some(freshest_age.map_or(age_hours, |a: f64| a.min(age_hours)));
            if tag.info_type == InfoType::I1 && age_hours < 0.5 {
                has_recent_i1 = true;
            }
        }
    }
    let freshest_age = freshest_age.unwrap_or(UNKNOWN_AGE_HOURS);

    if has_recent_i1 {
        confidence = (confidence * 1.05).min(0.99);
    } else if freshest_age > 1.0 {
        let decay = (1.0 - 0.05 * (freshest_age - 1.0)).max(0.85);
        confidence = (confidence * decay).max(0.50);
    }

    Adjustment {
        probability,
        confidence,
        extra_edge,
        calibration_delta,
        signal_weight_delta,
    }
}
