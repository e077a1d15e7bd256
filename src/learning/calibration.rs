//! Bayesian confidence calibration
//!
//! Six Beta-posterior buckets over the confidence axis. Updates use the
//! model's RAW probability and confidence; feeding adjusted values back in
//! would drive the posterior to a fixed point unrelated to model accuracy.

use crate::types::{CalibrationBucket, TradeRecord, CALIBRATION_BUCKET_RANGES};
use chrono::{DateTime, Utc};

const RECENCY_DECAY_PER_DAY: f64 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationManager {
    buckets: Vec<CalibrationBucket>,
}

impl CalibrationManager {
    pub fn new() -> Self {
        Self {
            buckets: CALIBRATION_BUCKET_RANGES
                .iter()
                .map(|&r| CalibrationBucket::new(r))
                .collect(),
        }
    }

    pub fn from_buckets(buckets: Vec<CalibrationBucket>) -> Self {
        if buckets.len() == CALIBRATION_BUCKET_RANGES.len() {
            Self { buckets }
        } else {
            Self::new()
        }
    }

    pub fn buckets(&self) -> &[CalibrationBucket] {
        &self.buckets
    }

    /// The unique bucket containing `confidence`. Lower bound inclusive,
    /// last bucket closed at 1.00; out-of-range confidences clamp to the
    /// nearest bucket.
    pub fn find_bucket(&self, confidence: f64) -> &CalibrationBucket {
        for bucket in &self.buckets {
            if bucket.lo <= confidence && confidence < bucket.hi {
                return bucket;
            }
        }
        let last = self.buckets.last().expect("buckets are never empty");
        if confidence >= last.lo {
            last
        } else {
            &self.buckets[0]
        }
    }

    fn find_bucket_mut(&mut self, confidence: f64) -> &mut CalibrationBucket {
        let idx = self
            .buckets
            .iter()
            .position(|b| b.lo <= confidence && confidence < b.hi)
            .unwrap_or(if confidence >= self.buckets[self.buckets.len() - 1].lo {
                self.buckets.len() - 1
            } else {
                0
            });
        &mut self.buckets[idx]
    }

    pub fn correction_for(&self, confidence: f64) -> f64 {
        self.find_bucket(confidence).correction()
    }

    /// Fold a resolved trade into the posterior, weighted by recency.
    /// Routing is by RAW confidence; correctness by RAW probability.
    pub fn update_from_resolution(&mut self, record: &TradeRecord, now: DateTime<Utc>) {
        let Some(outcome) = record.actual_outcome else {
            return;
        };
        if record.voided {
            return;
        }

        let predicted_yes = record.raw_probability > 0.5;
        let was_correct = predicted_yes == outcome;

        let days_since = (now - record.timestamp).num_seconds().max(0) as f64 / 86_400.0;
        let recency = RECENCY_DECAY_PER_DAY.powf(days_since);

        self.find_bucket_mut(record.raw_confidence)
            .update(was_correct, recency);
    }

    pub fn reset_to_priors(&mut self) {
        for bucket in &mut self.buckets {
            bucket.alpha = 1.0;
            bucket.beta = 1.0;
        }
    }
}

impl Default for CalibrationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketType, Side};

    fn resolved_record(raw_p: f64, raw_c: f64, adj_p: f64, adj_c: f64, outcome: bool) -> TradeRecord {
        let mut r = TradeRecord::skip(
            &crate::types::Market {
                market_id: "m".to_string(),
                question: "q".to_string(),
                yes_price: 0.5,
                no_price: 0.5,
                resolution_time: None,
                hours_to_resolution: 1.0,
                volume_24h: 0.0,
                liquidity: 0.0,
                market_type: MarketType::Political,
                fee_rate: 0.02,
                keywords: vec![],
                resolved: false,
                resolution: None,
            },
            "test",
            "run",
            "model",
            1,
            Utc::now(),
        );
        r.action = Side::BuyYes;
        r.skip_reason = None;
        r.raw_probability = raw_p;
        r.raw_confidence = raw_c;
        r.adjusted_probability = adj_p;
        r.adjusted_confidence = adj_c;
        r.actual_outcome = Some(outcome);
        r
    }

    #[test]
    fn bucket_partition_is_exact() {
        let mgr = CalibrationManager::new();
        let mut c = 0.50;
        while c <= 1.0 {
            let count = mgr
                .buckets()
                .iter()
                .filter(|b| {
                    (b.lo <= c && c < b.hi) || (c >= 1.0 && (b.lo, b.hi) == (0.95, 1.00))
                })
                .count();
            assert_eq!(count, 1, "confidence {} must land in exactly one bucket", c);
            c += 0.001;
        }
    }

    #[test]
    fn boundary_confidences_route_correctly() {
        let mgr = CalibrationManager::new();
        assert_eq!(mgr.find_bucket(0.50).lo, 0.50);
        assert_eq!(mgr.find_bucket(0.60).lo, 0.60);
        assert_eq!(mgr.find_bucket(0.95).lo, 0.95);
        assert_eq!(mgr.find_bucket(1.00).lo, 0.95);
        // Below-range confidences clamp to the first bucket
        assert_eq!(mgr.find_bucket(0.30).lo, 0.50);
    }

    #[test]
    fn correction_is_zero_under_ten_samples() {
        let mgr = CalibrationManager::new();
        assert_eq!(mgr.correction_for(0.75), 0.0);
    }

    #[test]
    fn update_routes_by_raw_not_adjusted() {
        let mut mgr = CalibrationManager::new();
        // RAW confidence 0.85 (bucket [0.80, 0.90)), adjusted 0.55 would be a
        // different bucket; the update must land in the raw one.
        let record = resolved_record(0.9, 0.85, 0.52, 0.55, true);
        mgr.update_from_resolution(&record, Utc::now());

        let raw_bucket = mgr.buckets().iter().find(|b| b.lo == 0.80).unwrap();
        let adj_bucket = mgr.buckets().iter().find(|b| b.lo == 0.50).unwrap();
        assert!(raw_bucket.alpha > 1.0);
        assert_eq!(adj_bucket.alpha, 1.0);
    }

    #[test]
    fn correctness_uses_raw_probability() {
        let mut mgr = CalibrationManager::new();
        // Raw says NO (0.3), adjusted says YES (0.6); outcome YES means the
        // raw prediction was wrong, so beta must grow.
        let record = resolved_record(0.3, 0.55, 0.6, 0.55, true);
        mgr.update_from_resolution(&record, Utc::now());
        let bucket = mgr.buckets().iter().find(|b| b.lo == 0.50).unwrap();
        assert_eq!(bucket.alpha, 1.0);
        assert!(bucket.beta > 1.0);
    }

    #[test]
    fn recent_trades_weigh_more_than_old_ones() {
        let mut mgr = CalibrationManager::new();
        let mut old = resolved_record(0.8, 0.75, 0.8, 0.75, true);
        old.timestamp = Utc::now() - chrono::Duration::days(30);
        mgr.update_from_resolution(&old, Utc::now());
        let old_gain = mgr.buckets().iter().find(|b| b.lo == 0.70).unwrap().alpha - 1.0;

        let mut mgr2 = CalibrationManager::new();
        let fresh = resolved_record(0.8, 0.75, 0.8, 0.75, true);
        mgr2.update_from_resolution(&fresh, Utc::now());
        let fresh_gain = mgr2.buckets().iter().find(|b| b.lo == 0.70).unwrap().alpha - 1.0;

        assert!(fresh_gain > old_gain);
        assert!((fresh_gain - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reset_restores_priors() {
        let mut mgr = CalibrationManager::new();
        for _ in 0..20 {
            mgr.update_from_resolution(&resolved_record(0.8, 0.75, 0.8, 0.75, false), Utc::now());
        }
        mgr.reset_to_priors();
        for bucket in mgr.buckets() {
            assert_eq!(bucket.alpha, 1.0);
            assert_eq!(bucket.beta, 1.0);
            assert_eq!(bucket.correction(), 0.0);
        }
    }

    #[test]
    fn voided_records_are_ignored() {
        let mut mgr = CalibrationManager::new();
        let mut record = resolved_record(0.8, 0.75, 0.8, 0.75, true);
        record.voided = true;
        mgr.update_from_resolution(&record, Utc::now());
        assert_eq!(mgr, CalibrationManager::new());
    }
}
