//! Model swap, trade void, and full learning rebuild
//!
//! A swap invalidates the calibration posterior (it measured the old model),
//! dampens market-type memory, and preserves the signal trackers (signal
//! quality is model-independent). A void rebuilds everything from the
//! surviving records.

use crate::learning::{ensure_brier_scores, LearningState};
use crate::error::{BotError, Result};
use crate::storage::Database;
use crate::types::{ExperimentRun, ModelSwapEvent};
use chrono::{DateTime, Utc};

/// Execute the model-swap protocol. Returns the new experiment run id.
pub async fn handle_model_swap(
    old_model: &str,
    new_model: &str,
    reason: &str,
    learning: &mut LearningState,
    db: &Database,
) -> Result<String> {
    let now = Utc::now();

    // Close out the current run before the new model starts trading
    if let Some(current) = db.current_experiment().await? {
        let stats = db.run_stats(&current.run_id).await?;
        db.end_experiment(&current.run_id, &stats, now).await?;
    }

    let run_id = format!("exp_{}_{}", new_model, now.format("%Y%m%d_%H%M%S"));
    db.save_experiment(&ExperimentRun {
        run_id: run_id.clone(),
        started_at: now,
        ended_at: None,
        config_snapshot: serde_json::json!({
            "old_model": old_model,
            "new_model": new_model,
        }),
        description: format!("Model swap: {} -> {}. Reason: {}", old_model, new_model, reason),
        model_used: new_model.to_string(),
        include_in_learning: true,
        total_trades: 0,
        total_pnl: 0.0,
        avg_brier: 0.0,
        sharpe_ratio: 0.0,
    })
    .await?;

    db.save_model_swap(&ModelSwapEvent {
        timestamp: now,
        old_model: old_model.to_string(),
        new_model: new_model.to_string(),
        reason: reason.to_string(),
        experiment_run_started: run_id.clone(),
    })
    .await?;

    // Calibration measured the old model: reset to priors.
    learning.calibration.reset_to_priors();
    // Market-type memory carries over in dampened form.
    learning.market_types.dampen_on_swap();
    // Signal trackers are untouched.
    db.persist_learning(learning, None).await?;

    tracing::info!(old_model, new_model, run_id = %run_id, "model swap complete");
    Ok(run_id)
}

/// Mark a record voided and rebuild all learning from the survivors
pub async fn void_trade(
    trade_id: &str,
    reason: &str,
    learning: &mut LearningState,
    db: &Database,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut record = db
        .get_trade(trade_id)
        .await?
        .ok_or_else(|| BotError::Consistency(format!("trade {} not found", trade_id)))?;

    record.voided = true;
    record.void_reason = Some(reason.to_string());
    db.update_trade(&record).await?;

    recalculate_learning(learning, db, now).await?;
    tracing::info!(trade_id, reason, "trade voided");
    Ok(())
}

/// Rebuild all three learning layers from the non-void resolved records,
/// replayed in ascending timestamp order from priors
pub async fn recalculate_learning(
    learning: &mut LearningState,
    db: &Database,
    now: DateTime<Utc>,
) -> Result<()> {
    learning.reset();
    db.clear_learning().await?;

    let trades = db.get_resolved_trades(false).await?;
    let count = trades.len();
    for mut trade in trades {
        if trade.actual_outcome.is_none() {
            continue;
        }
        ensure_brier_scores(&mut trade);
        learning.apply_resolution(&trade, now);
    }

    db.persist_learning(learning, None).await?;
    tracing::info!(trades_replayed = count, "learning recalculated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        InfoType, Market, MarketType, Side, SignalTag, SourceTier, TradeRecord,
    };
    use chrono::Duration;

    async fn test_db() -> Database {
        Database::connect(":memory:").await.unwrap()
    }

    async fn seed_experiment(db: &Database, run_id: &str, model: &str) {
        db.save_experiment(&ExperimentRun {
            run_id: run_id.to_string(),
            started_at: Utc::now() - Duration::days(30),
            ended_at: None,
            config_snapshot: serde_json::json!({}),
            description: String::new(),
            model_used: model.to_string(),
            include_in_learning: true,
            total_trades: 0,
            total_pnl: 0.0,
            avg_brier: 0.0,
            sharpe_ratio: 0.0,
        })
        .await
        .unwrap();
    }

    fn market(mtype: MarketType) -> Market {
        Market {
            market_id: "m".to_string(),
            question: "q".to_string(),
            yes_price: 0.55,
            no_price: 0.45,
            resolution_time: None,
            hours_to_resolution: 6.0,
            volume_24h: 0.0,
            liquidity: 0.0,
            market_type: mtype,
            fee_rate: 0.02,
            keywords: vec![],
            resolved: false,
            resolution: None,
        }
    }

    fn resolved_record(i: usize, outcome: bool) -> TradeRecord {
        let mtype = if i % 2 == 0 {
            MarketType::Political
        } else {
            MarketType::Economic
        };
        let mut r = TradeRecord::skip(&market(mtype), "r", "run-old", "old-model", 1, Utc::now());
        r.record_id = format!("trade-{}", i);
        r.timestamp = Utc::now() - Duration::hours(24 - i as i64);
        r.action = if i % 3 == 0 { Side::BuyNo } else { Side::BuyYes };
        r.skip_reason = None;
        r.raw_probability = 0.55 + (i as f64 % 4.0) * 0.1;
        r.raw_confidence = 0.55 + (i as f64 % 5.0) * 0.08;
        r.adjusted_probability = (r.raw_probability - 0.05).clamp(0.01, 0.99);
        r.adjusted_confidence = r.raw_confidence.clamp(0.50, 0.99);
        r.market_price_at_decision = 0.55;
        r.position_size_usd = 50.0;
        r.actual_outcome = Some(outcome);
        r.pnl = Some(if outcome { 20.0 } else { -50.0 });
        r.resolved_at = Some(r.timestamp + Duration::hours(1));
        r.signal_tags = vec![SignalTag {
            source_tier: if i % 2 == 0 { SourceTier::S2 } else { SourceTier::S4 },
            info_type: if i % 3 == 0 { InfoType::I1 } else { InfoType::I2 },
            summary: String::new(),
            timestamp: None,
        }];
        r
    }

    #[tokio::test]
    async fn swap_resets_calibration_dampens_types_preserves_trackers() {
        let db = test_db().await;
        seed_experiment(&db, "run-old", "old-model").await;

        let mut learning = LearningState::new();
        let now = Utc::now();
        // Build up pre-swap state: 40 political trades with distinct briers
        for i in 0..40 {
            let mut r = resolved_record(0, i % 2 == 0);
            r.record_id = format!("pre-{}", i);
            r.brier_adjusted = Some(i as f64 / 100.0);
            r.brier_raw = Some(i as f64 / 100.0);
            learning.apply_resolution(&r, now);
        }
        let trackers_before = learning.signal_trackers.clone();
        let bucket_before = learning.calibration.find_bucket(0.55).clone();
        assert!(bucket_before.alpha > 1.0 || bucket_before.beta > 1.0);

        handle_model_swap("old-model", "new-model", "upgrade", &mut learning, &db)
            .await
            .unwrap();

        // Calibration back to priors
        for bucket in learning.calibration.buckets() {
            assert_eq!(bucket.alpha, 1.0);
            assert_eq!(bucket.beta, 1.0);
            assert_eq!(bucket.correction(), 0.0);
        }
        // Market-type history truncated to the most recent 15
        let perf = learning.market_types.get(MarketType::Political).unwrap();
        assert_eq!(perf.brier_scores.len(), 15);
        assert!((perf.brier_scores[0] - 0.25).abs() < 1e-9);
        // Trackers untouched
        assert_eq!(learning.signal_trackers, trackers_before);

        // Old run closed, new run current and bound to the new model
        let current = db.current_experiment().await.unwrap().unwrap();
        assert_eq!(current.model_used, "new-model");
        assert!(current.run_id.starts_with("exp_new-model_"));
    }

    #[tokio::test]
    async fn void_then_rebuild_equals_replay_without_the_record() {
        let db = test_db().await;
        seed_experiment(&db, "run-old", "old-model").await;

        let mut records = Vec::new();
        for i in 0..10 {
            let r = resolved_record(i, i % 2 == 0);
            db.save_trade(&r).await.unwrap();
            records.push(r);
        }

        let now = Utc::now();
        let mut learning = LearningState::new();
        recalculate_learning(&mut learning, &db, now).await.unwrap();

        // Void record #7 and rebuild
        void_trade("trade-6", "bad resolution data", &mut learning, &db, now)
            .await
            .unwrap();

        // Manual replay of the surviving nine from priors
        let mut expected = LearningState::new();
        for (i, r) in records.iter().enumerate() {
            if i == 6 {
                continue;
            }
            let mut r = r.clone();
            ensure_brier_scores(&mut r);
            expected.apply_resolution(&r, now);
        }

        assert_eq!(learning, expected);

        // And the persisted state round-trips to the same thing
        let reloaded = LearningState::load(&db).await.unwrap();
        assert_eq!(reloaded, expected);
    }

    #[tokio::test]
    async fn voiding_missing_trade_is_a_consistency_error() {
        let db = test_db().await;
        let mut learning = LearningState::new();
        let err = void_trade("nope", "reason", &mut learning, &db, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Consistency(_)));
    }

    #[tokio::test]
    async fn recalculate_skips_voided_records() {
        let db = test_db().await;
        seed_experiment(&db, "run-old", "old-model").await;

        let good = resolved_record(0, true);
        db.save_trade(&good).await.unwrap();
        let mut bad = resolved_record(1, false);
        bad.voided = true;
        bad.void_reason = Some("test".to_string());
        db.save_trade(&bad).await.unwrap();

        let now = Utc::now();
        let mut learning = LearningState::new();
        recalculate_learning(&mut learning, &db, now).await.unwrap();

        let mut expected = LearningState::new();
        let mut r = good.clone();
        ensure_brier_scores(&mut r);
        expected.apply_resolution(&r, now);
        assert_eq!(learning, expected);
    }
}
