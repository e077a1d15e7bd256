//! Tests for core types

use crate::types::*;
use std::str::FromStr;

#[test]
fn tier_credibility_matches_the_table() {
    assert_eq!(SourceTier::S1.credibility(), 0.95);
    assert_eq!(SourceTier::S2.credibility(), 0.90);
    assert_eq!(SourceTier::S3.credibility(), 0.80);
    assert_eq!(SourceTier::S4.credibility(), 0.65);
    assert_eq!(SourceTier::S5.credibility(), 0.70);
    assert_eq!(SourceTier::S6.credibility(), 0.30);
}

#[test]
fn enums_round_trip_through_strings() {
    for tier in [SourceTier::S1, SourceTier::S3, SourceTier::S6] {
        assert_eq!(SourceTier::from_str(tier.as_str()).unwrap(), tier);
    }
    for info in [InfoType::I1, InfoType::I5, InfoType::I6] {
        assert_eq!(InfoType::from_str(info.as_str()).unwrap(), info);
    }
    for side in [Side::BuyYes, Side::BuyNo, Side::Skip] {
        assert_eq!(Side::from_str(side.as_str()).unwrap(), side);
    }
    for mtype in MarketType::all() {
        assert_eq!(MarketType::from_str(mtype.as_str()).unwrap(), mtype);
    }
    assert!(SourceTier::from_str("S9").is_err());
    assert!(MarketType::from_str("weather").is_err());
}

#[test]
fn signal_tags_serialize_with_plain_tier_names() {
    let tag = SignalTag {
        source_tier: SourceTier::S2,
        info_type: InfoType::I3,
        summary: "poll movement".to_string(),
        timestamp: None,
    };
    let json = serde_json::to_string(&tag).unwrap();
    assert!(json.contains("\"S2\""));
    assert!(json.contains("\"I3\""));
    let back: SignalTag = serde_json::from_str(&json).unwrap();
    assert_eq!(back.source_tier, SourceTier::S2);
    assert_eq!(back.info_type, InfoType::I3);
}

#[test]
fn fresh_bucket_has_flat_prior() {
    let bucket = CalibrationBucket::new((0.70, 0.80));
    assert_eq!(bucket.expected_accuracy(), 0.5);
    assert_eq!(bucket.sample_count(), 0);
    assert_eq!(bucket.correction(), 0.0);
    // Beta(1,1) is uniform: the 95% central interval is 0.95 wide
    assert!((bucket.uncertainty() - 0.95).abs() < 0.01);
}

#[test]
fn bucket_derived_values_track_updates() {
    let mut bucket = CalibrationBucket::new((0.70, 0.80));
    for _ in 0..5 {
        bucket.update(true, 1.0);
    }
    for _ in 0..13 {
        bucket.update(false, 1.0);
    }
    // alpha=6, beta=14
    assert_eq!(bucket.sample_count(), 18);
    assert!((bucket.expected_accuracy() - 0.30).abs() < 1e-9);
    // Accuracy well below the midpoint pulls the correction negative
    assert!(bucket.correction() < 0.0);
}

#[test]
fn uncertainty_shrinks_with_evidence() {
    let mut narrow = CalibrationBucket::new((0.70, 0.80));
    for _ in 0..100 {
        narrow.update(true, 1.0);
        narrow.update(false, 1.0);
    }
    let wide = CalibrationBucket::new((0.70, 0.80));
    assert!(narrow.uncertainty() < wide.uncertainty());
}

#[test]
fn fractional_recency_weights_accumulate() {
    let mut bucket = CalibrationBucket::new((0.70, 0.80));
    bucket.update(true, 0.5);
    bucket.update(false, 0.25);
    assert!((bucket.alpha - 1.5).abs() < 1e-12);
    assert!((bucket.beta - 1.25).abs() < 1e-12);
}

#[test]
fn avg_brier_defaults_and_decays() {
    let mut perf = MarketTypePerformance::new(MarketType::Political);
    assert_eq!(perf.avg_brier(), 0.25);

    // Newest score dominates under the 0.95 decay
    perf.brier_scores = vec![0.40, 0.10];
    let avg = perf.avg_brier();
    let expected = (0.40 * 0.95 + 0.10) / (0.95 + 1.0);
    assert!((avg - expected).abs() < 1e-12);
    assert!(avg < 0.25);
}

#[test]
fn orderbook_depth_and_skew() {
    let book = OrderBook {
        market_id: "m".to_string(),
        bids: vec![300.0, 200.0],
        asks: vec![100.0, 150.0],
        timestamp: None,
    };
    assert_eq!(book.depth(), 750.0);
    assert!((book.skew() - (500.0 - 250.0) / 750.0).abs() < 1e-12);
    assert_eq!(OrderBook::default().skew(), 0.0);
}

#[test]
fn portfolio_exposure_sums_open_positions() {
    let mut p = Portfolio::new(1000.0);
    assert_eq!(p.open_exposure(), 0.0);
    p.open_positions.push(Position {
        market_id: "a".to_string(),
        side: Side::BuyYes,
        entry_price: 0.5,
        size_usd: 120.0,
        current_value: 120.0,
        market_cluster_id: None,
    });
    p.open_positions.push(Position {
        market_id: "b".to_string(),
        side: Side::BuyNo,
        entry_price: 0.4,
        size_usd: 80.0,
        current_value: 75.0,
        market_cluster_id: None,
    });
    assert_eq!(p.open_exposure(), 200.0);
}

#[test]
fn skip_records_are_fully_zeroed() {
    let market = Market {
        market_id: "m".to_string(),
        question: "q".to_string(),
        yes_price: 0.6,
        no_price: 0.4,
        resolution_time: None,
        hours_to_resolution: 12.0,
        volume_24h: 0.0,
        liquidity: 0.0,
        market_type: MarketType::Economic,
        fee_rate: 0.02,
        keywords: vec![],
        resolved: false,
        resolution: None,
    };
    let record = TradeRecord::skip(&market, "edge_below_threshold", "run", "model", 1, chrono::Utc::now());
    assert_eq!(record.action, Side::Skip);
    assert!(!record.is_executed());
    assert_eq!(record.position_size_usd, 0.0);
    assert_eq!(record.skip_reason.as_deref(), Some("edge_below_threshold"));
    assert!(!record.voided);
}
