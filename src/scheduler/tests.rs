//! Scheduler tests with a mock market source

use super::*;
use crate::config::Environment;
use crate::market::FillResult;
use crate::signals::SourceRegistry;
use crate::state::AppState;
use crate::types::{ExperimentRun, MarketType, OrderBook, Portfolio, SourceKind};
use async_trait::async_trait;

struct MockSource {
    markets: Vec<Market>,
}

#[async_trait]
impl MarketSource for MockSource {
    async fn list_active(&self, _tier: u8) -> crate::error::Result<Vec<Market>> {
        Ok(self.markets.clone())
    }

    async fn get_orderbook(&self, market_id: &str) -> crate::error::Result<OrderBook> {
        Ok(OrderBook {
            market_id: market_id.to_string(),
            bids: vec![500.0],
            asks: vec![500.0],
            timestamp: Some(Utc::now()),
        })
    }

    async fn get_market(&self, _market_id: &str) -> crate::error::Result<Option<Market>> {
        Ok(None)
    }

    async fn place_order(
        &self,
        _market_id: &str,
        _side: Side,
        _price: f64,
        _size: f64,
    ) -> crate::error::Result<FillResult> {
        Err(BotError::Api("mock source cannot place orders".into()))
    }
}

fn test_settings() -> Settings {
    Settings {
        lm_api_key: "test".to_string(),
        social_api_key: "test".to_string(),
        market_api_key: String::new(),
        telegram_bot_token: String::new(),
        telegram_chat_id: String::new(),
        environment: Environment::Paper,
        db_path: ":memory:".to_string(),
        config_dir: "config".to_string(),
        health_port: 0,
        lm_model: "test-model".to_string(),
        // Unroutable address: any accidental model call fails fast
        lm_base_url: "http://127.0.0.1:9".to_string(),
        tier1_scan_interval_minutes: 15,
        tier1_min_edge: 0.04,
        tier1_daily_cap: 5,
        tier1_fee_rate: 0.02,
        tier2_scan_interval_minutes: 3,
        tier2_min_edge: 0.05,
        tier2_daily_cap: 3,
        tier2_fee_rate: 0.04,
        tier2_window_minutes: 30,
        daily_loss_limit_pct: 0.05,
        weekly_loss_limit_pct: 0.10,
        consecutive_adverse_limit: 3,
        cooldown_window_hours: 2.0,
        daily_api_budget_usd: 8.0,
        max_position_pct: 0.08,
        max_total_exposure_pct: 0.30,
        kelly_fraction: 0.25,
        max_cluster_exposure_pct: 0.12,
        scan_concurrency: 4,
        daily_summary_hour_utc: 0,
        initial_bankroll: 2000.0,
    }
}

fn political_market(id: &str) -> Market {
    Market {
        market_id: id.to_string(),
        question: "Will the senate pass the spending vote?".to_string(),
        yes_price: 0.60,
        no_price: 0.40,
        resolution_time: None,
        hours_to_resolution: 24.0,
        volume_24h: 10_000.0,
        liquidity: 8_000.0,
        market_type: MarketType::Political,
        fee_rate: 0.02,
        keywords: vec!["senate".to_string(), "spending".to_string(), "vote".to_string()],
        resolved: false,
        resolution: None,
    }
}

fn crypto_signal(content: &str, tier: SourceTier, followers: u64) -> Signal {
    Signal {
        source_kind: SourceKind::Social,
        source_tier: tier,
        info_type: None,
        content: content.to_string(),
        credibility: tier.credibility(),
        author: "tester".to_string(),
        followers,
        engagement: 50,
        timestamp: Some(Utc::now()),
        headline_only: false,
    }
}

async fn build_scheduler(markets: Vec<Market>) -> (Arc<Scheduler>, Database) {
    let settings = test_settings();
    let db = Database::connect(":memory:").await.unwrap();
    db.save_experiment(&ExperimentRun {
        run_id: "run-1".to_string(),
        started_at: Utc::now(),
        ended_at: None,
        config_snapshot: serde_json::json!({}),
        description: String::new(),
        model_used: "test-model".to_string(),
        include_in_learning: true,
        total_trades: 0,
        total_pnl: 0.0,
        avg_brier: 0.0,
        sharpe_ratio: 0.0,
    })
    .await
    .unwrap();

    let registry = Arc::new(SourceRegistry::default());
    let news = NewsCollector::new(Vec::new(), Arc::clone(&registry));
    let social = SocialCollector::new("test".to_string(), registry, db.clone())
        .with_base_url("http://127.0.0.1:9".to_string());
    let lm = Arc::new(LmClient::new(
        "test".to_string(),
        settings.lm_base_url.clone(),
        settings.lm_model.clone(),
        db.clone(),
    ));
    let shared: SharedState = Arc::new(RwLock::new(AppState {
        portfolio: Portfolio::new(2000.0),
        learning: crate::learning::LearningState::new(),
    }));

    let scheduler = Arc::new(Scheduler::new(
        settings,
        db.clone(),
        Arc::new(MockSource { markets }),
        news,
        social,
        lm,
        Notifier::disabled(),
        shared,
        Arc::new(RwLock::new(None)),
        Arc::new(RwLock::new(BotMode::Initializing)),
    ));
    (scheduler, db)
}

async fn seed_executed_tier1_trades(db: &Database, count: usize) {
    for i in 0..count {
        let mut record =
            TradeRecord::skip(&political_market(&format!("seed-{}", i)), "x", "run-1", "test-model", 1, Utc::now());
        record.action = Side::BuyYes;
        record.skip_reason = None;
        record.position_size_usd = 50.0;
        db.save_trade(&record).await.unwrap();
    }
}

#[tokio::test]
async fn observe_only_records_skips_and_never_calls_the_model() {
    let markets: Vec<Market> = (0..5).map(|i| political_market(&format!("m-{}", i))).collect();
    let (scheduler, db) = build_scheduler(markets).await;

    // Tier-1 cap of 5 already spent today
    seed_executed_tier1_trades(&db, 5).await;

    scheduler.clone().run_scan(1).await.unwrap();

    let today = db.get_today_trades(Utc::now()).await.unwrap();
    let observe_skips: Vec<_> = today
        .iter()
        .filter(|t| t.skip_reason.as_deref() == Some("daily_cap_observe_only"))
        .collect();
    assert_eq!(observe_skips.len(), 5);
    assert!(observe_skips.iter().all(|t| t.action == Side::Skip));
    assert!(observe_skips.iter().all(|t| t.position_size_usd == 0.0));

    // The model cost counter never moved
    assert_eq!(db.today_service_calls("lm").await.unwrap(), 0);

    assert_eq!(*scheduler.mode.read().await, BotMode::ObserveOnly);
    assert!(scheduler.last_scan_completed.read().await.is_some());
}

#[tokio::test]
async fn under_the_cap_the_scan_reports_active_mode() {
    let (scheduler, db) = build_scheduler(Vec::new()).await;
    seed_executed_tier1_trades(&db, 2).await;

    scheduler.clone().run_scan(1).await.unwrap();
    assert_eq!(*scheduler.mode.read().await, BotMode::Active);
}

#[tokio::test]
async fn scan_without_experiment_run_is_a_consistency_error() {
    let settings = test_settings();
    let db = Database::connect(":memory:").await.unwrap();
    let registry = Arc::new(SourceRegistry::default());
    let news = NewsCollector::new(Vec::new(), Arc::clone(&registry));
    let social = SocialCollector::new("test".to_string(), registry, db.clone())
        .with_base_url("http://127.0.0.1:9".to_string());
    let lm = Arc::new(LmClient::new(
        "test".to_string(),
        settings.lm_base_url.clone(),
        settings.lm_model.clone(),
        db.clone(),
    ));
    let shared: SharedState = Arc::new(RwLock::new(AppState {
        portfolio: Portfolio::new(2000.0),
        learning: crate::learning::LearningState::new(),
    }));
    let scheduler = Arc::new(Scheduler::new(
        settings,
        db.clone(),
        Arc::new(MockSource { markets: vec![] }),
        news,
        social,
        lm,
        Notifier::disabled(),
        shared,
        Arc::new(RwLock::new(None)),
        Arc::new(RwLock::new(BotMode::Initializing)),
    ));

    let err = scheduler.clone().run_scan(1).await.unwrap_err();
    assert!(matches!(err, BotError::Consistency(_)));
}

#[test]
fn tier2_needs_two_crypto_signals_and_authority() {
    // Only one crypto signal
    let signals = vec![crypto_signal("bitcoin breaks out", SourceTier::S1, 500)];
    assert!(!Scheduler::qualifies_for_tier2(&signals));

    // Two crypto signals but no authority
    let signals = vec![
        crypto_signal("bitcoin breaks out", SourceTier::S6, 500),
        crypto_signal("eth following btc", SourceTier::S6, 900),
    ];
    assert!(!Scheduler::qualifies_for_tier2(&signals));

    // Wire-service authority qualifies
    let signals = vec![
        crypto_signal("bitcoin breaks out", SourceTier::S2, 500),
        crypto_signal("eth following btc", SourceTier::S6, 900),
    ];
    assert!(Scheduler::qualifies_for_tier2(&signals));

    // Follower-count authority qualifies
    let signals = vec![
        crypto_signal("solana rally extends", SourceTier::S6, 250_000),
        crypto_signal("crypto volume spiking", SourceTier::S6, 900),
    ];
    assert!(Scheduler::qualifies_for_tier2(&signals));

    // Non-crypto signals never qualify
    let signals = vec![
        crypto_signal("election polls tighten", SourceTier::S1, 500_000),
        crypto_signal("senate vote tonight", SourceTier::S2, 500_000),
    ];
    assert!(!Scheduler::qualifies_for_tier2(&signals));
}

#[test]
fn tags_pick_up_the_freshest_matching_signal_timestamp() {
    let now = Utc::now();
    let older = now - chrono::Duration::hours(2);
    let signals = vec![
        Signal {
            timestamp: Some(older),
            ..crypto_signal("first wire report", SourceTier::S2, 500)
        },
        Signal {
            timestamp: Some(now),
            ..crypto_signal("second wire report", SourceTier::S2, 500)
        },
    ];
    let mut tags = vec![SignalTag {
        source_tier: SourceTier::S2,
        info_type: crate::types::InfoType::I2,
        summary: String::new(),
        timestamp: None,
    }];
    enrich_tags_with_timestamps(&mut tags, &signals);
    assert_eq!(tags[0].timestamp, Some(now));

    // No matching tier: timestamp stays unset
    let mut unmatched = vec![SignalTag {
        source_tier: SourceTier::S4,
        info_type: crate::types::InfoType::I3,
        summary: String::new(),
        timestamp: None,
    }];
    enrich_tags_with_timestamps(&mut unmatched, &signals);
    assert!(unmatched[0].timestamp.is_none());
}
