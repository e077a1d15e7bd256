//! Tests for configuration parsing

use crate::config::{Environment, MonkModeConfig, Settings};

// Environment mutation lives in this single test to avoid races with
// parallel test threads.
#[test]
fn from_env_parses_types_and_defaults() {
    std::env::set_var("LM_API_KEY", "lm-key");
    std::env::set_var("SOCIAL_API_KEY", "social-key");
    std::env::set_var("TIER1_MIN_EDGE", "0.06");
    std::env::set_var("TIER1_DAILY_CAP", "7");
    std::env::remove_var("ENVIRONMENT");

    let settings = Settings::from_env().unwrap();
    assert_eq!(settings.lm_api_key, "lm-key");
    assert_eq!(settings.environment, Environment::Paper);
    assert!((settings.tier1_min_edge - 0.06).abs() < 1e-12);
    assert_eq!(settings.tier1_daily_cap, 7);
    // Untouched keys keep their defaults
    assert_eq!(settings.tier2_daily_cap, 3);
    assert!((settings.kelly_fraction - 0.25).abs() < 1e-12);
    assert!((settings.initial_bankroll - 2000.0).abs() < 1e-12);

    // Invalid typed value is a config error
    std::env::set_var("TIER1_DAILY_CAP", "many");
    assert!(Settings::from_env().is_err());
    std::env::remove_var("TIER1_DAILY_CAP");

    // Unknown environment rejected
    std::env::set_var("ENVIRONMENT", "backtest");
    assert!(Settings::from_env().is_err());
    std::env::remove_var("ENVIRONMENT");

    // Missing mandatory key rejected
    std::env::remove_var("LM_API_KEY");
    assert!(Settings::from_env().is_err());
    std::env::set_var("LM_API_KEY", "lm-key");

    std::env::remove_var("TIER1_MIN_EDGE");
}

#[test]
fn monk_defaults_match_the_risk_limits() {
    let monk = MonkModeConfig::default();
    assert_eq!(monk.tier1_daily_cap, 5);
    assert_eq!(monk.tier2_daily_cap, 3);
    assert_eq!(monk.daily_cap(1), 5);
    assert_eq!(monk.daily_cap(2), 3);
    assert!((monk.daily_loss_limit_pct - 0.05).abs() < 1e-12);
    assert!((monk.weekly_loss_limit_pct - 0.10).abs() < 1e-12);
    assert!((monk.max_total_exposure_pct - 0.30).abs() < 1e-12);
    assert!((monk.max_cluster_exposure_pct - 0.12).abs() < 1e-12);
    assert_eq!(monk.consecutive_adverse_limit, 3);
}

#[test]
fn safe_snapshot_excludes_secrets() {
    let settings = Settings {
        lm_api_key: "sk-secret-lm".to_string(),
        social_api_key: "sk-secret-social".to_string(),
        market_api_key: "sk-secret-market".to_string(),
        telegram_bot_token: "tg-token".to_string(),
        telegram_chat_id: "chat".to_string(),
        environment: Environment::Paper,
        db_path: "data/test.db".to_string(),
        config_dir: "config".to_string(),
        health_port: 8000,
        lm_model: "test-model".to_string(),
        lm_base_url: "https://example.invalid".to_string(),
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
        scan_concurrency: 8,
        daily_summary_hour_utc: 0,
        initial_bankroll: 2000.0,
    };

    let rendered = settings.safe_snapshot().to_string();
    assert!(!rendered.contains("sk-secret"));
    assert!(!rendered.contains("tg-token"));
    assert!(rendered.contains("test-model"));
    assert!(rendered.contains("kelly_fraction"));

    // And the monk config view carries the same limits
    let monk = settings.monk();
    assert_eq!(monk.tier1_daily_cap, 5);
    assert!((settings.min_edge(1) - 0.04).abs() < 1e-12);
    assert!((settings.min_edge(2) - 0.05).abs() < 1e-12);
    assert!((settings.fee_rate(2) - 0.04).abs() < 1e-12);
}
