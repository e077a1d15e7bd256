//! Environment-backed configuration
//!
//! All tunables come from the process environment with typed parsing and
//! defaults; the two YAML documents (known sources, news feeds) are loaded
//! by the signal pipeline at startup.

use crate::error::{BotError, Result};
use serde_json::json;
use std::env;

/// Execution environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Paper,
    Live,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Paper => "paper",
            Environment::Live => "live",
        }
    }
}

/// Bot settings, parsed once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    // API keys
    pub lm_api_key: String,
    pub social_api_key: String,
    pub market_api_key: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,

    // Environment
    pub environment: Environment,
    pub db_path: String,
    pub config_dir: String,
    pub health_port: u16,

    // Model
    pub lm_model: String,
    pub lm_base_url: String,

    // Tier 1
    pub tier1_scan_interval_minutes: u64,
    pub tier1_min_edge: f64,
    pub tier1_daily_cap: u32,
    pub tier1_fee_rate: f64,

    // Tier 2
    pub tier2_scan_interval_minutes: u64,
    pub tier2_min_edge: f64,
    pub tier2_daily_cap: u32,
    pub tier2_fee_rate: f64,
    pub tier2_window_minutes: i64,

    // Risk gate
    pub daily_loss_limit_pct: f64,
    pub weekly_loss_limit_pct: f64,
    pub consecutive_adverse_limit: u32,
    pub cooldown_window_hours: f64,
    pub daily_api_budget_usd: f64,
    pub max_position_pct: f64,
    pub max_total_exposure_pct: f64,
    pub kelly_fraction: f64,
    pub max_cluster_exposure_pct: f64,

    // Scheduling
    pub scan_concurrency: usize,
    pub daily_summary_hour_utc: u32,

    pub initial_bankroll: f64,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| BotError::Config(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let lm_api_key =
            env::var("LM_API_KEY").map_err(|_| BotError::Config("LM_API_KEY is required".into()))?;
        let social_api_key = env::var("SOCIAL_API_KEY")
            .map_err(|_| BotError::Config("SOCIAL_API_KEY is required".into()))?;

        let environment = match var_or("ENVIRONMENT", "paper").to_lowercase().as_str() {
            "paper" => Environment::Paper,
            "live" => Environment::Live,
            other => {
                return Err(BotError::Config(format!(
                    "ENVIRONMENT must be 'paper' or 'live', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            lm_api_key,
            social_api_key,
            market_api_key: var_or("MARKET_API_KEY", ""),
            telegram_bot_token: var_or("TELEGRAM_BOT_TOKEN", ""),
            telegram_chat_id: var_or("TELEGRAM_CHAT_ID", ""),
            environment,
            db_path: var_or("DB_PATH", "data/prophet.db"),
            config_dir: var_or("CONFIG_DIR", "config"),
            health_port: parse_or("HEALTH_PORT", 8000u16)?,
            lm_model: var_or("LM_MODEL", "grok-4-1-fast-reasoning"),
            lm_base_url: var_or("LM_BASE_URL", "https://api.x.ai/v1"),
            tier1_scan_interval_minutes: parse_or("TIER1_SCAN_INTERVAL_MINUTES", 15u64)?,
            tier1_min_edge: parse_or("TIER1_MIN_EDGE", 0.04f64)?,
            tier1_daily_cap: parse_or("TIER1_DAILY_CAP", 5u32)?,
            tier1_fee_rate: parse_or("TIER1_FEE_RATE", 0.02f64)?,
            tier2_scan_interval_minutes: parse_or("TIER2_SCAN_INTERVAL_MINUTES", 3u64)?,
            tier2_min_edge: parse_or("TIER2_MIN_EDGE", 0.05f64)?,
            tier2_daily_cap: parse_or("TIER2_DAILY_CAP", 3u32)?,
            tier2_fee_rate: parse_or("TIER2_FEE_RATE", 0.04f64)?,
            tier2_window_minutes: parse_or("TIER2_WINDOW_MINUTES", 30i64)?,
            daily_loss_limit_pct: parse_or("DAILY_LOSS_LIMIT_PCT", 0.05f64)?,
            weekly_loss_limit_pct: parse_or("WEEKLY_LOSS_LIMIT_PCT", 0.10f64)?,
            consecutive_adverse_limit: parse_or("CONSECUTIVE_ADVERSE_LIMIT", 3u32)?,
            cooldown_window_hours: parse_or("COOLDOWN_WINDOW_HOURS", 2.0f64)?,
            daily_api_budget_usd: parse_or("DAILY_API_BUDGET_USD", 8.0f64)?,
            max_position_pct: parse_or("MAX_POSITION_PCT", 0.08f64)?,
            max_total_exposure_pct: parse_or("MAX_TOTAL_EXPOSURE_PCT", 0.30f64)?,
            kelly_fraction: parse_or("KELLY_FRACTION", 0.25f64)?,
            max_cluster_exposure_pct: parse_or("MAX_CLUSTER_EXPOSURE_PCT", 0.12f64)?,
            scan_concurrency: parse_or("SCAN_CONCURRENCY", 8usize)?,
            daily_summary_hour_utc: parse_or("DAILY_SUMMARY_HOUR_UTC", 0u32)?,
            initial_bankroll: parse_or("INITIAL_BANKROLL", 2000.0f64)?,
        })
    }

    /// Config snapshot stored with experiment runs; never includes secrets.
    pub fn safe_snapshot(&self) -> serde_json::Value {
        json!({
            "environment": self.environment.as_str(),
            "lm_model": self.lm_model,
            "tier1_scan_interval_minutes": self.tier1_scan_interval_minutes,
            "tier1_min_edge": self.tier1_min_edge,
            "tier1_daily_cap": self.tier1_daily_cap,
            "tier1_fee_rate": self.tier1_fee_rate,
            "tier2_min_edge": self.tier2_min_edge,
            "tier2_daily_cap": self.tier2_daily_cap,
            "tier2_fee_rate": self.tier2_fee_rate,
            "daily_loss_limit_pct": self.daily_loss_limit_pct,
            "weekly_loss_limit_pct": self.weekly_loss_limit_pct,
            "daily_api_budget_usd": self.daily_api_budget_usd,
            "max_position_pct": self.max_position_pct,
            "max_total_exposure_pct": self.max_total_exposure_pct,
            "kelly_fraction": self.kelly_fraction,
            "max_cluster_exposure_pct": self.max_cluster_exposure_pct,
            "initial_bankroll": self.initial_bankroll,
        })
    }

    pub fn monk(&self) -> MonkModeConfig {
        MonkModeConfig {
            tier1_daily_cap: self.tier1_daily_cap,
            tier2_daily_cap: self.tier2_daily_cap,
            daily_loss_limit_pct: self.daily_loss_limit_pct,
            weekly_loss_limit_pct: self.weekly_loss_limit_pct,
            consecutive_adverse_limit: self.consecutive_adverse_limit,
            cooldown_window_hours: self.cooldown_window_hours,
            daily_api_budget_usd: self.daily_api_budget_usd,
            max_position_pct: self.max_position_pct,
            max_total_exposure_pct: self.max_total_exposure_pct,
            kelly_fraction: self.kelly_fraction,
            max_cluster_exposure_pct: self.max_cluster_exposure_pct,
        }
    }

    pub fn min_edge(&self, tier: u8) -> f64 {
        if tier == 1 {
            self.tier1_min_edge
        } else {
            self.tier2_min_edge
        }
    }

    pub fn fee_rate(&self, tier: u8) -> f64 {
        if tier == 1 {
            self.tier1_fee_rate
        } else {
            self.tier2_fee_rate
        }
    }
}

/// Risk-gate limits, split out so the decision engine does not depend on
/// the full settings surface
#[derive(Debug, Clone)]
pub struct MonkModeConfig {
    pub tier1_daily_cap: u32,
    pub tier2_daily_cap: u32,
    pub daily_loss_limit_pct: f64,
    pub weekly_loss_limit_pct: f64,
    pub consecutive_adverse_limit: u32,
    pub cooldown_window_hours: f64,
    pub daily_api_budget_usd: f64,
    pub max_position_pct: f64,
    pub max_total_exposure_pct: f64,
    pub kelly_fraction: f64,
    pub max_cluster_exposure_pct: f64,
}

impl MonkModeConfig {
    pub fn daily_cap(&self, tier: u8) -> u32 {
        if tier == 1 {
            self.tier1_daily_cap
        } else {
            self.tier2_daily_cap
        }
    }
}

impl Default for MonkModeConfig {
    fn default() -> Self {
        Self {
            tier1_daily_cap: 5,
            tier2_daily_cap: 3,
            daily_loss_limit_pct: 0.05,
            weekly_loss_limit_pct: 0.10,
            consecutive_adverse_limit: 3,
            cooldown_window_hours: 2.0,
            daily_api_budget_usd: 8.0,
            max_position_pct: 0.08,
            max_total_exposure_pct: 0.30,
            kelly_fraction: 0.25,
            max_cluster_exposure_pct: 0.12,
        }
    }
}
