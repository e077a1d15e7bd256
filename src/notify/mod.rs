//! Outbound alerts via Telegram
//!
//! Silent no-op when unconfigured; delivery failures are logged and never
//! propagated into the trading path.

use crate::types::{Portfolio, TradeRecord};
use reqwest::Client;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram notifier
#[derive(Clone)]
pub struct Notifier {
    http: Client,
    bot_token: String,
    chat_id: String,
    enabled: bool,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        let enabled = !bot_token.is_empty() && !chat_id.is_empty();
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            bot_token,
            chat_id,
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(String::new(), String::new())
    }

    pub async fn send(&self, message: &str) {
        if !self.enabled {
            return;
        }
        let result = self
            .http
            .post(format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": message,
                "parse_mode": "HTML",
            }))
            .send()
            .await;
        match result {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(status = %resp.status(), "alert delivery rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "alert delivery failed");
            }
            _ => {}
        }
    }
}

pub fn format_trade_alert(record: &TradeRecord) -> String {
    format!(
        "<b>TRADE: {}</b>\n\
         Side: {} | Edge: {:.3}\n\
         Size: ${:.2} | Price: {:.4}\n\
         Prob: {:.3} (raw: {:.3})\n\
         Conf: {:.3} | Score: {:.4}\n\
         Tier: {} | Type: {}",
        truncate(&record.market_question, 80),
        record.action,
        record.calculated_edge,
        record.position_size_usd,
        record.market_price_at_decision,
        record.adjusted_probability,
        record.raw_probability,
        record.adjusted_confidence,
        record.trade_score,
        record.tier,
        record.market_type,
    )
}

pub fn format_monk_mode_alert(reason: &str) -> String {
    format!("<b>RISK GATE</b>\nTrade blocked: {}", reason)
}

pub fn format_observe_only_alert(executed: usize, cap: u32) -> String {
    format!(
        "<b>OBSERVE-ONLY</b>\nTier-1 cap reached ({}/{}); scans continue without model calls.",
        executed, cap
    )
}

pub fn format_tier2_alert(active: bool) -> String {
    if active {
        "<b>TIER 2 ACTIVE</b>\nCrypto window opened on breaking signals.".to_string()
    } else {
        "<b>TIER 2 CLOSED</b>\nNo qualifying crypto signals in 30 minutes.".to_string()
    }
}

pub fn format_stale_scan_alert(minutes: f64) -> String {
    format!("<b>STALE SCAN</b>\nNo scan completed in {:.0} minutes.", minutes)
}

pub fn format_error_alert(error: &str) -> String {
    format!("<b>ERROR</b>\n{}", truncate(error, 500))
}

pub fn format_lifecycle_alert(phase: &str, environment: &str) -> String {
    format!("<b>{}</b>\nEnvironment: {}", phase, environment)
}

pub fn format_daily_summary(
    trades: &[TradeRecord],
    portfolio: &Portfolio,
    parse_failure_rate: f64,
) -> String {
    let executed = trades.iter().filter(|t| t.is_executed()).count();
    let skipped = trades.len() - executed;
    let resolved: Vec<&TradeRecord> = trades.iter().filter(|t| t.actual_outcome.is_some()).collect();
    let day_pnl: f64 = resolved.iter().filter_map(|t| t.pnl).sum();

    let mut summary = format!(
        "<b>Daily Summary</b>\n\
         Executed: {} | Skipped: {} | Resolved: {}\n\
         Day PnL: ${:+.2}\n\
         Portfolio: ${:.2} (cash: ${:.2})\n\
         Drawdown: {:.1}% | Open: {}",
        executed,
        skipped,
        resolved.len(),
        day_pnl,
        portfolio.total_equity,
        portfolio.cash_balance,
        portfolio.max_drawdown * 100.0,
        portfolio.open_positions.len(),
    );
    if parse_failure_rate > 0.10 {
        summary.push_str(&format!(
            "\nWARNING: parse-failure rate {:.0}% suggests a prompt-format regression",
            parse_failure_rate * 100.0
        ));
    }
    summary
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
