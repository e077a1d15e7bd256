//! Language-model client with validated-JSON retry
//!
//! The model's output is untrusted input: every response goes through the
//! tolerant parser and schema validation before any number reaches the
//! decision engine. Exhausted retries record a parse failure and return
//! `None`; this client never propagates an error to the scan.

pub mod context;
pub mod keywords;

pub use context::build_context;
pub use keywords::KeywordExtractor;

use crate::error::{BotError, Result};
use crate::storage::Database;
use crate::types::{InfoType, SignalTag, SourceTier};
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_TOKENS: u32 = 500;

/// Validated model output for one market
#[derive(Debug, Clone)]
pub struct LmEstimate {
    pub probability: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub signal_tags: Vec<SignalTag>,
}

/// Client for an OpenAI-compatible chat-completions endpoint
pub struct LmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    db: Database,
}

impl LmClient {
    pub fn new(api_key: String, base_url: String, model: String, db: Database) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            base_url,
            model,
            db,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Raw completion call; tracks token cost per call
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": 0.1,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let data: serde_json::Value = resp.json().await?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| BotError::Protocol("empty completion response".into()))?
            .to_string();

        let tokens_in = data["usage"]["prompt_tokens"].as_i64().unwrap_or(0);
        let tokens_out = data["usage"]["completion_tokens"].as_i64().unwrap_or(0);
        self.db.increment_api_cost("lm", tokens_in, tokens_out).await?;

        Ok(content)
    }

    /// Call the model for a probability estimate with the full retry
    /// pipeline. Returns `None` when every attempt fails.
    pub async fn estimate(&self, context: &str, market_id: &str) -> Option<LmEstimate> {
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                // Linear backoff: 1s after the first failure, 2s after the second
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }

            let raw = match self.complete(context, DEFAULT_MAX_TOKENS).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(market_id, attempt, error = %e, "estimate call failed");
                    continue;
                }
            };

            let Some(parsed) = parse_json_tolerant(&raw) else {
                tracing::warn!(market_id, attempt, "estimate parse failed");
                continue;
            };
            match validate_estimate(&parsed) {
                Some(estimate) => return Some(estimate),
                None => {
                    tracing::warn!(market_id, attempt, "estimate validation failed");
                }
            }
        }

        tracing::error!(market_id, "all estimate attempts failed");
        if let Err(e) = self.db.record_parse_failure(market_id).await {
            tracing::warn!(market_id, error = %e, "failed to record parse failure");
        }
        None
    }
}

fn fence_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^```(?:json)?\s*\n?").unwrap())
}

fn fence_close_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)\n?```\s*$").unwrap())
}

fn object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap())
}

fn array_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[.*\]").unwrap())
}

/// Parse JSON with fallbacks: direct, fence-stripped, first `{...}` span
pub fn parse_json_tolerant(raw: &str) -> Option<serde_json::Value> {
    let text = raw.trim();
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }

    let opened = fence_open_re().replace_all(text, "");
    let stripped = fence_close_re().replace_all(&opened, "");
    if let Ok(v) = serde_json::from_str(stripped.trim()) {
        return Some(v);
    }

    if let Some(m) = object_re().find(text) {
        if let Ok(v) = serde_json::from_str(m.as_str()) {
            return Some(v);
        }
    }
    None
}

/// Extract a JSON array of strings from model output (keyword fallback)
pub fn parse_string_array(raw: &str) -> Option<Vec<String>> {
    let text = raw.trim();
    let candidate = if serde_json::from_str::<serde_json::Value>(text).is_ok() {
        text.to_string()
    } else {
        array_re().find(text)?.as_str().to_string()
    };
    let value: serde_json::Value = serde_json::from_str(&candidate).ok()?;
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// Coerce a unit-interval number, accepting numeric strings
fn coerce_unit(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !(0.0..=1.0).contains(&n) {
        return None;
    }
    Some(n)
}

/// Validate the required estimate fields; reject anything out of range
fn validate_estimate(value: &serde_json::Value) -> Option<LmEstimate> {
    let obj = value.as_object()?;
    for field in ["estimated_probability", "confidence", "reasoning", "signal_info_types"] {
        if !obj.contains_key(field) {
            return None;
        }
    }

    let probability = coerce_unit(&value["estimated_probability"])?;
    let confidence = coerce_unit(&value["confidence"])?;
    let reasoning = value["reasoning"].as_str().unwrap_or("").to_string();

    let signal_tags = value["signal_info_types"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .map(|tag| SignalTag {
                    source_tier: tag["source_tier"]
                        .as_str()
                        .and_then(|s| SourceTier::from_str(s).ok())
                        .unwrap_or(SourceTier::S6),
                    info_type: tag["info_type"]
                        .as_str()
                        .and_then(|s| InfoType::from_str(s).ok())
                        .unwrap_or(InfoType::I5),
                    summary: tag["content_summary"].as_str().unwrap_or("").to_string(),
                    timestamp: None,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(LmEstimate {
        probability,
        confidence,
        reasoning,
        signal_tags,
    })
}
