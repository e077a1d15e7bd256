//! Search-keyword extraction for market questions
//!
//! Regex pass first (named entities, acronyms, tickers); the model is only
//! consulted when the regex pass finds fewer than two entities. Results are
//! cached per market for the process lifetime.

use crate::llm::{parse_string_array, LmClient};
use crate::types::MarketType;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::Mutex;

const MAX_KEYWORDS: usize = 5;
const MIN_REGEX_ENTITIES: usize = 2;

fn entity_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // Proper-noun bigrams ("Donald Trump", "Federal Reserve Board")
            Regex::new(r"\b[A-Z][a-z]+(?:\s[A-Z][a-z]+)+\b").unwrap(),
            // Acronyms ("GDP", "FOMC")
            Regex::new(r"\b[A-Z]{2,6}\b").unwrap(),
            // Ticker forms ("$BTC")
            Regex::new(r"\$[A-Z]{1,5}\b").unwrap(),
        ]
    })
}

const STOP_WORDS: &[&str] = &[
    "THE", "AND", "FOR", "BUT", "NOT", "YES", "WILL", "BE", "BY", "IN", "ON", "AT", "TO",
];

fn type_supplements(market_type: MarketType) -> &'static [&'static str] {
    match market_type {
        MarketType::Political => &["election", "vote", "polls"],
        MarketType::Economic => &["economy", "market", "federal reserve"],
        MarketType::Crypto15m => &["crypto", "bitcoin", "trading"],
        MarketType::Sports => &["game", "match", "score"],
        MarketType::Cultural => &["entertainment", "media"],
        MarketType::Regulatory => &["regulation", "policy", "ruling"],
    }
}

/// Regex entity pass over a market question
fn regex_entities(question: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for pattern in entity_patterns() {
        for m in pattern.find_iter(question) {
            let cleaned = m.as_str().trim().trim_start_matches('$').to_string();
            if cleaned.len() > 1
                && !STOP_WORDS.contains(&cleaned.to_uppercase().as_str())
                && !out.iter().any(|e| e.eq_ignore_ascii_case(&cleaned))
            {
                out.push(cleaned);
            }
        }
    }
    out
}

fn fallback_words(question: &str) -> Vec<String> {
    question
        .split_whitespace()
        .filter(|w| w.len() > 4)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .take(MAX_KEYWORDS)
        .collect()
}

/// Keyword extractor with a per-market process-lifetime cache
pub struct KeywordExtractor {
    cache: Mutex<HashMap<String, Vec<String>>>,
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Derive up to five search keywords for a market question. Pass
    /// `lm: None` to stay on the regex path (observe-only scans must not
    /// touch the model).
    pub async fn extract(
        &self,
        market_id: &str,
        question: &str,
        market_type: MarketType,
        lm: Option<&LmClient>,
    ) -> Vec<String> {
        if let Some(cached) = self.cache.lock().await.get(market_id) {
            return cached.clone();
        }

        let mut keywords = regex_entities(question);
        let regex_sufficient = keywords.len() >= MIN_REGEX_ENTITIES;
        if !regex_sufficient {
            let from_model = match lm {
                Some(lm) => self.ask_model(question, lm).await,
                None => None,
            };
            match from_model {
                Some(from_model) if !from_model.is_empty() => keywords = from_model,
                _ => {
                    keywords.extend(
                        type_supplements(market_type)
                            .iter()
                            .take(3)
                            .map(|s| s.to_string()),
                    );
                }
            }
        }
        if keywords.is_empty() {
            keywords = fallback_words(question);
        }
        keywords.truncate(MAX_KEYWORDS);

        // A regex-only pass taken because the model was unavailable should
        // not pin the cache for future scans.
        if lm.is_some() || regex_sufficient {
            self.cache
                .lock()
                .await
                .insert(market_id.to_string(), keywords.clone());
        }
        keywords
    }

    async fn ask_model(&self, question: &str, lm: &LmClient) -> Option<Vec<String>> {
        let prompt = format!(
            "Return a JSON array of 3-5 short search keywords for this prediction market question. JSON array only, no other text.\n\nQuestion: {}",
            question
        );
        match lm.complete(&prompt, 100).await {
            Ok(raw) => parse_string_array(&raw).map(|mut kws| {
                kws.truncate(MAX_KEYWORDS);
                kws
            }),
            Err(e) => {
                tracing::warn!(error = %e, "keyword fallback call failed");
                None
            }
        }
    }
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}
