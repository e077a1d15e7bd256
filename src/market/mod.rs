//! Market data source
//!
//! The trait is the only surface the engine consumes; the HTTP
//! implementation speaks the gamma-style market API and the CLOB book/order
//! endpoints.

use crate::error::{BotError, Result};
use crate::types::{Market, MarketType, OrderBook, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
const DEFAULT_CLOB_URL: &str = "https://clob.polymarket.com";
const TIER1_MIN_HOURS: f64 = 0.25;
const TIER1_MAX_HOURS: f64 = 168.0;
const TIER1_MIN_LIQUIDITY: f64 = 5_000.0;
const ORDERBOOK_LEVELS: usize = 5;

/// Result of a live order placement
#[derive(Debug, Clone)]
pub struct FillResult {
    pub filled: bool,
    pub executed_price: f64,
}

/// Read (and in live mode, trade) interface over the market venue
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Active candidate markets passing the tier filter
    async fn list_active(&self, tier: u8) -> Result<Vec<Market>>;
    /// Top-level bid/ask sums for a market
    async fn get_orderbook(&self, market_id: &str) -> Result<OrderBook>;
    /// Single market snapshot including resolution state
    async fn get_market(&self, market_id: &str) -> Result<Option<Market>>;
    /// Place a live order
    async fn place_order(&self, market_id: &str, side: Side, price: f64, size: f64)
        -> Result<FillResult>;
}

/// Classify a market question into a market type by keyword match
pub fn classify_market_type(question: &str) -> MarketType {
    let q = question.to_lowercase();
    let table: [(MarketType, &[&str]); 6] = [
        (
            MarketType::Crypto15m,
            &["bitcoin", "btc", "ethereum", "eth", "crypto", "solana", "sol"],
        ),
        (
            MarketType::Economic,
            &["gdp", "inflation", "fed", "interest rate", "unemployment", "recession", "cpi", "fomc"],
        ),
        (
            MarketType::Sports,
            &["nba", "nfl", "mlb", "nhl", "soccer", "football", "basketball", "championship", "super bowl"],
        ),
        (
            MarketType::Cultural,
            &["oscar", "grammy", "emmy", "movie", "album", "celebrity", "entertainment"],
        ),
        (
            MarketType::Regulatory,
            &["sec", "regulation", "lawsuit", "ban", "fda", "ruling", "court"],
        ),
        (
            MarketType::Political,
            &["president", "election", "congress", "senate", "vote", "governor", "democrat", "republican"],
        ),
    ];
    for (mtype, keywords) in table {
        if keywords.iter().any(|kw| q.contains(kw)) {
            return mtype;
        }
    }
    MarketType::Political
}

/// Coarse keywords from the question text (used for cluster detection)
pub fn question_keywords(question: &str) -> Vec<String> {
    question
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 3)
        .take(10)
        .collect()
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    id: Option<serde_json::Value>,
    question: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
    #[serde(rename = "volume24hr")]
    volume_24h: Option<serde_json::Value>,
    liquidity: Option<serde_json::Value>,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    resolved: bool,
    #[serde(rename = "outcomePrices")]
    outcome_prices: Option<serde_json::Value>,
    #[serde(rename = "resolutionPrices")]
    resolution_prices: Option<serde_json::Value>,
    #[serde(rename = "clobTokenIds")]
    clob_token_ids: Option<serde_json::Value>,
}

fn value_to_f64(v: &Option<serde_json::Value>) -> f64 {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Prices arrive either as a JSON array or as a JSON-encoded string
fn parse_price_list(v: &Option<serde_json::Value>) -> Vec<f64> {
    let to_f64 = |item: &serde_json::Value| -> Option<f64> {
        item.as_f64().or_else(|| item.as_str().and_then(|s| s.parse().ok()))
    };
    match v {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(to_f64).collect(),
        Some(serde_json::Value::String(s)) => serde_json::from_str::<Vec<serde_json::Value>>(s)
            .map(|items| items.iter().filter_map(to_f64).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn parse_string_list(v: &Option<serde_json::Value>) -> Vec<String> {
    match v {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        Some(serde_json::Value::String(s)) => serde_json::from_str(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// HTTP market source with a market-id -> CLOB token cache
pub struct PolymarketSource {
    http: Client,
    gamma_url: String,
    clob_url: String,
    api_key: String,
    tier1_fee_rate: f64,
    tier2_fee_rate: f64,
    token_ids: Mutex<HashMap<String, String>>,
}

impl PolymarketSource {
    pub fn new(api_key: String, tier1_fee_rate: f64, tier2_fee_rate: f64) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            gamma_url: DEFAULT_GAMMA_URL.to_string(),
            clob_url: DEFAULT_CLOB_URL.to_string(),
            api_key,
            tier1_fee_rate,
            tier2_fee_rate,
            token_ids: Mutex::new(HashMap::new()),
        }
    }

    fn convert(&self, raw: &GammaMarket, tier: u8, now: DateTime<Utc>) -> Option<Market> {
        let question = raw.question.clone()?;
        let market_id = match &raw.id {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return None,
        };

        let prices = parse_price_list(&raw.outcome_prices);
        let yes_price = prices.first().copied().unwrap_or(0.5);
        let no_price = prices.get(1).copied().unwrap_or(1.0 - yes_price);

        let resolution_time = raw
            .end_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let hours_to_resolution = resolution_time
            .map(|rt| ((rt - now).num_seconds() as f64 / 3600.0).max(0.0))
            .unwrap_or(0.0);

        let resolved = raw.closed || raw.resolved;
        let resolution = if resolved {
            let res_prices = parse_price_list(&raw.resolution_prices);
            res_prices.first().map(|p| *p > 0.5)
        } else {
            None
        };

        let tokens = parse_string_list(&raw.clob_token_ids);
        if let Some(yes_token) = tokens.first() {
            self.token_ids
                .lock()
                .expect("token cache poisoned")
                .insert(market_id.clone(), yes_token.clone());
        }

        Some(Market {
            market_type: classify_market_type(&question),
            keywords: question_keywords(&question),
            market_id,
            yes_price,
            no_price,
            resolution_time,
            hours_to_resolution,
            volume_24h: value_to_f64(&raw.volume_24h),
            liquidity: value_to_f64(&raw.liquidity),
            fee_rate: if tier == 1 { self.tier1_fee_rate } else { self.tier2_fee_rate },
            resolved,
            resolution,
            question,
        })
    }

    fn passes_tier_filter(market: &Market, tier: u8) -> bool {
        match tier {
            1 => {
                market.hours_to_resolution >= TIER1_MIN_HOURS
                    && market.hours_to_resolution <= TIER1_MAX_HOURS
                    && market.liquidity >= TIER1_MIN_LIQUIDITY
            }
            _ => market.market_type == MarketType::Crypto15m,
        }
    }
}

#[async_trait]
impl MarketSource for PolymarketSource {
    async fn list_active(&self, tier: u8) -> Result<Vec<Market>> {
        let resp = self
            .http
            .get(format!("{}/markets", self.gamma_url))
            .query(&[("active", "true"), ("closed", "false"), ("limit", "100")])
            .send()
            .await?;
        if resp.status().as_u16() == 429 {
            tracing::warn!("market API rate limited");
            return Ok(Vec::new());
        }
        let raw: Vec<GammaMarket> = resp.error_for_status()?.json().await?;

        let now = Utc::now();
        let total = raw.len();
        let markets: Vec<Market> = raw
            .iter()
            .filter_map(|m| self.convert(m, tier, now))
            .filter(|m| !m.resolved && Self::passes_tier_filter(m, tier))
            .collect();

        tracing::info!(tier, total_from_api = total, passed = markets.len(), "market filter results");
        Ok(markets)
    }

    async fn get_orderbook(&self, market_id: &str) -> Result<OrderBook> {
        let token_id = self
            .token_ids
            .lock()
            .expect("token cache poisoned")
            .get(market_id)
            .cloned();
        let Some(token_id) = token_id else {
            tracing::warn!(market_id, "no CLOB token cached for market");
            return Ok(OrderBook {
                market_id: market_id.to_string(),
                ..Default::default()
            });
        };

        let data: serde_json::Value = self
            .http
            .get(format!("{}/book", self.clob_url))
            .query(&[("token_id", token_id.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let level_sizes = |side: &str| -> Vec<f64> {
            data[side]
                .as_array()
                .map(|levels| {
                    levels
                        .iter()
                        .take(ORDERBOOK_LEVELS)
                        .filter_map(|l| {
                            l["size"]
                                .as_str()
                                .and_then(|s| s.parse().ok())
                                .or_else(|| l["size"].as_f64())
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(OrderBook {
            market_id: market_id.to_string(),
            bids: level_sizes("bids"),
            asks: level_sizes("asks"),
            timestamp: Some(Utc::now()),
        })
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        let resp = self
            .http
            .get(format!("{}/markets/{}", self.gamma_url, market_id))
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let raw: GammaMarket = resp.error_for_status()?.json().await?;
        Ok(self.convert(&raw, 1, Utc::now()))
    }

    async fn place_order(
        &self,
        market_id: &str,
        side: Side,
        price: f64,
        size: f64,
    ) -> Result<FillResult> {
        let token_id = self
            .token_ids
            .lock()
            .expect("token cache poisoned")
            .get(market_id)
            .cloned()
            .ok_or_else(|| BotError::Api(format!("no CLOB token for market {}", market_id)))?;

        let body = serde_json::json!({
            "tokenID": token_id,
            "side": if side == Side::BuyYes { "BUY" } else { "SELL" },
            "price": price,
            "size": size,
        });
        let data: serde_json::Value = self
            .http
            .post(format!("{}/order", self.clob_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if data["status"].as_str() == Some("error") {
            return Err(BotError::Api(format!(
                "order rejected: {}",
                data["error"].as_str().unwrap_or("unknown")
            )));
        }

        Ok(FillResult {
            filled: true,
            executed_price: data["price"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| data["price"].as_f64())
                .unwrap_or(price),
        })
    }
}
