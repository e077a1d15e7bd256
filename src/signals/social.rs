//! Social-post collector
//!
//! Queries recent posts for a keyword set, pre-filters low-signal accounts,
//! deduplicates near-identical posts, classifies source tiers, and returns
//! the ten most credible signals. Any transport failure returns the empty
//! list after logging; the scan never stalls on the social API.

use crate::signals::classifier::{SourceMeta, SourceRegistry};
use crate::storage::Database;
use crate::types::{Signal, SourceKind};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.twitterapi.io/twitter";
const MAX_RAW_POSTS: usize = 50;
const MAX_SIGNALS: usize = 10;
const MIN_FOLLOWERS: u64 = 1_000;
const MIN_ENGAGEMENT: u64 = 10;
const MAX_POST_AGE_HOURS: i64 = 2;
const DEDUP_OVERLAP: f64 = 0.8;

/// One post after tolerant extraction from the API payload
#[derive(Debug, Clone)]
struct RawPost {
    text: String,
    handle: String,
    name: String,
    verified: bool,
    followers: u64,
    following: u64,
    bio: String,
    engagement: u64,
    created_at: Option<DateTime<Utc>>,
}

impl RawPost {
    fn from_value(v: &serde_json::Value) -> Option<Self> {
        let author = &v["author"];
        let text = v["text"].as_str()?.to_string();
        Some(Self {
            text,
            handle: author["screen_name"].as_str().unwrap_or("").to_string(),
            name: author["name"].as_str().unwrap_or("").to_string(),
            verified: author["verified"].as_bool().unwrap_or(false),
            followers: author["followers_count"].as_u64().unwrap_or(0),
            following: author["following_count"]
                .as_u64()
                .or_else(|| author["friends_count"].as_u64())
                .unwrap_or(0),
            bio: author["bio"]
                .as_str()
                .or_else(|| author["description"].as_str())
                .unwrap_or("")
                .to_string(),
            engagement: v["engagement_score"].as_u64().unwrap_or(0),
            created_at: v["created_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

fn is_bot_account(post: &RawPost) -> bool {
    let name = format!("{} {}", post.handle, post.name).to_lowercase();
    if ["bot", "autopost", "feed"].iter().any(|p| name.contains(p)) {
        return true;
    }
    post.followers > 0 && post.following > 0 && post.following as f64 / post.followers as f64 > 50.0
}

fn passes_prefilter(post: &RawPost, now: DateTime<Utc>) -> bool {
    if post.followers < MIN_FOLLOWERS || post.engagement < MIN_ENGAGEMENT || is_bot_account(post) {
        return false;
    }
    match post.created_at {
        Some(ts) => now - ts <= Duration::hours(MAX_POST_AGE_HOURS),
        None => true,
    }
}

fn token_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn dedup_posts(posts: Vec<RawPost>) -> Vec<RawPost> {
    let mut seen_sets: Vec<HashSet<String>> = Vec::new();
    let mut out = Vec::new();
    for post in posts {
        let words: HashSet<String> = post
            .text
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            continue;
        }
        if seen_sets.iter().any(|seen| token_overlap(&words, seen) >= DEDUP_OVERLAP) {
            continue;
        }
        seen_sets.push(words);
        out.push(post);
    }
    out
}

/// Social collector over a keyword-search API
pub struct SocialCollector {
    http: Client,
    api_key: String,
    base_url: String,
    registry: Arc<SourceRegistry>,
    db: Database,
}

impl SocialCollector {
    pub fn new(api_key: String, registry: Arc<SourceRegistry>, db: Database) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            registry,
            db,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Collect up to ten credibility-sorted signals for a keyword set
    pub async fn signals_for(&self, keywords: &[String]) -> Vec<Signal> {
        if keywords.is_empty() {
            return Vec::new();
        }
        let now = Utc::now();
        let query = keywords.join(" OR ");
        let posts = match self.search(&query).await {
            Ok(posts) => posts,
            Err(e) => {
                tracing::warn!(error = %e, query = %query, "social search failed");
                return Vec::new();
            }
        };

        let filtered: Vec<RawPost> = posts
            .into_iter()
            .filter(|p| passes_prefilter(p, now))
            .collect();
        let deduped = dedup_posts(filtered);

        let mut signals: Vec<Signal> = deduped
            .into_iter()
            .map(|post| {
                let tier = self.registry.classify(&SourceMeta {
                    kind: Some(SourceKind::Social),
                    handle: Some(&post.handle),
                    verified: post.verified,
                    followers: post.followers,
                    bio: Some(&post.bio),
                    ..Default::default()
                });
                let content: String = post.text.chars().take(280).collect();
                Signal {
                    source_kind: SourceKind::Social,
                    source_tier: tier,
                    info_type: None,
                    content,
                    credibility: tier.credibility(),
                    author: post.handle,
                    followers: post.followers,
                    engagement: post.engagement,
                    timestamp: post.created_at,
                    headline_only: false,
                }
            })
            .collect();

        signals.sort_by(|a, b| {
            b.credibility
                .partial_cmp(&a.credibility)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        signals.truncate(MAX_SIGNALS);
        signals
    }

    async fn search(&self, query: &str) -> crate::error::Result<Vec<RawPost>> {
        let resp = self
            .http
            .get(format!("{}/tweet/advanced_search", self.base_url))
            .header("X-API-Key", &self.api_key)
            .query(&[("query", query), ("queryType", "Latest")])
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            tracing::warn!("social API rate limited");
            return Ok(Vec::new());
        }
        let resp = resp.error_for_status()?;
        let data: serde_json::Value = resp.json().await?;

        if let Err(e) = self.db.increment_api_cost("social", 0, 0).await {
            tracing::warn!(error = %e, "failed to record social API cost");
        }

        let posts = data["tweets"]
            .as_array()
            .or_else(|| data["data"].as_array())
            .cloned()
            .unwrap_or_default();
        Ok(posts
            .iter()
            .take(MAX_RAW_POSTS)
            .filter_map(RawPost::from_value)
            .collect())
    }
}
