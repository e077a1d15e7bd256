//! News headline collector
//!
//! Polls the configured feeds, drops entries older than two hours or already
//! seen, classifies the source tier, and emits headline-only signals. The
//! dedup map is owned here and pruned of >24h entries at the start of each
//! call. A parse failure for one feed never affects the others.

use crate::error::{BotError, Result};
use crate::signals::classifier::{SourceMeta, SourceRegistry};
use crate::types::{Signal, SourceKind};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

const MAX_ENTRIES_PER_FEED: usize = 10;
const MAX_HEADLINE_AGE_HOURS: i64 = 2;
const SEEN_RETENTION_HOURS: i64 = 24;

/// One configured news feed
#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub name: String,
    pub url: String,
    pub domain: String,
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    url: String,
    domain: String,
}

#[derive(Debug, Deserialize)]
struct RawFeeds {
    feeds: BTreeMap<String, RawFeed>,
}

/// Load the feed list from the news-feeds YAML document
pub fn load_feeds(path: &Path) -> Result<Vec<FeedSpec>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| BotError::Config(format!("cannot read feeds {}: {}", path.display(), e)))?;
    let parsed: RawFeeds = serde_yaml::from_str(&raw)
        .map_err(|e| BotError::Config(format!("invalid feeds yaml: {}", e)))?;
    Ok(parsed
        .feeds
        .into_iter()
        .map(|(name, f)| FeedSpec {
            name,
            url: f.url,
            domain: f.domain,
        })
        .collect())
}

fn parse_entry_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// News collector with bounded dedup memory
pub struct NewsCollector {
    http: Client,
    feeds: Vec<FeedSpec>,
    registry: Arc<SourceRegistry>,
    seen_headlines: HashMap<String, DateTime<Utc>>,
}

impl NewsCollector {
    pub fn new(feeds: Vec<FeedSpec>, registry: Arc<SourceRegistry>) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            feeds,
            registry,
            seen_headlines: HashMap::new(),
        }
    }

    fn prune_seen(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(SEEN_RETENTION_HOURS);
        self.seen_headlines.retain(|_, first_seen| *first_seen > cutoff);
    }

    /// Fetch all configured feeds and return fresh, deduplicated signals
    pub async fn collect(&mut self) -> Vec<Signal> {
        let now = Utc::now();
        self.prune_seen(now);

        let feeds = self.feeds.clone();
        let mut signals = Vec::new();
        for feed in &feeds {
            match self.fetch_entries(feed).await {
                Ok(entries) => signals.extend(self.signals_from_entries(feed, entries, now)),
                Err(e) => {
                    tracing::warn!(feed = %feed.name, error = %e, "news feed failed");
                }
            }
        }
        signals
    }

    async fn fetch_entries(&self, feed: &FeedSpec) -> Result<Vec<(String, Option<DateTime<Utc>>)>> {
        let bytes = self.http.get(&feed.url).send().await?.bytes().await?;
        let channel = rss::Channel::read_from(&bytes[..])
            .map_err(|e| BotError::Protocol(format!("feed {}: {}", feed.name, e)))?;
        Ok(channel
            .items()
            .iter()
            .take(MAX_ENTRIES_PER_FEED)
            .filter_map(|item| {
                item.title()
                    .map(|t| (t.trim().to_string(), item.pub_date().and_then(parse_entry_date)))
            })
            .collect())
    }

    fn signals_from_entries(
        &mut self,
        feed: &FeedSpec,
        entries: Vec<(String, Option<DateTime<Utc>>)>,
        now: DateTime<Utc>,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();
        for (headline, published) in entries {
            if headline.is_empty() || self.seen_headlines.contains_key(&headline) {
                continue;
            }
            self.seen_headlines.insert(headline.clone(), now);

            if let Some(ts) = published {
                if now - ts > Duration::hours(MAX_HEADLINE_AGE_HOURS) {
                    continue;
                }
            }

            let tier = self.registry.classify(&SourceMeta {
                kind: Some(SourceKind::News),
                domain: Some(&feed.domain),
                ..Default::default()
            });

            signals.push(Signal {
                source_kind: SourceKind::News,
                source_tier: tier,
                info_type: None,
                content: headline,
                credibility: tier.credibility(),
                author: feed.name.clone(),
                followers: 0,
                engagement: 0,
                timestamp: Some(published.unwrap_or(now)),
                headline_only: true,
            });
        }
        signals
    }
}
