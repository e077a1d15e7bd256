//! Source-tier classification
//!
//! Maps a signal's provenance to a credibility tier S1-S6 using the
//! known-sources registry loaded once at startup:
//!
//! * S1 - official primary sources (government / institutional)
//! * S2 - wire services
//! * S3 - institutional media
//! * S4 - verified domain experts (verified + 50k followers + expert bio)
//! * S5 - market data feeds
//! * S6 - everything else

use crate::error::{BotError, Result};
use crate::types::{SourceKind, SourceTier};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

const S4_MIN_FOLLOWERS: u64 = 50_000;

/// Provenance metadata for one signal. Missing fields classify to S6,
/// never to a failure.
#[derive(Debug, Clone, Default)]
pub struct SourceMeta<'a> {
    pub kind: Option<SourceKind>,
    pub domain: Option<&'a str>,
    pub handle: Option<&'a str>,
    pub verified: bool,
    pub followers: u64,
    pub bio: Option<&'a str>,
}

#[derive(Debug, Deserialize, Default)]
struct RawGroup {
    #[serde(default)]
    handles: Vec<String>,
    #[serde(default)]
    rss_domains: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSources {
    #[serde(default)]
    official_sources: RawGroup,
    #[serde(default)]
    wire_services: RawGroup,
    #[serde(default)]
    institutional_media: RawGroup,
    #[serde(default)]
    expert_bio_keywords: Vec<String>,
}

/// Known-sources registry with pre-lowered lookup sets
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    official_handles: HashSet<String>,
    wire_handles: HashSet<String>,
    institutional_handles: HashSet<String>,
    official_domains: HashSet<String>,
    wire_domains: HashSet<String>,
    institutional_domains: HashSet<String>,
    expert_keywords: HashSet<String>,
}

fn normalize_handle(raw: &str) -> String {
    let h = raw.trim().to_lowercase();
    if h.starts_with('@') {
        h
    } else {
        format!("@{}", h)
    }
}

fn normalize_domain(raw: &str) -> String {
    let mut d = raw.trim().to_lowercase();
    for prefix in ["https://", "http://", "www."] {
        if let Some(rest) = d.strip_prefix(prefix) {
            d = rest.to_string();
        }
    }
    d.trim_end_matches('/').to_string()
}

impl SourceRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BotError::Config(format!("cannot read known sources {}: {}", path.display(), e))
        })?;
        let parsed: RawSources = serde_yaml::from_str(&raw)
            .map_err(|e| BotError::Config(format!("invalid known sources yaml: {}", e)))?;
        Ok(Self::from_raw(parsed))
    }

    fn from_raw(raw: RawSources) -> Self {
        let handles = |group: &RawGroup| group.handles.iter().map(|h| normalize_handle(h)).collect();
        let domains = |group: &RawGroup| group.rss_domains.iter().map(|d| normalize_domain(d)).collect();
        Self {
            official_handles: handles(&raw.official_sources),
            wire_handles: handles(&raw.wire_services),
            institutional_handles: handles(&raw.institutional_media),
            official_domains: domains(&raw.official_sources),
            wire_domains: domains(&raw.wire_services),
            institutional_domains: domains(&raw.institutional_media),
            expert_keywords: raw
                .expert_bio_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    /// Classify a signal's provenance into a tier. Pure and infallible.
    pub fn classify(&self, meta: &SourceMeta<'_>) -> SourceTier {
        match meta.kind {
            Some(SourceKind::MarketData) => SourceTier::S5,
            Some(SourceKind::News) => self.classify_domain(meta.domain.unwrap_or("")),
            Some(SourceKind::Social) => self.classify_social(meta),
            None => SourceTier::S6,
        }
    }

    fn classify_domain(&self, raw: &str) -> SourceTier {
        let domain = normalize_domain(raw);
        if domain.is_empty() {
            return SourceTier::S6;
        }
        let matches = |known: &HashSet<String>| {
            known.contains(&domain) || known.iter().any(|k| domain.ends_with(&format!(".{}", k)))
        };
        if matches(&self.official_domains) {
            SourceTier::S1
        } else if matches(&self.wire_domains) {
            SourceTier::S2
        } else if matches(&self.institutional_domains) {
            SourceTier::S3
        } else {
            SourceTier::S6
        }
    }

    fn classify_social(&self, meta: &SourceMeta<'_>) -> SourceTier {
        let handle = normalize_handle(meta.handle.unwrap_or(""));
        if handle.len() > 1 {
            if self.official_handles.contains(&handle) {
                return SourceTier::S1;
            }
            if self.wire_handles.contains(&handle) {
                return SourceTier::S2;
            }
            if self.institutional_handles.contains(&handle) {
                return SourceTier::S3;
            }
        }

        if meta.verified
            && meta.followers >= S4_MIN_FOLLOWERS
            && self.bio_has_expert_keyword(meta.bio.unwrap_or(""))
        {
            return SourceTier::S4;
        }

        SourceTier::S6
    }

    fn bio_has_expert_keyword(&self, bio: &str) -> bool {
        if bio.is_empty() || self.expert_keywords.is_empty() {
            return false;
        }
        bio.to_lowercase()
            .split(|c: char| c.is_whitespace() || matches!(c, '/' | '|' | ','))
            .any(|token| self.expert_keywords.contains(token))
    }
}
