//! Candidate ranking, cluster detection, and exposure-aware selection
//!
//! Correlated markets (same type, near-simultaneous resolution, high keyword
//! overlap) share a cluster id; a flat cap bounds total exposure per cluster.

use crate::engine::decision::score;
use crate::types::{MarketType, Position, TradeCandidate};
use std::collections::HashMap;

const RESOLUTION_PAIR_WINDOW_HOURS: f64 = 1.0;
const KEYWORD_JACCARD_THRESHOLD: f64 = 0.5;

/// Jaccard similarity over lowercased keyword sets
pub fn keyword_jaccard(a: &[String], b: &[String]) -> f64 {
    let set_a: std::collections::HashSet<String> = a.iter().map(|w| w.to_lowercase()).collect();
    let set_b: std::collections::HashSet<String> = b.iter().map(|w| w.to_lowercase()).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

/// Group candidates into correlated clusters. Clusters never cross
/// market_type; pairing requires resolution times within one hour and
/// keyword Jaccard >= 0.5. Returns market_id -> cluster_id.
pub fn detect_clusters(candidates: &[TradeCandidate]) -> HashMap<String, String> {
    let mut by_type: HashMap<MarketType, Vec<&TradeCandidate>> = HashMap::new();
    for c in candidates {
        by_type.entry(c.market.market_type).or_default().push(c);
    }

    let mut types: Vec<MarketType> = by_type.keys().copied().collect();
    types.sort();

    let mut clusters = HashMap::new();
    let mut counter = 0usize;

    for mtype in types {
        let mut group = by_type.remove(&mtype).unwrap_or_default();
        group.sort_by(|a, b| {
            a.resolution_hours
                .partial_cmp(&b.resolution_hours)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.market.market_id.cmp(&b.market.market_id))
        });

        let mut assigned = vec![false; group.len()];
        for i in 0..group.len() {
            if assigned[i] {
                continue;
            }
            counter += 1;
            let cluster_id = format!("cluster_{}", counter);
            clusters.insert(group[i].market.market_id.clone(), cluster_id.clone());
            assigned[i] = true;

            for j in (i + 1)..group.len() {
                if assigned[j] {
                    continue;
                }
                let within_window = (group[i].resolution_hours - group[j].resolution_hours).abs()
                    <= RESOLUTION_PAIR_WINDOW_HOURS;
                if within_window
                    && keyword_jaccard(&group[i].market.keywords, &group[j].market.keywords)
                        >= KEYWORD_JACCARD_THRESHOLD
                {
                    clusters.insert(group[j].market.market_id.clone(), cluster_id.clone());
                    assigned[j] = true;
                }
            }
        }
    }

    clusters
}

fn cluster_exposure(
    cluster_id: &str,
    open_positions: &[Position],
    pending: &[TradeCandidate],
    clusters: &HashMap<String, String>,
) -> f64 {
    let open: f64 = open_positions
        .iter()
        .filter(|p| {
            p.market_cluster_id.as_deref() == Some(cluster_id)
                || clusters.get(&p.market_id).map(String::as_str) == Some(cluster_id)
        })
        .map(|p| p.size_usd)
        .sum();
    let pending: f64 = pending
        .iter()
        .filter(|c| c.market_cluster_id.as_deref() == Some(cluster_id))
        .map(|c| c.position_size)
        .sum();
    open + pending
}

/// Score, rank, and select candidates under the daily cap and the cluster
/// exposure limit. Returns (to_execute, skipped); skipped candidates carry
/// their rejection reason.
pub fn select_trades(
    mut candidates: Vec<TradeCandidate>,
    remaining_cap: usize,
    open_positions: &[Position],
    bankroll: f64,
    max_cluster_exposure_pct: f64,
) -> (Vec<TradeCandidate>, Vec<TradeCandidate>) {
    if candidates.is_empty() {
        return (Vec::new(), Vec::new());
    }

    for c in &mut candidates {
        c.score = score(c.calculated_edge, c.adjusted_confidence, c.resolution_hours);
    }

    let clusters = detect_clusters(&candidates);
    for c in &mut candidates {
        c.market_cluster_id = clusters.get(&c.market.market_id).cloned();
    }

    // Equal scores tie-break deterministically by market_id
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.market.market_id.cmp(&b.market.market_id))
    });

    let cluster_cap = max_cluster_exposure_pct * bankroll;
    let mut to_execute: Vec<TradeCandidate> = Vec::new();
    let mut skipped: Vec<TradeCandidate> = Vec::new();

    for mut c in candidates {
        if to_execute.len() >= remaining_cap {
            c.skip_reason = Some("ranked_below_cutoff".to_string());
            skipped.push(c);
            continue;
        }

        if let Some(cluster_id) = c.market_cluster_id.clone() {
            let existing = cluster_exposure(&cluster_id, open_positions, &to_execute, &clusters);
            if existing + c.position_size > cluster_cap {
                c.skip_reason = Some("cluster_exposure_limit".to_string());
                skipped.push(c);
                continue;
            }
        }

        to_execute.push(c);
    }

    (to_execute, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Market, Side};

    fn candidate(id: &str, keywords: &[&str], resolution_hours: f64, size: f64) -> TradeCandidate {
        TradeCandidate {
            market: Market {
                market_id: id.to_string(),
                question: "q".to_string(),
                yes_price: 0.6,
                no_price: 0.4,
                resolution_time: None,
                hours_to_resolution: resolution_hours,
                volume_24h: 0.0,
                liquidity: 0.0,
                market_type: MarketType::Political,
                fee_rate: 0.02,
                keywords: keywords.iter().map(|s| s.to_string()).collect(),
                resolved: false,
                resolution: None,
            },
            raw_probability: 0.7,
            raw_confidence: 0.7,
            reasoning: String::new(),
            signal_tags: vec![],
            headline_only_signal: false,
            adjusted_probability: 0.7,
            adjusted_confidence: 0.7,
            calibration_adjustment: 0.0,
            signal_weight_adjustment: 0.0,
            market_type_adjustment: 0.0,
            calculated_edge: 0.08,
            score: 0.0,
            side: Side::BuyYes,
            position_size: size,
            kelly_fraction_used: 0.25,
            resolution_hours,
            market_price: 0.6,
            fee_rate: 0.02,
            orderbook_depth: 1000.0,
            tier: 1,
            market_cluster_id: None,
            skip_reason: None,
        }
    }

    #[test]
    fn jaccard_matches_hand_computation() {
        let a: Vec<String> = ["trump", "executive", "order"].iter().map(|s| s.to_string()).collect();
        let b: Vec<String> = ["trump", "executive", "immigration"].iter().map(|s| s.to_string()).collect();
        assert!((keyword_jaccard(&a, &b) - 0.5).abs() < 1e-12);
        assert_eq!(keyword_jaccard(&a, &[]), 0.0);
    }

    #[test]
    fn overlapping_markets_share_a_cluster() {
        let candidates = vec![
            candidate("a", &["trump", "executive", "order"], 6.0, 100.0),
            candidate("b", &["trump", "executive", "immigration"], 6.5, 100.0),
            candidate("c", &["oscars", "ceremony", "winner"], 6.2, 100.0),
        ];
        let clusters = detect_clusters(&candidates);
        assert_eq!(clusters["a"], clusters["b"]);
        assert_ne!(clusters["a"], clusters["c"]);
    }

    #[test]
    fn distant_resolutions_do_not_cluster() {
        let candidates = vec![
            candidate("a", &["trump", "executive", "order"], 6.0, 100.0),
            candidate("b", &["trump", "executive", "order"], 9.0, 100.0),
        ];
        let clusters = detect_clusters(&candidates);
        assert_ne!(clusters["a"], clusters["b"]);
    }

    #[test]
    fn clusters_never_cross_market_type() {
        let mut a = candidate("a", &["btc", "price", "close"], 1.0, 100.0);
        a.market.market_type = MarketType::Crypto15m;
        let b = candidate("b", &["btc", "price", "close"], 1.0, 100.0);
        let clusters = detect_clusters(&[a, b]);
        assert_ne!(clusters["a"], clusters["b"]);
    }

    #[test]
    fn cluster_exposure_rejection_scenario() {
        // Two clustered markets, existing open exposure 500, cap 600 (12% of 5000).
        // The first candidate (200) would push the cluster to 700: rejected.
        let candidates = vec![
            candidate("a", &["trump", "executive", "order"], 6.0, 200.0),
            candidate("b", &["trump", "executive", "immigration"], 6.5, 150.0),
        ];
        let clusters = detect_clusters(&candidates);
        let open = vec![Position {
            market_id: "held".to_string(),
            side: Side::BuyYes,
            entry_price: 0.5,
            size_usd: 500.0,
            current_value: 500.0,
            market_cluster_id: Some(clusters["a"].clone()),
        }];

        let (execute, skipped) = select_trades(candidates, 10, &open, 5000.0, 0.12);
        assert!(execute.is_empty());
        assert_eq!(skipped.len(), 2);
        assert!(skipped
            .iter()
            .all(|c| c.skip_reason.as_deref() == Some("cluster_exposure_limit")));
    }

    #[test]
    fn accepted_clusters_respect_the_exposure_law() {
        let candidates = vec![
            candidate("a", &["trump", "executive", "order"], 6.0, 300.0),
            candidate("b", &["trump", "executive", "order"], 6.1, 250.0),
            candidate("c", &["trump", "executive", "order"], 6.2, 250.0),
        ];
        let (execute, skipped) = select_trades(candidates, 10, &[], 5000.0, 0.12);

        // Cap is 600: only the first two fit (300 + 250)
        assert_eq!(execute.len(), 2);
        assert_eq!(skipped.len(), 1);
        let total: f64 = execute.iter().map(|c| c.position_size).sum();
        assert!(total <= 600.0 + 1e-9);
    }

    #[test]
    fn cap_rejections_use_ranked_below_cutoff() {
        let mut a = candidate("a", &["alpha", "one"], 6.0, 100.0);
        a.calculated_edge = 0.10;
        let mut b = candidate("b", &["beta", "two"], 6.0, 100.0);
        b.calculated_edge = 0.05;
        let (execute, skipped) = select_trades(vec![a, b], 1, &[], 5000.0, 0.12);
        assert_eq!(execute.len(), 1);
        assert_eq!(execute[0].market.market_id, "a");
        assert_eq!(skipped[0].skip_reason.as_deref(), Some("ranked_below_cutoff"));
    }

    #[test]
    fn equal_scores_tie_break_by_market_id() {
        let a = candidate("zeta", &["alpha", "one"], 6.0, 100.0);
        let b = candidate("alpha", &["beta", "two"], 6.0, 100.0);
        let (execute, _) = select_trades(vec![a, b], 1, &[], 5000.0, 0.12);
        assert_eq!(execute[0].market.market_id, "alpha");

        // Same outcome regardless of input order
        let a = candidate("zeta", &["alpha", "one"], 6.0, 100.0);
        let b = candidate("alpha", &["beta", "two"], 6.0, 100.0);
        let (execute, _) = select_trades(vec![b, a], 1, &[], 5000.0, 0.12);
        assert_eq!(execute[0].market.market_id, "alpha");
    }

    #[test]
    fn scores_are_computed_during_selection() {
        let c = candidate("a", &["alpha", "one"], 6.0, 100.0);
        let (execute, _) = select_trades(vec![c], 1, &[], 5000.0, 0.12);
        let expected = 0.08 * 0.7 / 6.0;
        assert!((execute[0].score - expected).abs() < 1e-12);
    }
}
