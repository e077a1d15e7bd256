//! Prompt construction for the probability estimate call

use crate::types::{Market, OrderBook, Signal};

const MAX_SIGNALS_IN_PROMPT: usize = 7;
const MAX_SIGNAL_CHARS: usize = 200;

/// Format market, order book and the top signals into the estimate prompt.
/// The response contract is a strict JSON object; the client validates it.
pub fn build_context(market: &Market, signals: &[Signal], orderbook: &OrderBook) -> String {
    let mut top: Vec<&Signal> = signals.iter().collect();
    top.sort_by(|a, b| {
        b.credibility
            .partial_cmp(&a.credibility)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    top.truncate(MAX_SIGNALS_IN_PROMPT);

    let signals_text = if top.is_empty() {
        "  No signals available.".to_string()
    } else {
        top.iter()
            .enumerate()
            .map(|(i, s)| {
                let content: String = s.content.chars().take(MAX_SIGNAL_CHARS).collect();
                let headline_tag = if s.headline_only { " [HEADLINE-ONLY]" } else { "" };
                format!(
                    "  {}. [{}] @{} (cred={:.2}): {}{}",
                    i + 1,
                    s.source_tier.as_str(),
                    s.author,
                    s.credibility,
                    content,
                    headline_tag
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"MARKET ANALYSIS REQUEST

Market Question: {question}
Current YES price: {yes:.4}
Current NO price: {no:.4}
Resolution: {hours:.1} hours
Volume (24h): ${volume:.0}
Liquidity: ${liquidity:.0}
Orderbook depth: ${depth:.0} (skew: {skew:+.2})

SIGNALS:
{signals}

INSTRUCTIONS:
1. Analyze the signals and market context
2. Classify each signal's information type:
   - I1: deterministic outcome (official announcement, confirmed event)
   - I2: strong directional evidence (expert analysis, institutional report)
   - I3: weak directional evidence (polls, indicators)
   - I4: sentiment shift (order flow, social momentum)
   - I5: contradictory or speculative (rumors, unconfirmed reports)
3. List the key signals you used and any contradictions between them
4. Estimate the probability of the YES outcome
5. Rate your confidence in the estimate

Respond with ONLY this JSON (no markdown, no extra text):
{{"estimated_probability": 0.XX, "confidence": 0.XX, "reasoning": "...", "key_signals": ["..."], "contradictions": ["..."], "signal_info_types": [{{"source_tier": "SX", "info_type": "IX", "content_summary": "..."}}]}}"#,
        question = market.question,
        yes = market.yes_price,
        no = market.no_price,
        hours = market.hours_to_resolution,
        volume = market.volume_24h,
        liquidity = market.liquidity,
        depth = orderbook.depth(),
        skew = orderbook.skew(),
        signals = signals_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketType, SourceKind, SourceTier};

    fn market() -> Market {
        Market {
            market_id: "m1".to_string(),
            question: "Will the bill pass the Senate?".to_string(),
            yes_price: 0.55,
            no_price: 0.45,
            resolution_time: None,
            hours_to_resolution: 48.0,
            volume_24h: 25_000.0,
            liquidity: 12_000.0,
            market_type: MarketType::Political,
            fee_rate: 0.02,
            keywords: vec![],
            resolved: false,
            resolution: None,
        }
    }

    fn signal(credibility: f64, author: &str) -> Signal {
        Signal {
            source_kind: SourceKind::Social,
            source_tier: SourceTier::S6,
            info_type: None,
            content: format!("post by {}", author),
            credibility,
            author: author.to_string(),
            followers: 0,
            engagement: 0,
            timestamp: None,
            headline_only: false,
        }
    }

    #[test]
    fn includes_market_fields_and_book() {
        let book = OrderBook {
            market_id: "m1".to_string(),
            bids: vec![100.0, 50.0],
            asks: vec![30.0, 20.0],
            timestamp: None,
        };
        let prompt = build_context(&market(), &[], &book);
        assert!(prompt.contains("Will the bill pass the Senate?"));
        assert!(prompt.contains("Current YES price: 0.5500"));
        assert!(prompt.contains("Orderbook depth: $200"));
        assert!(prompt.contains("skew: +0.50"));
        assert!(prompt.contains("No signals available."));
    }

    #[test]
    fn caps_at_seven_signals_sorted_by_credibility() {
        let signals: Vec<Signal> = (0..10)
            .map(|i| signal(i as f64 / 10.0, &format!("author{}", i)))
            .collect();
        let prompt = build_context(&market(), &signals, &OrderBook::default());
        // The most credible appears, the three least credible do not
        assert!(prompt.contains("author9"));
        assert!(prompt.contains("author3"));
        assert!(!prompt.contains("author2"));
        assert!(!prompt.contains("author0"));
    }

    #[test]
    fn marks_headline_only_signals() {
        let mut s = signal(0.9, "newsdesk");
        s.headline_only = true;
        let prompt = build_context(&market(), &[s], &OrderBook::default());
        assert!(prompt.contains("[HEADLINE-ONLY]"));
    }
}
