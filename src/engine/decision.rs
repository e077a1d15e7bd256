//! Edge, side, Kelly sizing, and the ordered risk gate

use crate::config::MonkModeConfig;
use crate::types::{Portfolio, Side, TradeCandidate, TradeRecord};
use chrono::{DateTime, Duration, Utc};

/// Net edge after fees and the market-type penalty
pub fn calculate_edge(
    adjusted_probability: f64,
    market_price: f64,
    fee_rate: f64,
    extra_edge: f64,
) -> f64 {
    (adjusted_probability - market_price).abs() - fee_rate - extra_edge
}

pub fn determine_side(adjusted_probability: f64, market_price: f64) -> Side {
    if adjusted_probability > market_price {
        Side::BuyYes
    } else if adjusted_probability < market_price {
        Side::BuyNo
    } else {
        Side::Skip
    }
}

/// Quarter-Kelly position size for a binary contract, capped at
/// `max_position_pct` of bankroll. Returns 0 when the predicted direction
/// does not beat the price.
pub fn kelly_size(
    adjusted_probability: f64,
    market_price: f64,
    side: Side,
    bankroll: f64,
    kelly_fraction: f64,
    max_position_pct: f64,
) -> f64 {
    let f_star = match side {
        Side::BuyYes => {
            if adjusted_probability <= market_price || market_price >= 1.0 {
                return 0.0;
            }
            (adjusted_probability - market_price) / (1.0 - market_price)
        }
        Side::BuyNo => {
            if adjusted_probability >= market_price || market_price <= 0.0 {
                return 0.0;
            }
            (market_price - adjusted_probability) / market_price
        }
        Side::Skip => return 0.0,
    };

    let position = f_star * kelly_fraction * bankroll;
    position.min(max_position_pct * bankroll)
}

/// Candidate score: prefer high-edge, high-confidence, fast-resolving
/// markets. The 0.5h floor caps the recycling bonus.
pub fn score(calculated_edge: f64, adjusted_confidence: f64, resolution_hours: f64) -> f64 {
    calculated_edge * adjusted_confidence / resolution_hours.max(0.5)
}

/// Scan mode for the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Active,
    ObserveOnly,
}

/// Observe-only when tier-1 executed trades already meet the daily cap
pub fn scan_mode(today_trades: &[TradeRecord], monk: &MonkModeConfig) -> ScanMode {
    let tier1_executed = today_trades
        .iter()
        .filter(|t| t.tier == 1 && t.is_executed())
        .count();
    if tier1_executed >= monk.tier1_daily_cap as usize {
        ScanMode::ObserveOnly
    } else {
        ScanMode::Active
    }
}

/// Ordered risk-gate rejection reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateBlock {
    TierDailyCapReached,
    DailyLossLimit,
    WeeklyLossLimit,
    Cooldown,
    MaxExposure,
    ApiBudgetExceeded,
}

impl GateBlock {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateBlock::TierDailyCapReached => "tier_daily_cap_reached",
            GateBlock::DailyLossLimit => "daily_loss_limit",
            GateBlock::WeeklyLossLimit => "weekly_loss_limit",
            GateBlock::Cooldown => "cooldown",
            GateBlock::MaxExposure => "max_exposure",
            GateBlock::ApiBudgetExceeded => "api_budget_exceeded",
        }
    }
}

impl std::fmt::Display for GateBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_adverse(record: &TradeRecord) -> bool {
    record.pnl.map(|p| p < 0.0).unwrap_or(false)
        || record.unrealized_adverse_move.map(|m| m > 0.10).unwrap_or(false)
}

/// Evaluate the risk gate for one candidate. The first failing check wins;
/// `None` means the trade may proceed.
pub fn check_monk_mode(
    monk: &MonkModeConfig,
    candidate: &TradeCandidate,
    portfolio: &Portfolio,
    today_trades: &[TradeRecord],
    week_trades: &[TradeRecord],
    api_spend: f64,
    now: DateTime<Utc>,
) -> Option<GateBlock> {
    // 1. Per-tier executed-trade cap
    let tier_executed = today_trades
        .iter()
        .filter(|t| t.tier == candidate.tier && t.is_executed())
        .count();
    if tier_executed >= monk.daily_cap(candidate.tier) as usize {
        return Some(GateBlock::TierDailyCapReached);
    }

    let equity = portfolio.total_equity;

    // 2. Daily loss limit over resolved pnl
    let today_pnl: f64 = today_trades.iter().filter_map(|t| t.pnl).sum();
    if equity > 0.0 && today_pnl / equity < -monk.daily_loss_limit_pct {
        return Some(GateBlock::DailyLossLimit);
    }

    // 3. Weekly loss limit
    let week_pnl: f64 = week_trades.iter().filter_map(|t| t.pnl).sum();
    if equity > 0.0 && week_pnl / equity < -monk.weekly_loss_limit_pct {
        return Some(GateBlock::WeeklyLossLimit);
    }

    // 4. Cooldown: consecutive adverse events inside the window, counted
    // from the most recent non-SKIP trade backwards. A pending trade with
    // no recorded adverse move breaks the streak.
    let window_start = now - Duration::seconds((monk.cooldown_window_hours * 3600.0) as i64);
    let mut recent: Vec<&TradeRecord> = week_trades
        .iter()
        .filter(|t| t.is_executed() && t.timestamp >= window_start)
        .collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let mut streak = 0u32;
    for trade in recent {
        if is_adverse(trade) {
            streak += 1;
        } else {
            break;
        }
    }
    if streak >= monk.consecutive_adverse_limit {
        return Some(GateBlock::Cooldown);
    }

    // 5. Total exposure cap
    if equity > 0.0
        && (portfolio.open_exposure() + candidate.position_size) / equity > monk.max_total_exposure_pct
    {
        return Some(GateBlock::MaxExposure);
    }

    // 6. Daily API budget
    if api_spend > monk.daily_api_budget_usd {
        return Some(GateBlock::ApiBudgetExceeded);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Market, MarketType, Position};

    fn market() -> Market {
        Market {
            market_id: "m".to_string(),
            question: "q".to_string(),
            yes_price: 0.60,
            no_price: 0.40,
            resolution_time: None,
            hours_to_resolution: 6.0,
            volume_24h: 0.0,
            liquidity: 0.0,
            market_type: MarketType::Political,
            fee_rate: 0.02,
            keywords: vec![],
            resolved: false,
            resolution: None,
        }
    }

    fn candidate(tier: u8, size: f64) -> TradeCandidate {
        TradeCandidate {
            market: market(),
            raw_probability: 0.8,
            raw_confidence: 0.8,
            reasoning: String::new(),
            signal_tags: vec![],
            headline_only_signal: false,
            adjusted_probability: 0.8,
            adjusted_confidence: 0.75,
            calibration_adjustment: 0.0,
            signal_weight_adjustment: 0.0,
            market_type_adjustment: 0.0,
            calculated_edge: 0.18,
            score: 0.0,
            side: Side::BuyYes,
            position_size: size,
            kelly_fraction_used: 0.25,
            resolution_hours: 6.0,
            market_price: 0.60,
            fee_rate: 0.02,
            orderbook_depth: 1000.0,
            tier,
            market_cluster_id: None,
            skip_reason: None,
        }
    }

    fn executed_record(tier: u8, minutes_ago: i64, pnl: Option<f64>, adverse: Option<f64>) -> TradeRecord {
        let mut r = TradeRecord::skip(&market(), "x", "run", "model", tier, Utc::now());
        r.action = Side::BuyYes;
        r.skip_reason = None;
        r.timestamp = Utc::now() - Duration::minutes(minutes_ago);
        r.pnl = pnl;
        r.unrealized_adverse_move = adverse;
        r
    }

    #[test]
    fn kelly_quarter_fraction_hits_the_cap() {
        // p=0.80, q=0.60, bankroll=5000: f* = 0.5, quarter = 625, cap = 400
        let size = kelly_size(0.80, 0.60, Side::BuyYes, 5000.0, 0.25, 0.08);
        assert!((size - 400.0).abs() < 1e-9);
    }

    #[test]
    fn kelly_returns_zero_without_direction_advantage() {
        assert_eq!(kelly_size(0.60, 0.60, Side::BuyYes, 1000.0, 0.25, 0.08), 0.0);
        assert_eq!(kelly_size(0.55, 0.60, Side::BuyYes, 1000.0, 0.25, 0.08), 0.0);
        assert_eq!(kelly_size(0.65, 0.60, Side::BuyNo, 1000.0, 0.25, 0.08), 0.0);
        assert_eq!(kelly_size(0.5, 0.5, Side::Skip, 1000.0, 0.25, 0.08), 0.0);
    }

    #[test]
    fn kelly_is_positive_and_bounded_across_the_grid() {
        let bankroll = 2000.0;
        let cap = 0.08 * bankroll;
        let mut p = 0.01;
        while p < 1.0 {
            let mut q = 0.01;
            while q < 1.0 {
                for side in [Side::BuyYes, Side::BuyNo] {
                    let size = kelly_size(p, q, side, bankroll, 0.25, 0.08);
                    assert!(size >= 0.0);
                    assert!(size <= cap + 1e-9, "p={} q={} size={}", p, q, size);
                    let has_edge = match side {
                        Side::BuyYes => p > q,
                        Side::BuyNo => p < q,
                        Side::Skip => false,
                    };
                    if has_edge {
                        assert!(size > 0.0, "p={} q={} should size > 0", p, q);
                    } else {
                        assert_eq!(size, 0.0);
                    }
                }
                q += 0.07;
            }
            p += 0.07;
        }
    }

    #[test]
    fn edge_subtracts_fee_and_penalty() {
        let e = calculate_edge(0.70, 0.60, 0.02, 0.03);
        assert!((e - 0.05).abs() < 1e-12);
        // Symmetric on the other side
        let e = calculate_edge(0.50, 0.60, 0.02, 0.0);
        assert!((e - 0.08).abs() < 1e-12);
    }

    #[test]
    fn side_follows_probability_vs_price() {
        assert_eq!(determine_side(0.7, 0.6), Side::BuyYes);
        assert_eq!(determine_side(0.5, 0.6), Side::BuyNo);
        assert_eq!(determine_side(0.6, 0.6), Side::Skip);
    }

    #[test]
    fn score_floors_resolution_hours() {
        assert!((score(0.1, 0.8, 0.1) - 0.1 * 0.8 / 0.5).abs() < 1e-12);
        assert!((score(0.1, 0.8, 10.0) - 0.1 * 0.8 / 10.0).abs() < 1e-12);
    }

    #[test]
    fn observe_only_at_tier1_cap() {
        let monk = MonkModeConfig::default();
        let trades: Vec<TradeRecord> =
            (0..5).map(|_| executed_record(1, 10, None, None)).collect();
        assert_eq!(scan_mode(&trades, &monk), ScanMode::ObserveOnly);
        assert_eq!(scan_mode(&trades[..4], &monk), ScanMode::Active);
    }

    #[test]
    fn skips_do_not_count_toward_the_cap() {
        let monk = MonkModeConfig::default();
        let mut trades: Vec<TradeRecord> = Vec::new();
        for _ in 0..10 {
            trades.push(TradeRecord::skip(&market(), "r", "run", "model", 1, Utc::now()));
        }
        assert_eq!(scan_mode(&trades, &monk), ScanMode::Active);
    }

    #[test]
    fn gate_blocks_at_tier_cap() {
        let monk = MonkModeConfig::default();
        let portfolio = Portfolio::new(2000.0);
        let today: Vec<TradeRecord> = (0..5).map(|_| executed_record(1, 10, None, None)).collect();
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &today, &today, 0.0, Utc::now());
        assert_eq!(block, Some(GateBlock::TierDailyCapReached));
        // Tier 2 has its own cap
        let block = check_monk_mode(&monk, &candidate(2, 50.0), &portfolio, &today, &today, 0.0, Utc::now());
        assert_eq!(block, None);
    }

    #[test]
    fn gate_blocks_on_daily_and_weekly_losses() {
        let monk = MonkModeConfig::default();
        let portfolio = Portfolio::new(2000.0);

        let today = vec![executed_record(1, 10, Some(-150.0), None)];
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &today, &today, 0.0, Utc::now());
        assert_eq!(block, Some(GateBlock::DailyLossLimit));

        // Daily fine, weekly breached
        let today = vec![executed_record(1, 10, Some(-50.0), None)];
        let mut week = today.clone();
        week.push(executed_record(1, 3 * 24 * 60, Some(-180.0), None));
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &today, &week, 0.0, Utc::now());
        assert_eq!(block, Some(GateBlock::WeeklyLossLimit));
    }

    #[test]
    fn cooldown_counts_consecutive_adverse_in_window() {
        let monk = MonkModeConfig::default();
        let portfolio = Portfolio::new(2000.0);
        let now = Utc::now();

        // Three adverse events inside 2h: blocked
        let week = vec![
            executed_record(1, 10, Some(-5.0), None),
            executed_record(1, 30, None, Some(0.15)),
            executed_record(1, 60, Some(-8.0), None),
        ];
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &[], &week, 0.0, now);
        assert_eq!(block, Some(GateBlock::Cooldown));

        // A non-adverse trade in between breaks the streak
        let week = vec![
            executed_record(1, 10, Some(-5.0), None),
            executed_record(1, 30, Some(3.0), None),
            executed_record(1, 50, Some(-8.0), None),
            executed_record(1, 70, Some(-2.0), None),
        ];
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &[], &week, 0.0, now);
        assert_eq!(block, None);

        // Adverse events outside the 2h window do not count
        let week = vec![
            executed_record(1, 150, Some(-5.0), None),
            executed_record(1, 170, Some(-6.0), None),
            executed_record(1, 190, Some(-7.0), None),
        ];
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &[], &week, 0.0, now);
        assert_eq!(block, None);
    }

    #[test]
    fn gate_blocks_on_exposure_and_budget() {
        let monk = MonkModeConfig::default();
        let mut portfolio = Portfolio::new(2000.0);
        portfolio.open_positions.push(Position {
            market_id: "other".to_string(),
            side: Side::BuyYes,
            entry_price: 0.5,
            size_usd: 580.0,
            current_value: 580.0,
            market_cluster_id: None,
        });

        // 580 + 50 > 600 = 30% of 2000
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &[], &[], 0.0, Utc::now());
        assert_eq!(block, Some(GateBlock::MaxExposure));

        let portfolio = Portfolio::new(2000.0);
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &[], &[], 9.0, Utc::now());
        assert_eq!(block, Some(GateBlock::ApiBudgetExceeded));
    }

    #[test]
    fn gate_checks_run_in_spec_order() {
        // Both the tier cap and the budget are breached; the cap wins
        let monk = MonkModeConfig::default();
        let portfolio = Portfolio::new(2000.0);
        let today: Vec<TradeRecord> = (0..5).map(|_| executed_record(1, 10, None, None)).collect();
        let block = check_monk_mode(&monk, &candidate(1, 50.0), &portfolio, &today, &today, 99.0, Utc::now());
        assert_eq!(block, Some(GateBlock::TierDailyCapReached));
    }
}
