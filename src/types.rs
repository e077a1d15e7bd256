//! Core data types shared across the bot
//!
//! Everything that crosses a module boundary lives here: signals, markets,
//! trade candidates and records, the learning-layer state types, and the
//! portfolio. Probabilities, confidences and USD amounts are `f64`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};
use std::str::FromStr;

/// Fixed calibration bucket ranges over the confidence axis.
/// Lower bound inclusive; the last bucket is closed at 1.00.
pub const CALIBRATION_BUCKET_RANGES: [(f64, f64); 6] = [
    (0.50, 0.60),
    (0.60, 0.70),
    (0.70, 0.80),
    (0.80, 0.90),
    (0.90, 0.95),
    (0.95, 1.00),
];

/// Brier history kept per market type before truncation.
pub const BRIER_HISTORY_LIMIT: usize = 50;

/// Brier history retained after a model swap.
pub const BRIER_HISTORY_AFTER_SWAP: usize = 15;

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// Source credibility tier, assigned programmatically from provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTier {
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

impl SourceTier {
    pub fn credibility(&self) -> f64 {
        match self {
            SourceTier::S1 => 0.95,
            SourceTier::S2 => 0.90,
            SourceTier::S3 => 0.80,
            SourceTier::S4 => 0.65,
            SourceTier::S5 => 0.70,
            SourceTier::S6 => 0.30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::S1 => "S1",
            SourceTier::S2 => "S2",
            SourceTier::S3 => "S3",
            SourceTier::S4 => "S4",
            SourceTier::S5 => "S5",
            SourceTier::S6 => "S6",
        }
    }
}

impl FromStr for SourceTier {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "S1" => Ok(SourceTier::S1),
            "S2" => Ok(SourceTier::S2),
            "S3" => Ok(SourceTier::S3),
            "S4" => Ok(SourceTier::S4),
            "S5" => Ok(SourceTier::S5),
            "S6" => Ok(SourceTier::S6),
            _ => Err(()),
        }
    }
}

/// Semantic information type of a signal, assigned by the model
/// (I6 is assigned by the collector for market-derived signals)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InfoType {
    I1,
    I2,
    I3,
    I4,
    I5,
    I6,
}

impl InfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoType::I1 => "I1",
            InfoType::I2 => "I2",
            InfoType::I3 => "I3",
            InfoType::I4 => "I4",
            InfoType::I5 => "I5",
            InfoType::I6 => "I6",
        }
    }
}

impl FromStr for InfoType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "I1" => Ok(InfoType::I1),
            "I2" => Ok(InfoType::I2),
            "I3" => Ok(InfoType::I3),
            "I4" => Ok(InfoType::I4),
            "I5" => Ok(InfoType::I5),
            "I6" => Ok(InfoType::I6),
            _ => Err(()),
        }
    }
}

/// Where a signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    Social,
    MarketData,
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    BuyYes,
    BuyNo,
    Skip,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::BuyYes => "BUY_YES",
            Side::BuyNo => "BUY_NO",
            Side::Skip => "SKIP",
        }
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "BUY_YES" => Ok(Side::BuyYes),
            "BUY_NO" => Ok(Side::BuyNo),
            "SKIP" => Ok(Side::Skip),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market category used by the learning layers and cluster detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Political,
    Economic,
    #[serde(rename = "crypto_15m")]
    Crypto15m,
    Sports,
    Cultural,
    Regulatory,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Political => "political",
            MarketType::Economic => "economic",
            MarketType::Crypto15m => "crypto_15m",
            MarketType::Sports => "sports",
            MarketType::Cultural => "cultural",
            MarketType::Regulatory => "regulatory",
        }
    }

    pub fn all() -> [MarketType; 6] {
        [
            MarketType::Political,
            MarketType::Economic,
            MarketType::Crypto15m,
            MarketType::Sports,
            MarketType::Cultural,
            MarketType::Regulatory,
        ]
    }
}

impl FromStr for MarketType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "political" => Ok(MarketType::Political),
            "economic" => Ok(MarketType::Economic),
            "crypto_15m" => Ok(MarketType::Crypto15m),
            "sports" => Ok(MarketType::Sports),
            "cultural" => Ok(MarketType::Cultural),
            "regulatory" => Ok(MarketType::Regulatory),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall bot mode reported on the health surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    Initializing,
    Active,
    ObserveOnly,
}

impl BotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Initializing => "initializing",
            BotMode::Active => "active",
            BotMode::ObserveOnly => "observe_only",
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline data
// ---------------------------------------------------------------------------

/// Normalized signal emitted by a collector. Immutable once classified;
/// `info_type` is unset at collection and filled by the model.
#[derive(Debug, Clone)]
pub struct Signal {
    pub source_kind: SourceKind,
    pub source_tier: SourceTier,
    pub info_type: Option<InfoType>,
    pub content: String,
    pub credibility: f64,
    pub author: String,
    pub followers: u64,
    pub engagement: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub headline_only: bool,
}

/// Market snapshot, refetched each cycle
#[derive(Debug, Clone)]
pub struct Market {
    pub market_id: String,
    pub question: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub resolution_time: Option<DateTime<Utc>>,
    pub hours_to_resolution: f64,
    pub volume_24h: f64,
    pub liquidity: f64,
    pub market_type: MarketType,
    pub fee_rate: f64,
    pub keywords: Vec<String>,
    pub resolved: bool,
    /// `Some(true)` = resolved YES, `Some(false)` = resolved NO
    pub resolution: Option<bool>,
}

/// Top-N order book price-level sums
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub market_id: String,
    pub bids: Vec<f64>,
    pub asks: Vec<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn depth(&self) -> f64 {
        self.bids.iter().sum::<f64>() + self.asks.iter().sum::<f64>()
    }

    /// (bids - asks) / depth, in [-1, 1]; 0 for an empty book
    pub fn skew(&self) -> f64 {
        let depth = self.depth();
        if depth <= 0.0 {
            return 0.0;
        }
        (self.bids.iter().sum::<f64>() - self.asks.iter().sum::<f64>()) / depth
    }
}

/// A (tier, info-type) tag returned by the model for one signal it used,
/// enriched with the timestamp of the matching collected signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalTag {
    pub source_tier: SourceTier,
    pub info_type: InfoType,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Fully-evaluated market awaiting ranking
#[derive(Debug, Clone)]
pub struct TradeCandidate {
    pub market: Market,
    pub raw_probability: f64,
    pub raw_confidence: f64,
    pub reasoning: String,
    pub signal_tags: Vec<SignalTag>,
    pub headline_only_signal: bool,
    pub adjusted_probability: f64,
    pub adjusted_confidence: f64,
    pub calibration_adjustment: f64,
    pub signal_weight_adjustment: f64,
    pub market_type_adjustment: f64,
    pub calculated_edge: f64,
    pub score: f64,
    pub side: Side,
    pub position_size: f64,
    pub kelly_fraction_used: f64,
    pub resolution_hours: f64,
    pub market_price: f64,
    pub fee_rate: f64,
    pub orderbook_depth: f64,
    pub tier: u8,
    pub market_cluster_id: Option<String>,
    pub skip_reason: Option<String>,
}

/// The full audit row, persisted for every candidate (executed and skipped).
/// Mutated exactly twice: at decision creation and at resolution; afterwards
/// immutable except via the void mechanism.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub record_id: String,
    pub experiment_run: String,
    pub timestamp: DateTime<Utc>,
    pub model_used: String,

    pub market_id: String,
    pub market_question: String,
    pub market_type: MarketType,
    pub resolution_window_hours: f64,
    pub resolution_time: Option<DateTime<Utc>>,
    pub tier: u8,

    pub raw_probability: f64,
    pub raw_confidence: f64,
    pub reasoning: String,
    pub signal_tags: Vec<SignalTag>,
    pub headline_only_signal: bool,

    pub calibration_adjustment: f64,
    pub market_type_adjustment: f64,
    pub signal_weight_adjustment: f64,
    pub adjusted_probability: f64,
    pub adjusted_confidence: f64,

    pub market_price_at_decision: f64,
    pub orderbook_depth_usd: f64,
    pub fee_rate: f64,
    pub calculated_edge: f64,
    pub trade_score: f64,

    pub action: Side,
    pub skip_reason: Option<String>,
    pub position_size_usd: f64,
    pub kelly_fraction_used: f64,
    pub market_cluster_id: Option<String>,

    pub actual_outcome: Option<bool>,
    pub pnl: Option<f64>,
    pub brier_raw: Option<f64>,
    pub brier_adjusted: Option<f64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub unrealized_adverse_move: Option<f64>,

    pub voided: bool,
    pub void_reason: Option<String>,
}

impl TradeRecord {
    pub fn is_executed(&self) -> bool {
        self.action != Side::Skip
    }

    /// Build a record from a fully-evaluated candidate. The action is the
    /// candidate's side; pass `skip_reason` via the candidate for skips.
    pub fn from_candidate(
        candidate: &TradeCandidate,
        experiment_run: &str,
        model_used: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            experiment_run: experiment_run.to_string(),
            timestamp: now,
            model_used: model_used.to_string(),
            market_id: candidate.market.market_id.clone(),
            market_question: candidate.market.question.clone(),
            market_type: candidate.market.market_type,
            resolution_window_hours: candidate.resolution_hours,
            resolution_time: candidate.market.resolution_time,
            tier: candidate.tier,
            raw_probability: candidate.raw_probability,
            raw_confidence: candidate.raw_confidence,
            reasoning: candidate.reasoning.clone(),
            signal_tags: candidate.signal_tags.clone(),
            headline_only_signal: candidate.headline_only_signal,
            calibration_adjustment: candidate.calibration_adjustment,
            market_type_adjustment: candidate.market_type_adjustment,
            signal_weight_adjustment: candidate.signal_weight_adjustment,
            adjusted_probability: candidate.adjusted_probability,
            adjusted_confidence: candidate.adjusted_confidence,
            market_price_at_decision: candidate.market_price,
            orderbook_depth_usd: candidate.orderbook_depth,
            fee_rate: candidate.fee_rate,
            calculated_edge: candidate.calculated_edge,
            trade_score: candidate.score,
            action: candidate.side,
            skip_reason: candidate.skip_reason.clone(),
            position_size_usd: candidate.position_size,
            kelly_fraction_used: candidate.kelly_fraction_used,
            market_cluster_id: candidate.market_cluster_id.clone(),
            actual_outcome: None,
            pnl: None,
            brier_raw: None,
            brier_adjusted: None,
            resolved_at: None,
            unrealized_adverse_move: None,
            voided: false,
            void_reason: None,
        }
    }

    /// Build a SKIP record for a market dropped before a full evaluation
    /// (observe-only, disabled market type, estimate failure).
    pub fn skip(
        market: &Market,
        reason: &str,
        experiment_run: &str,
        model_used: &str,
        tier: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            experiment_run: experiment_run.to_string(),
            timestamp: now,
            model_used: model_used.to_string(),
            market_id: market.market_id.clone(),
            market_question: market.question.clone(),
            market_type: market.market_type,
            resolution_window_hours: market.hours_to_resolution,
            resolution_time: market.resolution_time,
            tier,
            raw_probability: 0.0,
            raw_confidence: 0.0,
            reasoning: String::new(),
            signal_tags: Vec::new(),
            headline_only_signal: false,
            calibration_adjustment: 0.0,
            market_type_adjustment: 0.0,
            signal_weight_adjustment: 0.0,
            adjusted_probability: 0.0,
            adjusted_confidence: 0.0,
            market_price_at_decision: market.yes_price,
            orderbook_depth_usd: 0.0,
            fee_rate: market.fee_rate,
            calculated_edge: 0.0,
            trade_score: 0.0,
            action: Side::Skip,
            skip_reason: Some(reason.to_string()),
            position_size_usd: 0.0,
            kelly_fraction_used: 0.0,
            market_cluster_id: None,
            actual_outcome: None,
            pnl: None,
            brier_raw: None,
            brier_adjusted: None,
            resolved_at: None,
            unrealized_adverse_move: None,
            voided: false,
            void_reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Learning state
// ---------------------------------------------------------------------------

/// Beta-posterior calibration bucket over a confidence range
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationBucket {
    pub lo: f64,
    pub hi: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl CalibrationBucket {
    pub fn new(range: (f64, f64)) -> Self {
        Self {
            lo: range.0,
            hi: range.1,
            alpha: 1.0,
            beta: 1.0,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }

    pub fn expected_accuracy(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn sample_count(&self) -> u64 {
        (self.alpha + self.beta - 2.0).max(0.0) as u64
    }

    /// Width of the 95% central interval of Beta(alpha, beta)
    pub fn uncertainty(&self) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.inverse_cdf(0.975) - dist.inverse_cdf(0.025),
            Err(_) => 1.0,
        }
    }

    pub fn update(&mut self, was_correct: bool, recency_weight: f64) {
        if was_correct {
            self.alpha += recency_weight;
        } else {
            self.beta += recency_weight;
        }
    }

    /// Confidence correction for this bucket; zero until 10 samples
    pub fn correction(&self) -> f64 {
        if self.sample_count() < 10 {
            return 0.0;
        }
        let certainty = (1.0 - 2.0 * self.uncertainty()).max(0.0);
        (self.expected_accuracy() - self.midpoint()) * certainty
    }
}

/// Rolling performance per market type
#[derive(Debug, Clone, PartialEq)]
pub struct MarketTypePerformance {
    pub market_type: MarketType,
    pub total_trades: u32,
    pub total_pnl: f64,
    pub brier_scores: Vec<f64>,
    pub total_observed_skips: u32,
    pub counterfactual_pnl: f64,
}

impl MarketTypePerformance {
    pub fn new(market_type: MarketType) -> Self {
        Self {
            market_type,
            total_trades: 0,
            total_pnl: 0.0,
            brier_scores: Vec::new(),
            total_observed_skips: 0,
            counterfactual_pnl: 0.0,
        }
    }

    /// Exponentially decayed mean Brier score, factor 0.95, newest weight 1.
    /// Defaults to 0.25 when no history exists.
    pub fn avg_brier(&self) -> f64 {
        if self.brier_scores.is_empty() {
            return 0.25;
        }
        let n = self.brier_scores.len();
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (i, b) in self.brier_scores.iter().enumerate() {
            let w = 0.95_f64.powi((n - 1 - i) as i32);
            weighted += b * w;
            total += w;
        }
        weighted / total
    }

    /// Extra edge demanded from a struggling market type; zero until 15 trades
    pub fn edge_adjustment(&self) -> f64 {
        if self.total_trades < 15 {
            return 0.0;
        }
        let brier = self.avg_brier();
        if brier > 0.30 {
            0.05
        } else if brier > 0.25 {
            0.03
        } else if brier > 0.20 {
            0.01
        } else {
            0.0
        }
    }

    pub fn should_disable(&self) -> bool {
        self.total_trades >= 30 && self.total_pnl < -0.15 * self.total_trades as f64
    }
}

/// Win/loss counters for one (source_tier, info_type, market_type) combo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalTracker {
    pub source_tier: SourceTier,
    pub info_type: InfoType,
    pub market_type: MarketType,
    pub present_winning: u32,
    pub present_losing: u32,
    pub absent_winning: u32,
    pub absent_losing: u32,
}

impl SignalTracker {
    pub fn new(source_tier: SourceTier, info_type: InfoType, market_type: MarketType) -> Self {
        Self {
            source_tier,
            info_type,
            market_type,
            present_winning: 0,
            present_losing: 0,
            absent_winning: 0,
            absent_losing: 0,
        }
    }

    /// Winrate lift of trades where this combo was present vs absent.
    /// 1.0 until both sides have at least 5 samples.
    pub fn lift(&self) -> f64 {
        let present = (self.present_winning + self.present_losing) as f64;
        let absent = (self.absent_winning + self.absent_losing) as f64;
        if present < 5.0 || absent < 5.0 {
            return 1.0;
        }
        let winrate_present = self.present_winning as f64 / present;
        let winrate_absent = self.absent_winning as f64 / absent;
        if winrate_absent == 0.0 {
            return 1.0;
        }
        winrate_present / winrate_absent
    }

    pub fn weight(&self) -> f64 {
        (1.0 + 0.3 * (self.lift() - 1.0)).clamp(0.8, 1.2)
    }
}

// ---------------------------------------------------------------------------
// Portfolio & experiments
// ---------------------------------------------------------------------------

/// An open position held by the portfolio
#[derive(Debug, Clone)]
pub struct Position {
    pub market_id: String,
    pub side: Side,
    pub entry_price: f64,
    pub size_usd: f64,
    pub current_value: f64,
    pub market_cluster_id: Option<String>,
}

/// Single-row portfolio state
#[derive(Debug, Clone)]
pub struct Portfolio {
    pub cash_balance: f64,
    pub total_equity: f64,
    pub total_pnl: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    pub open_positions: Vec<Position>,
}

impl Portfolio {
    pub fn new(initial_bankroll: f64) -> Self {
        Self {
            cash_balance: initial_bankroll,
            total_equity: initial_bankroll,
            total_pnl: 0.0,
            peak_equity: initial_bankroll,
            max_drawdown: 0.0,
            open_positions: Vec::new(),
        }
    }

    pub fn open_exposure(&self) -> f64 {
        self.open_positions.iter().map(|p| p.size_usd).sum()
    }
}

/// An uninterrupted trading period under one model identity
#[derive(Debug, Clone)]
pub struct ExperimentRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config_snapshot: serde_json::Value,
    pub description: String,
    pub model_used: String,
    pub include_in_learning: bool,
    pub total_trades: u32,
    pub total_pnl: f64,
    pub avg_brier: f64,
    pub sharpe_ratio: f64,
}

/// Audit log entry for a model swap
#[derive(Debug, Clone)]
pub struct ModelSwapEvent {
    pub timestamp: DateTime<Utc>,
    pub old_model: String,
    pub new_model: String,
    pub reason: String,
    pub experiment_run_started: String,
}
