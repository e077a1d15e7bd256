//! Scan orchestration
//!
//! Drives the periodic tier-1 scan, event-triggered tier-2 windows, the
//! resolution poller, the adverse-move sweep, the daily summary and the
//! stale-scan watchdog. Per-market pipelines fan out concurrently under a
//! bounded semaphore; one market's failure never aborts the scan.

use crate::config::Settings;
use crate::engine::decision::{
    calculate_edge, check_monk_mode, determine_side, kelly_size, scan_mode, ScanMode,
};
use crate::engine::execution::execute_candidate;
use crate::engine::ranker::select_trades;
use crate::engine::resolution::{resolve_open_trades, sweep_adverse_moves};
use crate::error::{BotError, Result};
use crate::learning::adjust_prediction;
use crate::llm::{build_context, KeywordExtractor, LmClient};
use crate::market::MarketSource;
use crate::notify::{
    format_daily_summary, format_error_alert, format_monk_mode_alert, format_observe_only_alert,
    format_stale_scan_alert, format_tier2_alert, format_trade_alert, Notifier,
};
use crate::signals::{NewsCollector, SocialCollector};
use crate::state::{AppState, SharedState};
use crate::storage::Database;
use crate::types::{
    BotMode, Market, Side, Signal, SignalTag, SourceTier, TradeCandidate, TradeRecord,
};
use chrono::{DateTime, Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

const CRYPTO_KEYWORDS: &[&str] = &["bitcoin", "btc", "ethereum", "eth", "crypto", "solana", "sol"];
const TIER2_MIN_SIGNALS: usize = 2;
const TIER2_AUTHORITY_FOLLOWERS: u64 = 100_000;
const MIN_POSITION_USD: f64 = 1.0;
const STALE_SCAN_MINUTES: f64 = 30.0;

#[derive(Debug, Default)]
struct Tier2Window {
    active: bool,
    last_qualifying: Option<DateTime<Utc>>,
}

/// Result of one per-market pipeline
enum MarketOutcome {
    Candidate(TradeCandidate),
    Skip(TradeRecord),
}

pub struct Scheduler {
    settings: Settings,
    db: Database,
    source: Arc<dyn MarketSource>,
    news: Mutex<NewsCollector>,
    social: SocialCollector,
    lm: Arc<LmClient>,
    keywords: KeywordExtractor,
    notifier: Notifier,
    shared: SharedState,
    pub last_scan_completed: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub mode: Arc<RwLock<BotMode>>,
    tier1_guard: Mutex<()>,
    tier2_guard: Mutex<()>,
    tier2_window: Mutex<Tier2Window>,
    observe_alert_date: Mutex<Option<String>>,
    summary_date: Mutex<Option<String>>,
    halted: AtomicBool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        db: Database,
        source: Arc<dyn MarketSource>,
        news: NewsCollector,
        social: SocialCollector,
        lm: Arc<LmClient>,
        notifier: Notifier,
        shared: SharedState,
        last_scan_completed: Arc<RwLock<Option<DateTime<Utc>>>>,
        mode: Arc<RwLock<BotMode>>,
    ) -> Self {
        Self {
            settings,
            db,
            source,
            news: Mutex::new(news),
            social,
            lm,
            keywords: KeywordExtractor::new(),
            notifier,
            shared,
            last_scan_completed,
            mode,
            tier1_guard: Mutex::new(()),
            tier2_guard: Mutex::new(()),
            tier2_window: Mutex::new(Tier2Window::default()),
            observe_alert_date: Mutex::new(None),
            summary_date: Mutex::new(None),
            halted: AtomicBool::new(false),
        }
    }

    /// Spawn all periodic tasks. The returned handles live for the process.
    pub fn spawn_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                this.settings.tier1_scan_interval_minutes * 60,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                this.clone().tier1_tick().await;
            }
        }));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                this.settings.tier2_scan_interval_minutes * 60,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                this.clone().tier2_tick().await;
            }
        }));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5 * 60));
            loop {
                interval.tick().await;
                resolve_open_trades(&this.db, this.source.as_ref(), &this.shared).await;
            }
        }));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10 * 60));
            loop {
                interval.tick().await;
                sweep_adverse_moves(&this.db, this.source.as_ref()).await;
            }
        }));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                this.daily_summary_tick().await;
            }
        }));

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15 * 60));
            loop {
                interval.tick().await;
                this.stale_scan_tick().await;
            }
        }));

        handles
    }

    async fn tier1_tick(self: Arc<Self>) {
        if self.halted.load(Ordering::SeqCst) {
            tracing::warn!("scans halted; skipping tier-1 tick");
            return;
        }
        let Ok(_guard) = self.tier1_guard.try_lock() else {
            tracing::warn!("previous tier-1 scan still running; skipping tick");
            return;
        };
        if let Err(e) = self.clone().run_scan(1).await {
            tracing::error!(error = %e, "tier-1 scan failed");
            self.notifier
                .send(&format_error_alert(&format!("Tier 1 scan failed: {}", e)))
                .await;
            if e.is_fatal() {
                self.halted.store(true, Ordering::SeqCst);
                tracing::error!("fatal error; new scans halted");
            }
        }
    }

    async fn tier2_tick(self: Arc<Self>) {
        if self.halted.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut window = self.tier2_window.lock().await;
            if !window.active {
                return;
            }
            let expired = window
                .last_qualifying
                .map(|t| (Utc::now() - t).num_minutes() > self.settings.tier2_window_minutes)
                .unwrap_or(true);
            if expired {
                window.active = false;
                drop(window);
                tracing::info!("tier-2 window closed");
                self.notifier.send(&format_tier2_alert(false)).await;
                return;
            }
        }

        let Ok(_guard) = self.tier2_guard.try_lock() else {
            tracing::warn!("previous tier-2 scan still running; skipping tick");
            return;
        };
        if let Err(e) = self.clone().run_scan(2).await {
            tracing::error!(error = %e, "tier-2 scan failed");
            self.notifier
                .send(&format_error_alert(&format!("Tier 2 scan failed: {}", e)))
                .await;
        }
    }

    /// Two or more crypto-relevant signals, at least one carrying real
    /// authority (S1/S2 source or a 100k-follower account)
    pub fn qualifies_for_tier2(signals: &[Signal]) -> bool {
        let crypto: Vec<&Signal> = signals
            .iter()
            .filter(|s| {
                let content = s.content.to_lowercase();
                CRYPTO_KEYWORDS.iter().any(|kw| content.contains(kw))
            })
            .collect();
        if crypto.len() < TIER2_MIN_SIGNALS {
            return false;
        }
        crypto.iter().any(|s| {
            matches!(s.source_tier, SourceTier::S1 | SourceTier::S2)
                || s.followers >= TIER2_AUTHORITY_FOLLOWERS
        })
    }

    async fn open_tier2_window(&self) {
        let mut window = self.tier2_window.lock().await;
        let was_active = window.active;
        window.active = true;
        window.last_qualifying = Some(Utc::now());
        drop(window);
        if !was_active {
            tracing::info!("tier-2 window opened");
            self.notifier.send(&format_tier2_alert(true)).await;
        }
    }

    // ------------------------------------------------------------------
    // Scan cycle
    // ------------------------------------------------------------------

    pub async fn run_scan(self: Arc<Self>, tier: u8) -> Result<()> {
        let started = Utc::now();
        tracing::info!(tier, "scan start");

        let experiment = self
            .db
            .current_experiment()
            .await?
            .ok_or_else(|| BotError::Consistency("no active experiment run".into()))?;
        let experiment_run = experiment.run_id;
        let model_used = self.lm.model().to_string();

        let mut today_trades = self.db.get_today_trades(started).await?;
        let week_trades = self.db.get_week_trades(started).await?;
        let api_spend = self.db.today_api_spend().await?;

        // One consistent snapshot of (portfolio, learning) for the scan
        let snapshot: AppState = self.shared.read().await.clone();

        let mode = if tier == 1 {
            scan_mode(&today_trades, &self.settings.monk())
        } else {
            ScanMode::Active
        };
        if tier == 1 {
            *self.mode.write().await = match mode {
                ScanMode::Active => BotMode::Active,
                ScanMode::ObserveOnly => BotMode::ObserveOnly,
            };
            if mode == ScanMode::ObserveOnly {
                self.note_observe_only(&today_trades, started).await;
            }
        }

        let markets = match self.source.list_active(tier).await {
            Ok(markets) => markets,
            Err(e) => {
                tracing::warn!(tier, error = %e, "market listing failed");
                Vec::new()
            }
        };
        if markets.is_empty() {
            tracing::info!(tier, "no candidate markets");
            *self.last_scan_completed.write().await = Some(Utc::now());
            return Ok(());
        }

        let news_signals: Arc<Vec<Signal>> = Arc::new(self.news.lock().await.collect().await);
        if tier == 1 && Self::qualifies_for_tier2(&news_signals) {
            self.open_tier2_window().await;
        }

        // Fan out per-market pipelines under bounded concurrency
        let semaphore = Arc::new(Semaphore::new(self.settings.scan_concurrency.max(1)));
        let snapshot = Arc::new(snapshot);
        let mut join_set: JoinSet<Option<MarketOutcome>> = JoinSet::new();
        let market_count = markets.len();

        for market in markets {
            let this = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            let news = Arc::clone(&news_signals);
            let snapshot = Arc::clone(&snapshot);
            let run = experiment_run.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match this
                    .process_market(&market, &news, &snapshot, mode, tier, &run)
                    .await
                {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::warn!(
                            market_id = %market.market_id,
                            error = %e,
                            "market pipeline dropped"
                        );
                        None
                    }
                }
            });
        }

        let mut candidates: Vec<TradeCandidate> = Vec::new();
        let mut early_skips: Vec<TradeRecord> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(MarketOutcome::Candidate(c))) => candidates.push(c),
                Ok(Some(MarketOutcome::Skip(r))) => early_skips.push(r),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "market pipeline panicked"),
            }
        }

        for record in &early_skips {
            self.save_record(record).await;
        }

        let candidate_count = candidates.len();
        if !candidates.is_empty() {
            let monk = self.settings.monk();
            let tier_executed = today_trades
                .iter()
                .filter(|t| t.tier == tier && t.is_executed())
                .count();
            let remaining_cap = (monk.daily_cap(tier) as usize).saturating_sub(tier_executed);

            let (to_execute, mut skipped) = select_trades(
                candidates,
                remaining_cap,
                &snapshot.portfolio.open_positions,
                snapshot.portfolio.total_equity,
                monk.max_cluster_exposure_pct,
            );

            let mut alerted_reasons: std::collections::HashSet<&'static str> =
                std::collections::HashSet::new();
            for mut candidate in to_execute {
                let portfolio = self.shared.read().await.portfolio.clone();
                if let Some(block) = check_monk_mode(
                    &monk,
                    &candidate,
                    &portfolio,
                    &today_trades,
                    &week_trades,
                    api_spend,
                    Utc::now(),
                ) {
                    candidate.skip_reason = Some(block.as_str().to_string());
                    skipped.push(candidate);
                    if alerted_reasons.insert(block.as_str()) {
                        self.notifier.send(&format_monk_mode_alert(block.as_str())).await;
                    }
                    continue;
                }

                let mut state = self.shared.write().await;
                let executed = execute_candidate(
                    &candidate,
                    &mut state.portfolio,
                    &self.db,
                    self.source.as_ref(),
                    self.settings.environment,
                    &experiment_run,
                    &model_used,
                    Utc::now(),
                )
                .await;
                drop(state);

                match executed {
                    Ok(Some(record)) => {
                        self.notifier.send(&format_trade_alert(&record)).await;
                        today_trades.push(record);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            market_id = %candidate.market.market_id,
                            error = %e,
                            "execution failed"
                        );
                        if e.is_fatal() {
                            return Err(e);
                        }
                    }
                }
            }

            for candidate in skipped {
                let record = self.ranked_skip_record(&candidate, &experiment_run, &model_used);
                self.save_record(&record).await;
            }
        }

        *self.last_scan_completed.write().await = Some(Utc::now());
        tracing::info!(
            tier,
            markets_scanned = market_count,
            candidates = candidate_count,
            "scan complete"
        );
        Ok(())
    }

    /// The per-market pipeline: keywords, signals, context, estimate,
    /// adjustment, edge, sizing. Every early exit is a recorded SKIP.
    async fn process_market(
        &self,
        market: &Market,
        news_signals: &[Signal],
        snapshot: &AppState,
        mode: ScanMode,
        tier: u8,
        experiment_run: &str,
    ) -> Result<MarketOutcome> {
        let model_used = self.lm.model();
        let now = Utc::now();

        if snapshot.learning.market_types.should_disable(market.market_type) {
            tracing::info!(market_type = %market.market_type, "market type disabled by learning");
            return Ok(MarketOutcome::Skip(TradeRecord::skip(
                market,
                "market_type_disabled",
                experiment_run,
                model_used,
                tier,
                now,
            )));
        }

        // Observe-only scans must not touch the model, keyword fallback included
        let lm_for_keywords = match mode {
            ScanMode::Active => Some(self.lm.as_ref()),
            ScanMode::ObserveOnly => None,
        };
        let keywords = self
            .keywords
            .extract(&market.market_id, &market.question, market.market_type, lm_for_keywords)
            .await;

        let social_signals = self.social.signals_for(&keywords).await;
        let relevant_news: Vec<Signal> = news_signals
            .iter()
            .filter(|s| {
                let content = s.content.to_lowercase();
                keywords.iter().take(5).any(|kw| content.contains(&kw.to_lowercase()))
            })
            .cloned()
            .collect();

        let mut signals = social_signals;
        signals.extend(relevant_news);

        if tier == 2 && Self::qualifies_for_tier2(&signals) {
            self.open_tier2_window().await;
        }

        if mode == ScanMode::ObserveOnly {
            return Ok(MarketOutcome::Skip(TradeRecord::skip(
                market,
                "daily_cap_observe_only",
                experiment_run,
                model_used,
                tier,
                now,
            )));
        }

        let orderbook = self.source.get_orderbook(&market.market_id).await?;

        let context = build_context(market, &signals, &orderbook);
        let Some(estimate) = self.lm.estimate(&context, &market.market_id).await else {
            return Ok(MarketOutcome::Skip(TradeRecord::skip(
                market,
                "estimate_failed",
                experiment_run,
                model_used,
                tier,
                now,
            )));
        };

        let mut tags = estimate.signal_tags;
        enrich_tags_with_timestamps(&mut tags, &signals);

        let adjustment = adjust_prediction(
            estimate.probability,
            estimate.confidence,
            market.market_type,
            &tags,
            &snapshot.learning,
            now,
        );

        let edge = calculate_edge(
            adjustment.probability,
            market.yes_price,
            market.fee_rate,
            adjustment.extra_edge,
        );
        let side = determine_side(adjustment.probability, market.yes_price);

        let position_size = kelly_size(
            adjustment.probability,
            market.yes_price,
            side,
            snapshot.portfolio.total_equity,
            self.settings.kelly_fraction,
            self.settings.max_position_pct,
        );

        let headline_only =
            !signals.is_empty() && signals.iter().all(|s| s.headline_only);

        let mut candidate = TradeCandidate {
            market: market.clone(),
            raw_probability: estimate.probability,
            raw_confidence: estimate.confidence,
            reasoning: estimate.reasoning,
            signal_tags: tags,
            headline_only_signal: headline_only,
            adjusted_probability: adjustment.probability,
            adjusted_confidence: adjustment.confidence,
            calibration_adjustment: adjustment.calibration_delta,
            signal_weight_adjustment: adjustment.signal_weight_delta,
            market_type_adjustment: adjustment.extra_edge,
            calculated_edge: edge,
            score: 0.0,
            side,
            position_size,
            kelly_fraction_used: self.settings.kelly_fraction,
            resolution_hours: market.hours_to_resolution,
            market_price: market.yes_price,
            fee_rate: market.fee_rate,
            orderbook_depth: orderbook.depth(),
            tier,
            market_cluster_id: None,
            skip_reason: None,
        };

        let skip_reason = if side == Side::Skip {
            Some("no_direction")
        } else if edge <= self.settings.min_edge(tier) {
            Some("edge_below_threshold")
        } else if position_size < MIN_POSITION_USD {
            Some("position_too_small")
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            candidate.side = Side::Skip;
            candidate.position_size = 0.0;
            candidate.skip_reason = Some(reason.to_string());
            let record = TradeRecord::from_candidate(&candidate, experiment_run, model_used, now);
            return Ok(MarketOutcome::Skip(record));
        }

        Ok(MarketOutcome::Candidate(candidate))
    }

    fn ranked_skip_record(
        &self,
        candidate: &TradeCandidate,
        experiment_run: &str,
        model_used: &str,
    ) -> TradeRecord {
        let mut record =
            TradeRecord::from_candidate(candidate, experiment_run, model_used, Utc::now());
        record.action = Side::Skip;
        if record.skip_reason.is_none() {
            record.skip_reason = Some("ranked_below_cutoff".to_string());
        }
        record
    }

    async fn save_record(&self, record: &TradeRecord) {
        if let Err(e) = self.db.save_trade(record).await {
            tracing::error!(
                market_id = %record.market_id,
                error = %e,
                "failed to persist trade record"
            );
        }
    }

    async fn note_observe_only(&self, today_trades: &[TradeRecord], now: DateTime<Utc>) {
        let executed = today_trades
            .iter()
            .filter(|t| t.tier == 1 && t.is_executed())
            .count();
        if let Err(e) = self.db.log_observe_only(executed as u32, now).await {
            tracing::warn!(error = %e, "failed to log observe-only transition");
        }

        let today = now.format("%Y-%m-%d").to_string();
        let mut alert_date = self.observe_alert_date.lock().await;
        if alert_date.as_deref() != Some(today.as_str()) {
            *alert_date = Some(today);
            drop(alert_date);
            self.notifier
                .send(&format_observe_only_alert(
                    executed,
                    self.settings.tier1_daily_cap,
                ))
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Watchdogs
    // ------------------------------------------------------------------

    async fn daily_summary_tick(&self) {
        let now = Utc::now();
        if now.hour() != self.settings.daily_summary_hour_utc || now.minute() != 0 {
            return;
        }
        let today = now.format("%Y-%m-%d").to_string();
        {
            let mut sent = self.summary_date.lock().await;
            if sent.as_deref() == Some(today.as_str()) {
                return;
            }
            *sent = Some(today);
        }

        let trades = match self.db.get_today_trades(now).await {
            Ok(trades) => trades,
            Err(e) => {
                tracing::error!(error = %e, "daily summary query failed");
                return;
            }
        };
        let portfolio = self.shared.read().await.portfolio.clone();
        let failures = self.db.today_parse_failures().await.unwrap_or(0);
        let calls = self.db.today_service_calls("lm").await.unwrap_or(0).max(1);
        let rate = failures as f64 / calls as f64;

        self.notifier
            .send(&format_daily_summary(&trades, &portfolio, rate))
            .await;
        tracing::info!(trade_count = trades.len(), "daily summary sent");
    }

    async fn stale_scan_tick(&self) {
        let Some(last) = *self.last_scan_completed.read().await else {
            return; // still initializing
        };
        let minutes = (Utc::now() - last).num_seconds() as f64 / 60.0;
        if minutes > STALE_SCAN_MINUTES {
            tracing::warn!(minutes_since_scan = minutes, "no recent scan completion");
            self.notifier.send(&format_stale_scan_alert(minutes)).await;
        }
    }
}

/// Attach the freshest matching signal timestamp to each model tag so the
/// temporal-decay step can see signal ages
fn enrich_tags_with_timestamps(tags: &mut [SignalTag], signals: &[Signal]) {
    for tag in tags.iter_mut() {
        tag.timestamp = signals
            .iter()
            .filter(|s| s.source_tier == tag.source_tier)
            .filter_map(|s| s.timestamp)
            .max();
    }
}

#[cfg(test)]
mod tests;
