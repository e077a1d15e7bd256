//! SQLite-backed persistent store
//!
//! Single pool, WAL journal, foreign keys enforced. All timestamps are
//! stored as RFC 3339 text in UTC. Learning state is persisted together
//! with the resolved record in one transaction.

mod migrations;

pub use migrations::run_migrations;

use crate::error::{BotError, Result};
use crate::learning::LearningState;
use crate::types::{
    CalibrationBucket, ExperimentRun, InfoType, MarketType, MarketTypePerformance,
    ModelSwapEvent, Portfolio, Position, Side, SignalTracker, SourceTier, TradeRecord,
    CALIBRATION_BUCKET_RANGES,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

fn iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn iso_opt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(iso)
}

fn parse_dt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Final stats written when an experiment run is closed
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub total_trades: u32,
    pub total_pnl: f64,
    pub avg_brier: f64,
    pub sharpe_ratio: f64,
}

/// Persistent store handle (cheap to clone)
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `path` and apply migrations.
    /// Pass `:memory:` for an ephemeral store.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .map_err(|e| BotError::Config(format!("invalid db path {}: {}", path, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Trade records
    // ------------------------------------------------------------------

    pub async fn save_trade(&self, r: &TradeRecord) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO trade_records (
                record_id, experiment_run, timestamp, model_used,
                market_id, market_question, market_type, resolution_window_hours, resolution_time, tier,
                raw_probability, raw_confidence, reasoning, signal_tags, headline_only_signal,
                calibration_adjustment, market_type_adjustment, signal_weight_adjustment,
                adjusted_probability, adjusted_confidence,
                market_price_at_decision, orderbook_depth_usd, fee_rate, calculated_edge, trade_score,
                action, skip_reason, position_size_usd, kelly_fraction_used, market_cluster_id,
                actual_outcome, pnl, brier_raw, brier_adjusted, resolved_at, unrealized_adverse_move,
                voided, void_reason
            ) VALUES (?,?,?,?, ?,?,?,?,?,?, ?,?,?,?,?, ?,?,?, ?,?, ?,?,?,?,?, ?,?,?,?,?, ?,?,?,?,?,?, ?,?)",
        )
        .bind(&r.record_id)
        .bind(&r.experiment_run)
        .bind(iso(&r.timestamp))
        .bind(&r.model_used)
        .bind(&r.market_id)
        .bind(&r.market_question)
        .bind(r.market_type.as_str())
        .bind(r.resolution_window_hours)
        .bind(iso_opt(&r.resolution_time))
        .bind(r.tier as i64)
        .bind(r.raw_probability)
        .bind(r.raw_confidence)
        .bind(&r.reasoning)
        .bind(serde_json::to_string(&r.signal_tags).unwrap_or_else(|_| "[]".to_string()))
        .bind(r.headline_only_signal)
        .bind(r.calibration_adjustment)
        .bind(r.market_type_adjustment)
        .bind(r.signal_weight_adjustment)
        .bind(r.adjusted_probability)
        .bind(r.adjusted_confidence)
        .bind(r.market_price_at_decision)
        .bind(r.orderbook_depth_usd)
        .bind(r.fee_rate)
        .bind(r.calculated_edge)
        .bind(r.trade_score)
        .bind(r.action.as_str())
        .bind(&r.skip_reason)
        .bind(r.position_size_usd)
        .bind(r.kelly_fraction_used)
        .bind(&r.market_cluster_id)
        .bind(r.actual_outcome)
        .bind(r.pnl)
        .bind(r.brier_raw)
        .bind(r.brier_adjusted)
        .bind(iso_opt(&r.resolved_at))
        .bind(r.unrealized_adverse_move)
        .bind(r.voided)
        .bind(&r.void_reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.message().contains("FOREIGN KEY") => {
                Err(BotError::Consistency(format!(
                    "trade {} references missing experiment run {}",
                    r.record_id, r.experiment_run
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the resolution / void fields back to an existing record
    pub async fn update_trade(&self, r: &TradeRecord) -> Result<()> {
        sqlx::query(
            "UPDATE trade_records SET
                actual_outcome=?, pnl=?, brier_raw=?, brier_adjusted=?,
                resolved_at=?, unrealized_adverse_move=?, voided=?, void_reason=?
             WHERE record_id=?",
        )
        .bind(r.actual_outcome)
        .bind(r.pnl)
        .bind(r.brier_raw)
        .bind(r.brier_adjusted)
        .bind(iso_opt(&r.resolved_at))
        .bind(r.unrealized_adverse_move)
        .bind(r.voided)
        .bind(&r.void_reason)
        .bind(&r.record_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_trade(&self, record_id: &str) -> Result<Option<TradeRecord>> {
        let row = sqlx::query("SELECT * FROM trade_records WHERE record_id = ?")
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_trade(&r)).transpose()
    }

    /// Unresolved, non-void records awaiting resolution. Evaluated skips
    /// (those with a real model estimate) are included so their
    /// counterfactuals feed back into learning; early skips with no
    /// estimate have nothing to resolve.
    pub async fn get_open_trades(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM trade_records
             WHERE actual_outcome IS NULL AND voided = 0
               AND (action != 'SKIP' OR raw_confidence > 0)",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn get_today_trades(&self, now: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let today = now.format("%Y-%m-%d").to_string();
        let rows = sqlx::query(
            "SELECT * FROM trade_records WHERE date(timestamp) = ? ORDER BY timestamp",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn get_week_trades(&self, now: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let week_ago = iso(&(now - Duration::days(7)));
        let rows = sqlx::query(
            "SELECT * FROM trade_records WHERE timestamp >= ? ORDER BY timestamp",
        )
        .bind(week_ago)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_trade).collect()
    }

    /// Resolved records in ascending timestamp order (the replay order)
    pub async fn get_resolved_trades(&self, include_voided: bool) -> Result<Vec<TradeRecord>> {
        let sql = if include_voided {
            "SELECT * FROM trade_records WHERE actual_outcome IS NOT NULL ORDER BY timestamp"
        } else {
            "SELECT * FROM trade_records WHERE actual_outcome IS NOT NULL AND voided = 0 ORDER BY timestamp"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn count_open_trades(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM trade_records
             WHERE actual_outcome IS NULL AND voided = 0 AND action != 'SKIP'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn count_today_trades(&self, now: DateTime<Utc>) -> Result<i64> {
        let today = now.format("%Y-%m-%d").to_string();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM trade_records WHERE date(timestamp) = ? AND action != 'SKIP'",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    // ------------------------------------------------------------------
    // Learning state
    // ------------------------------------------------------------------

    pub async fn load_calibration(&self) -> Result<Vec<CalibrationBucket>> {
        let mut buckets = Vec::with_capacity(CALIBRATION_BUCKET_RANGES.len());
        for range in CALIBRATION_BUCKET_RANGES {
            let key = format!("{}-{}", range.0, range.1);
            let row = sqlx::query("SELECT alpha, beta FROM calibration_state WHERE bucket_range = ?")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;
            let mut bucket = CalibrationBucket::new(range);
            if let Some(row) = row {
                bucket.alpha = row.try_get("alpha")?;
                bucket.beta = row.try_get("beta")?;
            }
            buckets.push(bucket);
        }
        Ok(buckets)
    }

    pub async fn load_market_type_performance(
        &self,
    ) -> Result<HashMap<MarketType, MarketTypePerformance>> {
        let rows = sqlx::query("SELECT * FROM market_type_performance")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let raw: String = row.try_get("market_type")?;
            let market_type = MarketType::from_str(&raw)
                .map_err(|_| BotError::Protocol(format!("unknown market type '{}'", raw)))?;
            let scores: String = row.try_get::<Option<String>, _>("brier_scores")?.unwrap_or_default();
            out.insert(
                market_type,
                MarketTypePerformance {
                    market_type,
                    total_trades: row.try_get::<i64, _>("total_trades")? as u32,
                    total_pnl: row.try_get("total_pnl")?,
                    brier_scores: serde_json::from_str(&scores).unwrap_or_default(),
                    total_observed_skips: row.try_get::<i64, _>("total_observed_skips")? as u32,
                    counterfactual_pnl: row.try_get("counterfactual_pnl")?,
                },
            );
        }
        Ok(out)
    }

    pub async fn load_signal_trackers(
        &self,
    ) -> Result<HashMap<(SourceTier, InfoType, MarketType), SignalTracker>> {
        let rows = sqlx::query("SELECT * FROM signal_trackers")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            let tier_raw: String = row.try_get("source_tier")?;
            let info_raw: String = row.try_get("info_type")?;
            let mtype_raw: String = row.try_get("market_type")?;
            let tier = SourceTier::from_str(&tier_raw)
                .map_err(|_| BotError::Protocol(format!("unknown source tier '{}'", tier_raw)))?;
            let info = InfoType::from_str(&info_raw)
                .map_err(|_| BotError::Protocol(format!("unknown info type '{}'", info_raw)))?;
            let mtype = MarketType::from_str(&mtype_raw)
                .map_err(|_| BotError::Protocol(format!("unknown market type '{}'", mtype_raw)))?;
            out.insert(
                (tier, info, mtype),
                SignalTracker {
                    source_tier: tier,
                    info_type: info,
                    market_type: mtype,
                    present_winning: row.try_get::<i64, _>("present_winning")? as u32,
                    present_losing: row.try_get::<i64, _>("present_losing")? as u32,
                    absent_winning: row.try_get::<i64, _>("absent_winning")? as u32,
                    absent_losing: row.try_get::<i64, _>("absent_losing")? as u32,
                },
            );
        }
        Ok(out)
    }

    /// Persist all three learning layers, and optionally the resolved record
    /// they were updated from, in a single transaction.
    pub async fn persist_learning(
        &self,
        learning: &LearningState,
        record: Option<&TradeRecord>,
    ) -> Result<()> {
        let now = iso(&Utc::now());
        let mut tx = self.pool.begin().await?;

        for bucket in learning.calibration.buckets() {
            let key = format!("{}-{}", bucket.lo, bucket.hi);
            sqlx::query(
                "INSERT INTO calibration_state (bucket_range, alpha, beta, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(bucket_range) DO UPDATE SET alpha=excluded.alpha,
                 beta=excluded.beta, updated_at=excluded.updated_at",
            )
            .bind(&key)
            .bind(bucket.alpha)
            .bind(bucket.beta)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        for perf in learning.market_types.performances() {
            sqlx::query(
                "INSERT INTO market_type_performance
                 (market_type, total_trades, total_pnl, brier_scores, total_observed_skips,
                  counterfactual_pnl, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(market_type) DO UPDATE SET
                 total_trades=excluded.total_trades, total_pnl=excluded.total_pnl,
                 brier_scores=excluded.brier_scores,
                 total_observed_skips=excluded.total_observed_skips,
                 counterfactual_pnl=excluded.counterfactual_pnl, updated_at=excluded.updated_at",
            )
            .bind(perf.market_type.as_str())
            .bind(perf.total_trades as i64)
            .bind(perf.total_pnl)
            .bind(serde_json::to_string(&perf.brier_scores).unwrap_or_else(|_| "[]".to_string()))
            .bind(perf.total_observed_skips as i64)
            .bind(perf.counterfactual_pnl)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        for tracker in learning.signal_trackers.trackers() {
            sqlx::query(
                "INSERT INTO signal_trackers
                 (source_tier, info_type, market_type, present_winning, present_losing,
                  absent_winning, absent_losing, last_updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(source_tier, info_type, market_type) DO UPDATE SET
                 present_winning=excluded.present_winning, present_losing=excluded.present_losing,
                 absent_winning=excluded.absent_winning, absent_losing=excluded.absent_losing,
                 last_updated=excluded.last_updated",
            )
            .bind(tracker.source_tier.as_str())
            .bind(tracker.info_type.as_str())
            .bind(tracker.market_type.as_str())
            .bind(tracker.present_winning as i64)
            .bind(tracker.present_losing as i64)
            .bind(tracker.absent_winning as i64)
            .bind(tracker.absent_losing as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(r) = record {
            sqlx::query(
                "UPDATE trade_records SET
                    actual_outcome=?, pnl=?, brier_raw=?, brier_adjusted=?,
                    resolved_at=?, unrealized_adverse_move=?, voided=?, void_reason=?
                 WHERE record_id=?",
            )
            .bind(r.actual_outcome)
            .bind(r.pnl)
            .bind(r.brier_raw)
            .bind(r.brier_adjusted)
            .bind(iso_opt(&r.resolved_at))
            .bind(r.unrealized_adverse_move)
            .bind(r.voided)
            .bind(&r.void_reason)
            .bind(&r.record_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Drop all persisted learning rows (used before a full rebuild)
    pub async fn clear_learning(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM calibration_state").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM market_type_performance").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM signal_trackers").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Experiment runs
    // ------------------------------------------------------------------

    pub async fn save_experiment(&self, run: &ExperimentRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO experiment_runs
             (run_id, started_at, ended_at, config_snapshot, description, model_used,
              include_in_learning, total_trades, total_pnl, avg_brier, sharpe_ratio)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.run_id)
        .bind(iso(&run.started_at))
        .bind(iso_opt(&run.ended_at))
        .bind(run.config_snapshot.to_string())
        .bind(&run.description)
        .bind(&run.model_used)
        .bind(run.include_in_learning)
        .bind(run.total_trades as i64)
        .bind(run.total_pnl)
        .bind(run.avg_brier)
        .bind(run.sharpe_ratio)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn current_experiment(&self) -> Result<Option<ExperimentRun>> {
        let row = sqlx::query(
            "SELECT * FROM experiment_runs WHERE ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_experiment(&r)).transpose()
    }

    pub async fn end_experiment(&self, run_id: &str, stats: &RunStats, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE experiment_runs SET ended_at=?, total_trades=?, total_pnl=?,
             avg_brier=?, sharpe_ratio=? WHERE run_id=?",
        )
        .bind(iso(&now))
        .bind(stats.total_trades as i64)
        .bind(stats.total_pnl)
        .bind(stats.avg_brier)
        .bind(stats.sharpe_ratio)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BotError::Consistency(format!(
                "experiment run {} does not exist",
                run_id
            )));
        }
        Ok(())
    }

    /// Aggregate stats for one experiment run (used when closing it out)
    pub async fn run_stats(&self, run_id: &str) -> Result<RunStats> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN action != 'SKIP' THEN 1 ELSE 0 END), 0) AS total_trades,
                COALESCE(SUM(CASE WHEN action != 'SKIP' THEN COALESCE(pnl, 0.0) ELSE 0.0 END), 0.0) AS total_pnl,
                COALESCE(AVG(brier_adjusted), 0.0) AS avg_brier
             FROM trade_records WHERE experiment_run = ? AND voided = 0",
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(RunStats {
            total_trades: row.try_get::<i64, _>("total_trades")? as u32,
            total_pnl: row.try_get("total_pnl")?,
            avg_brier: row.try_get("avg_brier")?,
            sharpe_ratio: 0.0,
        })
    }

    pub async fn save_model_swap(&self, event: &ModelSwapEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO model_swaps (timestamp, old_model, new_model, reason, experiment_run_started)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(iso(&event.timestamp))
        .bind(&event.old_model)
        .bind(&event.new_model)
        .bind(&event.reason)
        .bind(&event.experiment_run_started)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Portfolio
    // ------------------------------------------------------------------

    pub async fn load_portfolio(&self, initial_bankroll: f64) -> Result<Portfolio> {
        let row = sqlx::query("SELECT * FROM portfolio WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let mut portfolio = match row {
            Some(row) => Portfolio {
                cash_balance: row.try_get("cash_balance")?,
                total_equity: row.try_get("total_equity")?,
                total_pnl: row.try_get("total_pnl")?,
                peak_equity: row.try_get("peak_equity")?,
                max_drawdown: row.try_get("max_drawdown")?,
                open_positions: Vec::new(),
            },
            None => Portfolio::new(initial_bankroll),
        };

        let rows = sqlx::query("SELECT * FROM open_positions").fetch_all(&self.pool).await?;
        for row in rows {
            let side_raw: String = row.try_get("side")?;
            portfolio.open_positions.push(Position {
                market_id: row.try_get("market_id")?,
                side: Side::from_str(&side_raw)
                    .map_err(|_| BotError::Protocol(format!("unknown side '{}'", side_raw)))?,
                entry_price: row.try_get("entry_price")?,
                size_usd: row.try_get("size_usd")?,
                current_value: row.try_get("current_value")?,
                market_cluster_id: row.try_get("market_cluster_id")?,
            });
        }
        Ok(portfolio)
    }

    pub async fn save_portfolio(&self, p: &Portfolio) -> Result<()> {
        let now = iso(&Utc::now());
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO portfolio (id, cash_balance, total_equity, total_pnl, peak_equity, max_drawdown, updated_at)
             VALUES (1, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
             cash_balance=excluded.cash_balance, total_equity=excluded.total_equity,
             total_pnl=excluded.total_pnl, peak_equity=excluded.peak_equity,
             max_drawdown=excluded.max_drawdown, updated_at=excluded.updated_at",
        )
        .bind(p.cash_balance)
        .bind(p.total_equity)
        .bind(p.total_pnl)
        .bind(p.peak_equity)
        .bind(p.max_drawdown)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM open_positions").execute(&mut *tx).await?;
        for pos in &p.open_positions {
            sqlx::query(
                "INSERT INTO open_positions (market_id, side, entry_price, size_usd, current_value, market_cluster_id)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&pos.market_id)
            .bind(pos.side.as_str())
            .bind(pos.entry_price)
            .bind(pos.size_usd)
            .bind(pos.current_value)
            .bind(&pos.market_cluster_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // API costs & parse failures
    // ------------------------------------------------------------------

    pub async fn increment_api_cost(
        &self,
        service: &str,
        tokens_in: i64,
        tokens_out: i64,
    ) -> Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let cost = match service {
            "lm" => tokens_in as f64 * 0.000_005 + tokens_out as f64 * 0.000_025,
            "social" => 0.0075,
            _ => 0.0,
        };
        sqlx::query(
            "INSERT INTO api_costs (date, service, calls, tokens_in, tokens_out, cost_usd)
             VALUES (?, ?, 1, ?, ?, ?)
             ON CONFLICT(date, service) DO UPDATE SET
             calls = calls + 1, tokens_in = tokens_in + excluded.tokens_in,
             tokens_out = tokens_out + excluded.tokens_out, cost_usd = cost_usd + excluded.cost_usd",
        )
        .bind(today)
        .bind(service)
        .bind(tokens_in)
        .bind(tokens_out)
        .bind(cost)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn today_api_spend(&self) -> Result<f64> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let row = sqlx::query("SELECT COALESCE(SUM(cost_usd), 0.0) AS spend FROM api_costs WHERE date = ?")
            .bind(today)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("spend")?)
    }

    pub async fn today_service_calls(&self, service: &str) -> Result<i64> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let row = sqlx::query(
            "SELECT COALESCE(SUM(calls), 0) AS n FROM api_costs WHERE date = ? AND service = ?",
        )
        .bind(today)
        .bind(service)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn record_parse_failure(&self, market_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO parse_failures (market_id) VALUES (?)")
            .bind(market_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn today_parse_failures(&self) -> Result<i64> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM parse_failures WHERE date = ?")
            .bind(today)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Record the first observe-only transition of the day
    pub async fn log_observe_only(&self, trades_before: u32, now: DateTime<Utc>) -> Result<()> {
        let today = now.format("%Y-%m-%d").to_string();
        sqlx::query(
            "INSERT INTO daily_mode_log (date, observe_only_triggered_at, trades_before_observe)
             VALUES (?, ?, ?)
             ON CONFLICT(date) DO NOTHING",
        )
        .bind(today)
        .bind(iso(&now))
        .bind(trades_before as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_trade(row: &SqliteRow) -> Result<TradeRecord> {
    let market_type_raw: String = row.try_get("market_type")?;
    let action_raw: String = row.try_get("action")?;
    let tags_raw: String = row.try_get::<Option<String>, _>("signal_tags")?.unwrap_or_default();
    Ok(TradeRecord {
        record_id: row.try_get("record_id")?,
        experiment_run: row.try_get("experiment_run")?,
        timestamp: row
            .try_get::<String, _>("timestamp")
            .ok()
            .and_then(|s| parse_dt(&s))
            .unwrap_or_else(Utc::now),
        model_used: row.try_get("model_used")?,
        market_id: row.try_get("market_id")?,
        market_question: row.try_get("market_question")?,
        market_type: MarketType::from_str(&market_type_raw)
            .map_err(|_| BotError::Protocol(format!("unknown market type '{}'", market_type_raw)))?,
        resolution_window_hours: row.try_get::<Option<f64>, _>("resolution_window_hours")?.unwrap_or(0.0),
        resolution_time: row
            .try_get::<Option<String>, _>("resolution_time")?
            .and_then(|s| parse_dt(&s)),
        tier: row.try_get::<i64, _>("tier")? as u8,
        raw_probability: row.try_get("raw_probability")?,
        raw_confidence: row.try_get("raw_confidence")?,
        reasoning: row.try_get::<Option<String>, _>("reasoning")?.unwrap_or_default(),
        signal_tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
        headline_only_signal: row.try_get("headline_only_signal")?,
        calibration_adjustment: row.try_get::<Option<f64>, _>("calibration_adjustment")?.unwrap_or(0.0),
        market_type_adjustment: row.try_get::<Option<f64>, _>("market_type_adjustment")?.unwrap_or(0.0),
        signal_weight_adjustment: row.try_get::<Option<f64>, _>("signal_weight_adjustment")?.unwrap_or(0.0),
        adjusted_probability: row.try_get("adjusted_probability")?,
        adjusted_confidence: row.try_get("adjusted_confidence")?,
        market_price_at_decision: row.try_get("market_price_at_decision")?,
        orderbook_depth_usd: row.try_get::<Option<f64>, _>("orderbook_depth_usd")?.unwrap_or(0.0),
        fee_rate: row.try_get("fee_rate")?,
        calculated_edge: row.try_get("calculated_edge")?,
        trade_score: row.try_get::<Option<f64>, _>("trade_score")?.unwrap_or(0.0),
        action: Side::from_str(&action_raw)
            .map_err(|_| BotError::Protocol(format!("unknown action '{}'", action_raw)))?,
        skip_reason: row.try_get("skip_reason")?,
        position_size_usd: row.try_get::<Option<f64>, _>("position_size_usd")?.unwrap_or(0.0),
        kelly_fraction_used: row.try_get::<Option<f64>, _>("kelly_fraction_used")?.unwrap_or(0.0),
        market_cluster_id: row.try_get("market_cluster_id")?,
        actual_outcome: row.try_get("actual_outcome")?,
        pnl: row.try_get("pnl")?,
        brier_raw: row.try_get("brier_raw")?,
        brier_adjusted: row.try_get("brier_adjusted")?,
        resolved_at: row
            .try_get::<Option<String>, _>("resolved_at")?
            .and_then(|s| parse_dt(&s)),
        unrealized_adverse_move: row.try_get("unrealized_adverse_move")?,
        voided: row.try_get("voided")?,
        void_reason: row.try_get("void_reason")?,
    })
}

fn row_to_experiment(row: &SqliteRow) -> Result<ExperimentRun> {
    let snapshot_raw: String = row.try_get::<Option<String>, _>("config_snapshot")?.unwrap_or_default();
    Ok(ExperimentRun {
        run_id: row.try_get("run_id")?,
        started_at: row
            .try_get::<String, _>("started_at")
            .ok()
            .and_then(|s| parse_dt(&s))
            .unwrap_or_else(Utc::now),
        ended_at: row
            .try_get::<Option<String>, _>("ended_at")?
            .and_then(|s| parse_dt(&s)),
        config_snapshot: serde_json::from_str(&snapshot_raw).unwrap_or(serde_json::Value::Null),
        description: row.try_get::<Option<String>, _>("description")?.unwrap_or_default(),
        model_used: row.try_get("model_used")?,
        include_in_learning: row.try_get("include_in_learning")?,
        total_trades: row.try_get::<i64, _>("total_trades")? as u32,
        total_pnl: row.try_get("total_pnl")?,
        avg_brier: row.try_get("avg_brier")?,
        sharpe_ratio: row.try_get("sharpe_ratio")?,
    })
}
