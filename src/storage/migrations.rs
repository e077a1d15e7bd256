//! Versioned schema migrations, applied at startup

use crate::error::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub const SCHEMA_VERSION: i64 = 2;

const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS experiment_runs (
        run_id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        config_snapshot TEXT NOT NULL,
        description TEXT,
        model_used TEXT NOT NULL,
        include_in_learning INTEGER DEFAULT 1,
        total_trades INTEGER DEFAULT 0,
        total_pnl REAL DEFAULT 0.0,
        avg_brier REAL DEFAULT 0.0,
        sharpe_ratio REAL DEFAULT 0.0
    )",
    "CREATE TABLE IF NOT EXISTS model_swaps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        old_model TEXT NOT NULL,
        new_model TEXT NOT NULL,
        reason TEXT,
        experiment_run_started TEXT REFERENCES experiment_runs(run_id)
    )",
    "CREATE TABLE IF NOT EXISTS trade_records (
        record_id TEXT PRIMARY KEY,
        experiment_run TEXT NOT NULL REFERENCES experiment_runs(run_id),
        timestamp TEXT NOT NULL,
        model_used TEXT NOT NULL,

        market_id TEXT NOT NULL,
        market_question TEXT NOT NULL,
        market_type TEXT NOT NULL,
        resolution_window_hours REAL,
        tier INTEGER NOT NULL,

        raw_probability REAL NOT NULL,
        raw_confidence REAL NOT NULL,
        reasoning TEXT,
        signal_tags TEXT,
        headline_only_signal INTEGER DEFAULT 0,

        calibration_adjustment REAL DEFAULT 0,
        market_type_adjustment REAL DEFAULT 0,
        signal_weight_adjustment REAL DEFAULT 0,
        adjusted_probability REAL NOT NULL,
        adjusted_confidence REAL NOT NULL,

        market_price_at_decision REAL NOT NULL,
        orderbook_depth_usd REAL,
        fee_rate REAL NOT NULL,
        calculated_edge REAL NOT NULL,
        trade_score REAL,

        action TEXT NOT NULL,
        skip_reason TEXT,
        position_size_usd REAL DEFAULT 0,
        kelly_fraction_used REAL DEFAULT 0,
        market_cluster_id TEXT,

        actual_outcome INTEGER,
        pnl REAL,
        brier_raw REAL,
        brier_adjusted REAL,
        resolved_at TEXT,
        unrealized_adverse_move REAL,

        voided INTEGER DEFAULT 0,
        void_reason TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_trades_market_type ON trade_records(market_type)",
    "CREATE INDEX IF NOT EXISTS idx_trades_experiment ON trade_records(experiment_run)",
    "CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trade_records(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_trades_open ON trade_records(actual_outcome)
        WHERE actual_outcome IS NULL AND voided = 0",
    "CREATE INDEX IF NOT EXISTS idx_trades_headline ON trade_records(headline_only_signal)
        WHERE headline_only_signal = 1",
    "CREATE TABLE IF NOT EXISTS calibration_state (
        bucket_range TEXT PRIMARY KEY,
        alpha REAL NOT NULL,
        beta REAL NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS market_type_performance (
        market_type TEXT PRIMARY KEY,
        total_trades INTEGER DEFAULT 0,
        total_pnl REAL DEFAULT 0.0,
        brier_scores TEXT,
        total_observed_skips INTEGER DEFAULT 0,
        counterfactual_pnl REAL DEFAULT 0.0,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS signal_trackers (
        source_tier TEXT NOT NULL,
        info_type TEXT NOT NULL,
        market_type TEXT NOT NULL,
        present_winning INTEGER DEFAULT 0,
        present_losing INTEGER DEFAULT 0,
        absent_winning INTEGER DEFAULT 0,
        absent_losing INTEGER DEFAULT 0,
        last_updated TEXT,
        PRIMARY KEY (source_tier, info_type, market_type)
    )",
    "CREATE TABLE IF NOT EXISTS portfolio (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        cash_balance REAL NOT NULL,
        total_equity REAL NOT NULL,
        total_pnl REAL NOT NULL,
        peak_equity REAL NOT NULL,
        max_drawdown REAL NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS open_positions (
        market_id TEXT PRIMARY KEY,
        side TEXT NOT NULL,
        entry_price REAL NOT NULL,
        size_usd REAL NOT NULL,
        current_value REAL NOT NULL,
        market_cluster_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS api_costs (
        date TEXT NOT NULL,
        service TEXT NOT NULL,
        calls INTEGER DEFAULT 0,
        tokens_in INTEGER DEFAULT 0,
        tokens_out INTEGER DEFAULT 0,
        cost_usd REAL DEFAULT 0.0,
        PRIMARY KEY (date, service)
    )",
    "CREATE TABLE IF NOT EXISTS daily_mode_log (
        date TEXT PRIMARY KEY,
        observe_only_triggered_at TEXT,
        trades_before_observe INTEGER DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS parse_failures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market_id TEXT NOT NULL,
        timestamp TEXT NOT NULL DEFAULT (datetime('now')),
        date TEXT NOT NULL DEFAULT (date('now'))
    )",
];

const MIGRATION_V2: &[&str] = &["ALTER TABLE trade_records ADD COLUMN resolution_time TEXT"];

fn migration(version: i64) -> &'static [&'static str] {
    match version {
        1 => MIGRATION_V1,
        2 => MIGRATION_V2,
        _ => &[],
    }
}

async fn current_version(pool: &SqlitePool) -> i64 {
    let row = sqlx::query("SELECT MAX(version) AS version FROM schema_version")
        .fetch_optional(pool)
        .await;
    match row {
        Ok(Some(row)) => row.try_get::<Option<i64>, _>("version").ok().flatten().unwrap_or(0),
        _ => 0,
    }
}

/// Apply all pending migrations, each version in its own transaction
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = current_version(pool).await;

    for version in (current + 1)..=SCHEMA_VERSION {
        let mut tx = pool.begin().await?;
        for stmt in migration(version) {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(version, "schema migration applied");
    }

    Ok(())
}
