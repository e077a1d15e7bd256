//! Health surface
//!
//! Single axum endpoint reporting scan liveness, mode, trade counts and
//! uptime. Degraded (503) when no scan has completed in 30 minutes.

use crate::error::{BotError, Result};
use crate::storage::Database;
use crate::types::BotMode;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

const STALE_AFTER_MINUTES: f64 = 30.0;

#[derive(Clone)]
pub struct HealthState {
    pub db: Database,
    pub last_scan: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub mode: Arc<RwLock<BotMode>>,
    pub started_at: Instant,
}

impl HealthState {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            last_scan: Arc::new(RwLock::new(None)),
            mode: Arc::new(RwLock::new(BotMode::Initializing)),
            started_at: Instant::now(),
        }
    }
}

async fn health_body(state: &HealthState) -> (bool, serde_json::Value) {
    let now = Utc::now();
    let last_scan = *state.last_scan.read().await;
    let minutes_since = last_scan.map(|t| (now - t).num_seconds() as f64 / 60.0);
    let healthy = minutes_since.map(|m| m <= STALE_AFTER_MINUTES).unwrap_or(false);

    let open_trades = state.db.count_open_trades().await.unwrap_or(0);
    let today_trades = state.db.count_today_trades(now).await.unwrap_or(0);
    let mode = *state.mode.read().await;

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "last_scan_completed": last_scan.map(|t| t.to_rfc3339()),
        "minutes_since_scan": minutes_since,
        "mode": mode.as_str(),
        "open_trades": open_trades,
        "today_trades": today_trades,
        "uptime_hours": state.started_at.elapsed().as_secs_f64() / 3600.0,
    });
    (healthy, body)
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let (healthy, body) = health_body(&state).await;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Serve the health endpoint until the process exits
pub async fn serve(state: HealthState, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| BotError::Internal(format!("health listener bind failed: {}", e)))?;
    tracing::info!(port, "health endpoint listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| BotError::Internal(format!("health server failed: {}", e)))
}
