//! Shared mutable state: the (Portfolio, LearningState) pair
//!
//! One lock guards both so a scan can read a single consistent snapshot and
//! the resolution path can update them together.

use crate::config::Settings;
use crate::error::Result;
use crate::learning::LearningState;
use crate::storage::Database;
use crate::types::Portfolio;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct AppState {
    pub portfolio: Portfolio,
    pub learning: LearningState,
}

pub type SharedState = Arc<RwLock<AppState>>;

/// Load portfolio and learning state from the store at startup
pub async fn load_shared_state(db: &Database, settings: &Settings) -> Result<SharedState> {
    let portfolio = db.load_portfolio(settings.initial_bankroll).await?;
    let learning = LearningState::load(db).await?;
    Ok(Arc::new(RwLock::new(AppState { portfolio, learning })))
}
