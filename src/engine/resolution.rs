//! Resolution polling, pnl, and the adverse-move sweep
//!
//! Contracts pay $1 per share: a winning stake of `size` at entry price `q`
//! returns `size / q`, so pnl is `size/q - size`; a loss forfeits the stake.

use crate::engine::decision::determine_side;
use crate::learning::on_trade_resolved;
use crate::market::MarketSource;
use crate::state::SharedState;
use crate::storage::Database;
use crate::types::{MarketType, Side, TradeRecord};
use chrono::{Duration, Utc};

const ADVERSE_MOVE_THRESHOLD: f64 = 0.10;

fn entry_price_for(side: Side, yes_price: f64) -> f64 {
    let p = match side {
        Side::BuyNo => 1.0 - yes_price,
        _ => yes_price,
    };
    p.clamp(0.01, 0.99)
}

fn pnl_for(side: Side, yes_price_at_entry: f64, size_usd: f64, outcome: bool) -> f64 {
    if size_usd <= 0.0 {
        return 0.0;
    }
    let won = match side {
        Side::BuyYes => outcome,
        Side::BuyNo => !outcome,
        Side::Skip => return 0.0,
    };
    if won {
        let entry = entry_price_for(side, yes_price_at_entry);
        size_usd / entry - size_usd
    } else {
        -size_usd
    }
}

/// Realized pnl for an executed record under the given outcome
pub fn calculate_pnl(record: &TradeRecord, outcome: bool) -> f64 {
    pnl_for(
        record.action,
        record.market_price_at_decision,
        record.position_size_usd,
        outcome,
    )
}

/// Counterfactual pnl for a skipped record: what the trade would have
/// returned had it been taken in the direction the adjusted probability
/// pointed, at the recorded size.
pub fn hypothetical_pnl(record: &TradeRecord) -> f64 {
    let Some(outcome) = record.actual_outcome else {
        return 0.0;
    };
    let side = match record.action {
        Side::Skip => determine_side(record.adjusted_probability, record.market_price_at_decision),
        executed => executed,
    };
    pnl_for(
        side,
        record.market_price_at_decision,
        record.position_size_usd,
        outcome,
    )
}

/// Poll the venue for each open record and settle everything that resolved.
/// Per-record failures are logged and skipped; one bad market never stalls
/// the rest.
pub async fn resolve_open_trades(
    db: &Database,
    source: &dyn MarketSource,
    shared: &SharedState,
) -> usize {
    let open = match db.get_open_trades().await {
        Ok(open) => open,
        Err(e) => {
            tracing::error!(error = %e, "failed to load open trades");
            return 0;
        }
    };
    if open.is_empty() {
        return 0;
    }

    let now = Utc::now();
    let mut resolved_count = 0usize;

    for mut record in open {
        let market = match source.get_market(&record.market_id).await {
            Ok(Some(market)) => market,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(market_id = %record.market_id, error = %e, "resolution fetch failed");
                continue;
            }
        };

        let outcome = if market.resolved {
            match market.resolution {
                Some(outcome) => outcome,
                None => continue,
            }
        } else if record.market_type == MarketType::Crypto15m {
            // Short crypto windows settle by price once past their horizon
            let expected = record.resolution_time.unwrap_or_else(|| {
                record.timestamp
                    + Duration::seconds((record.resolution_window_hours * 3600.0) as i64)
            });
            if now < expected {
                continue;
            }
            market.yes_price > 0.5
        } else {
            continue;
        };

        let pnl = if record.is_executed() {
            calculate_pnl(&record, outcome)
        } else {
            0.0
        };
        record.actual_outcome = Some(outcome);
        record.pnl = Some(pnl);
        record.resolved_at = Some(now);

        let mut state = shared.write().await;

        // Skips settle for learning only; the portfolio never held them
        if record.is_executed() {
            state.portfolio.total_pnl += pnl;
            state.portfolio.cash_balance += record.position_size_usd + pnl;
            state
                .portfolio
                .open_positions
                .retain(|p| p.market_id != record.market_id);
            let positions_value: f64 =
                state.portfolio.open_positions.iter().map(|p| p.current_value).sum();
            state.portfolio.total_equity = state.portfolio.cash_balance + positions_value;
            if state.portfolio.total_equity > state.portfolio.peak_equity {
                state.portfolio.peak_equity = state.portfolio.total_equity;
            }
            if state.portfolio.peak_equity > 0.0 {
                let drawdown = (state.portfolio.peak_equity - state.portfolio.total_equity)
                    / state.portfolio.peak_equity;
                state.portfolio.max_drawdown = state.portfolio.max_drawdown.max(drawdown);
            }
            if let Err(e) = db.save_portfolio(&state.portfolio).await {
                tracing::error!(market_id = %record.market_id, error = %e, "portfolio save failed");
                continue;
            }
        }

        if let Err(e) = on_trade_resolved(&mut record, &mut state.learning, db).await {
            tracing::error!(market_id = %record.market_id, error = %e, "learning update failed");
            continue;
        }
        drop(state);

        resolved_count += 1;
        tracing::info!(
            market_id = %record.market_id,
            outcome = if outcome { "YES" } else { "NO" },
            pnl,
            brier_raw = ?record.brier_raw,
            brier_adjusted = ?record.brier_adjusted,
            "trade resolved"
        );
    }

    if resolved_count > 0 {
        tracing::info!(resolved = resolved_count, "resolution cycle complete");
    }
    resolved_count
}

/// Periodic sweep persisting the adverse-move fraction of open positions
pub async fn sweep_adverse_moves(db: &Database, source: &dyn MarketSource) {
    let open = match db.get_open_trades().await {
        Ok(open) => open,
        Err(e) => {
            tracing::error!(error = %e, "failed to load open trades for adverse sweep");
            return;
        }
    };

    for mut record in open {
        if !record.is_executed() {
            continue;
        }
        let market = match source.get_market(&record.market_id).await {
            Ok(Some(market)) => market,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(market_id = %record.market_id, error = %e, "adverse check failed");
                continue;
            }
        };

        let adverse = adverse_move(&record, market.yes_price);
        if adverse > ADVERSE_MOVE_THRESHOLD {
            record.unrealized_adverse_move = Some(adverse);
            if let Err(e) = db.update_trade(&record).await {
                tracing::error!(market_id = %record.market_id, error = %e, "adverse move persist failed");
                continue;
            }
            tracing::warn!(
                market_id = %record.market_id,
                adverse_move = adverse,
                "adverse move detected"
            );
        }
    }
}

/// Current adverse-move fraction versus entry, in YES-price terms
pub fn adverse_move(record: &TradeRecord, current_yes_price: f64) -> f64 {
    let entry = record.market_price_at_decision;
    match record.action {
        Side::BuyYes => (entry - current_yes_price).max(0.0),
        Side::BuyNo => (current_yes_price - entry).max(0.0),
        Side::Skip => 0.0,
    }
}
