//! Trade execution: paper simulation and live placement
//!
//! Paper fills model slippage against order-book depth (taker) or a fill
//! probability peaked at mid prices (maker). Unfilled maker orders leave no
//! record. Tier 1 simulates taker fills, tier 2 maker fills.

use crate::config::Environment;
use crate::error::Result;
use crate::market::MarketSource;
use crate::storage::Database;
use crate::types::{Portfolio, Position, Side, TradeCandidate, TradeRecord};
use chrono::{DateTime, Utc};
use rand::Rng;

/// Fill style for the paper simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStyle {
    Taker,
    Maker,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub executed_price: f64,
    pub slippage: f64,
    pub fill_probability: f64,
    pub filled: bool,
}

/// Deterministic core of the simulator; `roll` decides maker fills
pub fn simulate_execution_with_roll(
    side: Side,
    price: f64,
    size_usd: f64,
    style: ExecutionStyle,
    orderbook_depth: f64,
    roll: f64,
) -> ExecutionResult {
    match style {
        ExecutionStyle::Maker => {
            let fill_probability = 0.4 + 0.4 * (1.0 - (price - 0.5).abs());
            ExecutionResult {
                executed_price: price.clamp(0.01, 0.99),
                slippage: 0.0,
                fill_probability,
                filled: roll < fill_probability,
            }
        }
        ExecutionStyle::Taker => {
            let slippage = 0.005 + 0.01 * (size_usd / orderbook_depth.max(1.0)).min(1.0);
            let executed_price = match side {
                Side::BuyYes => price + slippage,
                _ => price - slippage,
            };
            ExecutionResult {
                executed_price: executed_price.clamp(0.01, 0.99),
                slippage,
                fill_probability: 1.0,
                filled: true,
            }
        }
    }
}

pub fn simulate_execution(
    side: Side,
    price: f64,
    size_usd: f64,
    style: ExecutionStyle,
    orderbook_depth: f64,
) -> ExecutionResult {
    let roll = rand::thread_rng().gen::<f64>();
    simulate_execution_with_roll(side, price, size_usd, style, orderbook_depth, roll)
}

/// Execute one ranked candidate (paper or live), debit the portfolio, open
/// the position, and persist the trade record. Returns `None` when the
/// order does not fill.
pub async fn execute_candidate(
    candidate: &TradeCandidate,
    portfolio: &mut Portfolio,
    db: &Database,
    source: &dyn MarketSource,
    environment: Environment,
    experiment_run: &str,
    model_used: &str,
    now: DateTime<Utc>,
) -> Result<Option<TradeRecord>> {
    let result = match environment {
        Environment::Paper => {
            let style = if candidate.tier == 1 {
                ExecutionStyle::Taker
            } else {
                ExecutionStyle::Maker
            };
            simulate_execution(
                candidate.side,
                candidate.market_price,
                candidate.position_size,
                style,
                candidate.orderbook_depth,
            )
        }
        Environment::Live => {
            let fill = source
                .place_order(
                    &candidate.market.market_id,
                    candidate.side,
                    candidate.market_price,
                    candidate.position_size,
                )
                .await?;
            ExecutionResult {
                executed_price: fill.executed_price,
                slippage: (fill.executed_price - candidate.market_price).abs(),
                fill_probability: 1.0,
                filled: fill.filled,
            }
        }
    };

    if !result.filled {
        tracing::info!(
            market_id = %candidate.market.market_id,
            side = %candidate.side,
            "order not filled"
        );
        return Ok(None);
    }

    portfolio.cash_balance -= candidate.position_size;
    portfolio.open_positions.push(Position {
        market_id: candidate.market.market_id.clone(),
        side: candidate.side,
        entry_price: result.executed_price,
        size_usd: candidate.position_size,
        current_value: candidate.position_size,
        market_cluster_id: candidate.market_cluster_id.clone(),
    });
    db.save_portfolio(portfolio).await?;

    let record = TradeRecord::from_candidate(candidate, experiment_run, model_used, now);
    db.save_trade(&record).await?;

    tracing::info!(
        market_id = %candidate.market.market_id,
        side = %candidate.side,
        size = candidate.position_size,
        price = result.executed_price,
        slippage = result.slippage,
        "trade executed"
    );
    Ok(Some(record))
}
