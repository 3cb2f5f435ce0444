//! Trading strategies
//!
//! Each task type maps to exactly one strategy, resolved once at start.
//! A strategy is a state machine advanced by the worker one poll at a time.

pub mod market_maker;
pub mod sell_shares;
pub mod split_and_sell;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

use crate::error::StrategyError;
use crate::exchange::{find_outcome, EventRef};
use crate::task::{StrategyContext, TaskConfig};
use crate::types::{OpenOrder, OrderRequest, OutcomeMarket, OutcomeSide, PlacedOrder, Side};

pub use market_maker::MarketMaker;
pub use sell_shares::SellShares;
pub use split_and_sell::SplitAndSell;

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Continue,
    /// Terminal success, with a closing log message
    Completed(String),
}

#[async_trait]
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Advance one cycle
    async fn poll(&mut self, ctx: &StrategyContext) -> Result<PollOutcome, StrategyError>;

    /// Called once after the last poll, also on stop; cancels resting orders
    async fn shutdown(&mut self, _ctx: &StrategyContext) {}
}

pub fn build_strategy(config: &TaskConfig) -> Box<dyn Strategy> {
    match config {
        TaskConfig::MarketMaker(c) => Box::new(MarketMaker::new(c.clone())),
        TaskConfig::SellShares(c) => Box::new(SellShares::new(c.clone())),
        TaskConfig::SplitAndSell(c) => Box::new(SplitAndSell::new(c.clone())),
    }
}

/// Order we placed and still track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub placed: PlacedOrder,
    pub price: Decimal,
    pub shares: Decimal,
}

impl TrackedOrder {
    /// Shares the exchange reports as matched while the order rests
    pub fn filled_in(&self, open: &OpenOrders) -> Decimal {
        open.get(&self.placed.order_id).map_or(Decimal::ZERO, |o| {
            truncate_shares(o.filled.max(Decimal::ZERO).min(self.shares))
        })
    }

    /// The same order cut down to `shares`, for recording a partial fill
    pub fn partial(&self, shares: Decimal) -> TrackedOrder {
        TrackedOrder {
            shares,
            ..self.clone()
        }
    }
}

/// One cycle's open orders, keyed by order id
pub type OpenOrders = HashMap<String, OpenOrder>;

pub fn index_open(open: Vec<OpenOrder>) -> OpenOrders {
    open.into_iter().map(|o| (o.order_id.clone(), o)).collect()
}

/// Share quantities are truncated to 2 dp so we never overspend
pub fn truncate_shares(shares: Decimal) -> Decimal {
    shares.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Look up the configured outcome of an event; a missing outcome is fatal
pub(crate) async fn resolve_market(
    ctx: &StrategyContext,
    url: &str,
    outcome: &str,
) -> Result<(EventRef, OutcomeMarket), StrategyError> {
    let event = EventRef::parse(url).map_err(StrategyError::Fatal)?;
    ctx.log.info(format!("📌 Topic ID: {}", event.topic_id));

    let outcomes = ctx.call(ctx.exchange.get_outcomes(&event)).await?;
    let market = find_outcome(&outcomes, outcome)
        .map_err(StrategyError::Fatal)?
        .clone();

    ctx.log.info(format!("🎯 Outcome: {} (child topic {})", market.title, market.topic_id));
    Ok((event, market))
}

/// Place a limit order and start tracking it
pub(crate) async fn place(
    ctx: &StrategyContext,
    topic_id: u64,
    token_id: &str,
    outcome: OutcomeSide,
    side: Side,
    price: Decimal,
    shares: Decimal,
) -> Result<TrackedOrder, StrategyError> {
    let request = OrderRequest {
        topic_id,
        token_id: token_id.to_string(),
        outcome,
        side,
        price,
        shares,
    };
    let placed = ctx.place_order(&request).await?;
    ctx.log.info(format!("   ✅ Order ID: {}", placed.order_id));

    Ok(TrackedOrder { placed, price, shares })
}

/// Cancel a tracked order during shutdown, logging the result
pub(crate) async fn cancel_on_shutdown(ctx: &StrategyContext, label: &str, order: &TrackedOrder) {
    let Some(credential) = ctx.latest_credential() else {
        ctx.log.warn(format!("⚠️ Cannot cancel {}: no auth token", label));
        return;
    };

    match ctx.bounded(ctx.exchange.cancel_order(&order.placed, &credential)).await {
        Ok(()) => ctx.log.info(format!("🗑️ Cancelled {} @ {}", label, order.price)),
        Err(e) => ctx.log.warn(format!("⚠️ Failed to cancel {}: {}", label, e)),
    }
}
