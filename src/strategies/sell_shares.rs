//! Sell Shares
//!
//! Liquidates held positions, optionally only those under one parent topic.
//! Completes once nothing sellable is held and no sell order is resting.
//! A sell counts as filled only after its order left the book; the shares
//! recorded are what the position lost, never more than the order size.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

use super::{cancel_on_shutdown, index_open, place, truncate_shares, OpenOrders, PollOutcome, Strategy, TrackedOrder};
use crate::error::StrategyError;
use crate::exchange::EventRef;
use crate::pricing::{qualified_level, sell_quote};
use crate::task::{SellSharesConfig, StrategyContext};
use crate::trade_db::Trade;
use crate::types::{OutcomeMarket, Position, Side, MIN_ORDER_USDT};

/// Positions at or below this many shares are dust
const DUST_SHARES: Decimal = dec!(0.01);

/// Whether a position is still worth selling
pub fn is_sellable(position: &Position) -> bool {
    position.shares > DUST_SHARES && position.value() >= MIN_ORDER_USDT
}

/// Sell order we placed for one position
#[derive(Debug, Clone)]
struct Queued {
    order: TrackedOrder,
    event_title: String,
    title: String,
    position: Position,
}

pub struct SellShares {
    config: SellSharesConfig,
    /// Outcome markets per parent topic
    markets: HashMap<u64, Vec<OutcomeMarket>>,
    /// Keyed by `Position::key`
    queued: HashMap<String, Queued>,
    started: bool,
}

impl SellShares {
    pub fn new(config: SellSharesConfig) -> Self {
        Self {
            config,
            markets: HashMap::new(),
            queued: HashMap::new(),
            started: false,
        }
    }

    async fn market_for(
        &mut self,
        ctx: &StrategyContext,
        position: &Position,
    ) -> Result<Option<OutcomeMarket>, StrategyError> {
        if !self.markets.contains_key(&position.parent_topic_id) {
            let outcomes = ctx
                .call(ctx.exchange.get_outcomes(&EventRef::new(position.parent_topic_id)))
                .await?;
            self.markets.insert(position.parent_topic_id, outcomes);
        }

        Ok(self
            .markets
            .get(&position.parent_topic_id)
            .and_then(|outcomes| outcomes.iter().find(|m| m.topic_id == position.topic_id))
            .cloned())
    }

    async fn sell_position(
        &mut self,
        ctx: &StrategyContext,
        position: &Position,
        open: &OpenOrders,
    ) -> Result<(), StrategyError> {
        let key = position.key();

        let Some(market) = self.market_for(ctx, position).await? else {
            ctx.log.warn(format!(
                "⚠️ {} {}: outcome market not found under topic {}",
                position.title, position.side, position.parent_topic_id
            ));
            return Ok(());
        };
        let book = ctx.call(ctx.exchange.get_order_book(&market)).await?;
        let book = book.side(position.side);
        let tick = ctx.settings.tick;

        if let Some(queued) = self.queued.get(&key) {
            let undercut = qualified_level(&book.asks, self.config.min_volume)
                .is_some_and(|l| l.sufficient && l.price < queued.order.price);
            if !undercut {
                return Ok(());
            }

            let Ok(price) = sell_quote(book, self.config.mode, self.config.min_volume, tick) else {
                return Ok(());
            };
            if price == queued.order.price {
                return Ok(());
            }
            ctx.log.info(format!(
                "🔄 Adjusting SELL {} {}: {} → {}",
                position.title, position.side, queued.order.price, price
            ));
            ctx.cancel_order(&queued.order.placed).await?;
            let filled = queued.order.filled_in(open);
            if let Some(queued) = self.queued.remove(&key) {
                if filled > Decimal::ZERO {
                    self.record_fill(ctx, &queued, filled);
                }
            }
            // The freed shares show up as available on the next fetch
            return Ok(());
        }

        if !is_sellable(position) {
            return Ok(());
        }

        let shares = truncate_shares(position.available());
        if shares <= DUST_SHARES {
            return Ok(());
        }

        let price = match sell_quote(book, self.config.mode, self.config.min_volume, tick) {
            Ok(price) => price,
            Err(skip) => {
                ctx.log
                    .info(format!("⏸️ SELL {} {} skipped: {}", position.title, position.side, skip));
                return Ok(());
            }
        };

        if shares * price < MIN_ORDER_USDT {
            ctx.log.warn(format!(
                "⚠️ SELL {} {} skipped: ${} below ${} minimum",
                position.title,
                position.side,
                (shares * price).round_dp(2),
                MIN_ORDER_USDT
            ));
            return Ok(());
        }

        ctx.log.info(format!(
            "📤 Placing SELL {} {} @ {} ({} shares)",
            position.title, position.side, price, shares
        ));
        let order = place(
            ctx,
            position.topic_id,
            &position.token_id,
            position.side,
            Side::Sell,
            price,
            shares,
        )
        .await?;

        self.queued.insert(
            key,
            Queued {
                order,
                event_title: market.event_title,
                title: market.title,
                position: position.clone(),
            },
        );
        Ok(())
    }

    /// Settle queued orders that left the book against what is still held
    fn reconcile(&mut self, ctx: &StrategyContext, held: &HashMap<String, &Position>, open: &OpenOrders) {
        let gone: Vec<String> = self
            .queued
            .iter()
            .filter(|(_, q)| !open.contains_key(&q.order.placed.order_id))
            .map(|(key, _)| key.clone())
            .collect();

        for key in gone {
            let Some(queued) = self.queued.remove(&key) else {
                continue;
            };
            match held.get(&key) {
                None => self.record_fill(ctx, &queued, queued.order.shares),
                Some(position) => {
                    // Cancelled elsewhere, possibly after a partial fill
                    let sold = truncate_shares((queued.position.shares - position.shares).min(queued.order.shares));
                    if sold > Decimal::ZERO {
                        self.record_fill(ctx, &queued, sold);
                    }
                    ctx.log.info(format!(
                        "📋 {} {}: order {} no longer open, re-queueing {} shares",
                        position.title,
                        position.side,
                        queued.order.placed.order_id,
                        position.available()
                    ));
                }
            }
        }
    }

    fn record_fill(&self, ctx: &StrategyContext, queued: &Queued, shares: Decimal) {
        ctx.log.info(format!(
            "💰 SELL {} {} filled: {} @ {}",
            queued.title, queued.position.side, shares, queued.order.price
        ));
        let trade = Trade::filled(
            &ctx.task_id,
            &queued.event_title,
            &queued.title,
            queued.position.side,
            Side::Sell,
            queued.order.price,
            shares,
        )
        .with_order_id(queued.order.placed.order_id.clone())
        .with_mode(self.config.mode.as_str());
        ctx.record(trade);
    }
}

#[async_trait]
impl Strategy for SellShares {
    fn name(&self) -> &'static str {
        "Sell Shares"
    }

    async fn poll(&mut self, ctx: &StrategyContext) -> Result<PollOutcome, StrategyError> {
        if !self.started {
            match self.config.topic_id {
                Some(topic) => ctx.log.info(format!("💼 Selling positions under topic {}", topic)),
                None => ctx.log.info("💼 Selling all positions"),
            }
            ctx.log.info(format!(
                "   {} mode, min volume {}",
                self.config.mode.as_str(),
                self.config.min_volume
            ));
            self.started = true;
        }

        let credential = ctx.credential()?;
        // Open orders first: an order missing here has already settled in the positions read next
        let open = ctx
            .call(ctx.exchange.get_open_orders(self.config.topic_id, &credential))
            .await?;
        let open = index_open(open);
        let positions: Vec<Position> = ctx
            .call(ctx.exchange.get_positions(self.config.topic_id, &credential))
            .await?
            .into_iter()
            .filter(|p| self.config.topic_id.map_or(true, |t| p.parent_topic_id == t))
            .collect();

        let held: HashMap<String, &Position> = positions.iter().map(|p| (p.key(), p)).collect();
        self.reconcile(ctx, &held, &open);

        // Anything still queued is tracked even once it drops below the sellable floor
        let targets: Vec<&Position> = positions
            .iter()
            .filter(|p| is_sellable(p) || self.queued.contains_key(&p.key()))
            .collect();

        if targets.is_empty() && self.queued.is_empty() {
            return Ok(PollOutcome::Completed("All positions sold".to_string()));
        }

        for position in targets.iter().copied() {
            match self.sell_position(ctx, position, &open).await {
                Ok(()) => {}
                Err(StrategyError::Recoverable(msg)) => {
                    ctx.log
                        .warn(format!("⚠️ {} {}: {}", position.title, position.side, msg));
                }
                Err(e) => return Err(e),
            }
        }

        ctx.log.info(format!(
            "📊 {} positions left, {} orders queued",
            targets.len(),
            self.queued.len()
        ));
        Ok(PollOutcome::Continue)
    }

    async fn shutdown(&mut self, ctx: &StrategyContext) {
        for queued in self.queued.values() {
            let label = format!("SELL {} {}", queued.title, queued.position.side);
            cancel_on_shutdown(ctx, &label, &queued.order).await;
        }
    }
}
