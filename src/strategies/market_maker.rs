//! Market Maker
//!
//! Bid on YES and NO of one outcome, then offer every filled buy back at
//! the ask. Each side cycles Idle -> Buying -> Selling -> Idle until the
//! task is stopped; this strategy never completes on its own.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::Instant;

use super::{
    cancel_on_shutdown, index_open, place, resolve_market, truncate_shares, OpenOrders, PollOutcome, Strategy,
    TrackedOrder,
};
use crate::error::StrategyError;
use crate::exchange::EventRef;
use crate::orderbook::{BookSide, OrderBookSnapshot};
use crate::pricing::{ask_quote, buy_quote, qualified_level, QuoteSkip};
use crate::task::{MarketMakerConfig, StrategyContext};
use crate::trade_db::Trade;
use crate::types::{OutcomeMarket, OutcomeSide, Side, MIN_ORDER_USDT};

#[derive(Debug, Clone, PartialEq)]
enum SideState {
    Idle,
    Buying(TrackedOrder),
    /// Bought, sell not placed yet
    Holding { shares: Decimal, buy_price: Decimal },
    Selling { order: TrackedOrder, buy_price: Decimal },
}

/// Market lookup, done on the first poll
struct Resolved {
    event: EventRef,
    market: OutcomeMarket,
}

pub struct MarketMaker {
    config: MarketMakerConfig,
    resolved: Option<Resolved>,
    sides: Vec<(OutcomeSide, SideState)>,
    last_status: Option<Instant>,
}

impl MarketMaker {
    pub fn new(config: MarketMakerConfig) -> Self {
        let sides = match config.single_order_side {
            Some(side) => vec![(side, SideState::Idle)],
            None => OutcomeSide::BOTH.iter().map(|s| (*s, SideState::Idle)).collect(),
        };

        Self {
            config,
            resolved: None,
            sides,
            last_status: None,
        }
    }

    fn log_status(&mut self, ctx: &StrategyContext, book: &OrderBookSnapshot) {
        let now = Instant::now();
        match self.last_status {
            None => {
                self.last_status = Some(now);
                return;
            }
            Some(last) if now.duration_since(last) < ctx.settings.status_interval => return,
            Some(_) => self.last_status = Some(now),
        }

        ctx.log.info("─── Status Update ───");
        for (side, state) in &self.sides {
            let best = book
                .side(*side)
                .best_bid()
                .map_or_else(|| "N/A".to_string(), |p| p.to_string());
            let line = match state {
                SideState::Idle => format!("{}: idle (best bid {})", side, best),
                SideState::Buying(o) => format!(
                    "{}: BUY {} @ {} (best bid {}, ${})",
                    side,
                    o.shares,
                    o.price,
                    best,
                    (o.shares * o.price).round_dp(2)
                ),
                SideState::Holding { shares, buy_price } => {
                    format!("{}: holding {} bought @ {}", side, shares, buy_price)
                }
                SideState::Selling { order, buy_price } => format!(
                    "{}: SELL {} @ {} (bought @ {})",
                    side, order.shares, order.price, buy_price
                ),
            };
            ctx.log.info(format!("   📊 {}", line));
        }
    }
}

#[async_trait]
impl Strategy for MarketMaker {
    fn name(&self) -> &'static str {
        "Market Maker"
    }

    async fn poll(&mut self, ctx: &StrategyContext) -> Result<PollOutcome, StrategyError> {
        if self.resolved.is_none() {
            ctx.log.info(format!(
                "💹 {} USDT per side, {} mode, min volume {}",
                self.config.amount,
                self.config.mode.as_str(),
                self.config.min_volume
            ));
            if let Some(side) = self.config.single_order_side {
                ctx.log.info(format!("   Single order: {} only", side));
            }
            let (event, market) = resolve_market(ctx, &self.config.url, &self.config.outcome).await?;
            self.resolved = Some(Resolved { event, market });
        }

        let Self {
            config,
            resolved: Some(resolved),
            sides,
            ..
        } = self
        else {
            return Ok(PollOutcome::Continue);
        };

        let book = ctx.call(ctx.exchange.get_order_book(&resolved.market)).await?;
        let credential = ctx.credential()?;
        let open = ctx
            .call(ctx.exchange.get_open_orders(Some(resolved.event.topic_id), &credential))
            .await?;
        let open = index_open(open);

        for (side, state) in sides.iter_mut() {
            let step = SideStep {
                ctx,
                config: &*config,
                resolved: &*resolved,
                side: *side,
                book: book.side(*side),
                open: &open,
            };
            match step.advance(state).await {
                Ok(()) => {}
                Err(StrategyError::Recoverable(msg)) => ctx.log.warn(format!("⚠️ {}: {}", side, msg)),
                Err(e) => return Err(e),
            }
        }

        self.log_status(ctx, &book);
        Ok(PollOutcome::Continue)
    }

    async fn shutdown(&mut self, ctx: &StrategyContext) {
        for (side, state) in &self.sides {
            match state {
                SideState::Buying(order) => cancel_on_shutdown(ctx, &format!("BUY {}", side), order).await,
                SideState::Selling { order, .. } => {
                    cancel_on_shutdown(ctx, &format!("SELL {}", side), order).await
                }
                SideState::Idle | SideState::Holding { .. } => {}
            }
        }
    }
}

/// One side's view of the current cycle
struct SideStep<'a> {
    ctx: &'a StrategyContext,
    config: &'a MarketMakerConfig,
    resolved: &'a Resolved,
    side: OutcomeSide,
    book: &'a BookSide,
    open: &'a OpenOrders,
}

impl SideStep<'_> {
    async fn advance(&self, state: &mut SideState) -> Result<(), StrategyError> {
        match state.clone() {
            SideState::Idle => self.place_buy(state).await,
            SideState::Buying(order) => {
                if !self.open.contains_key(&order.placed.order_id) {
                    if !self.confirm_gone(&order).await? {
                        return Ok(());
                    }
                    self.ctx.log.info(format!(
                        "📦 {} BUY filled: {} @ {}",
                        self.side, order.shares, order.price
                    ));
                    self.record(Side::Buy, &order, None);
                    *state = SideState::Holding {
                        shares: order.shares,
                        buy_price: order.price,
                    };
                    return self.place_sell(state).await;
                }

                // Someone bid above us with enough depth
                let outbid = qualified_level(&self.book.bids, self.config.min_volume)
                    .is_some_and(|l| l.sufficient && l.price > order.price);
                if outbid {
                    let Ok(new_price) = self.buy_price() else {
                        return Ok(());
                    };
                    self.ctx.log.info(format!(
                        "🔄 Adjusting BUY {}: {} → {}",
                        self.side, order.price, new_price
                    ));
                    self.ctx.cancel_order(&order.placed).await?;
                    self.ctx.log.info("   🗑️ Cancelled old order");

                    // Whatever matched before the cancel is inventory now
                    let filled = order.filled_in(self.open);
                    if filled > Decimal::ZERO {
                        self.ctx.log.info(format!(
                            "📦 {} BUY partially filled: {} of {} @ {}",
                            self.side, filled, order.shares, order.price
                        ));
                        self.record(Side::Buy, &order.partial(filled), None);
                        *state = SideState::Holding {
                            shares: filled,
                            buy_price: order.price,
                        };
                        return self.place_sell(state).await;
                    }
                    *state = SideState::Idle;
                    self.place_buy(state).await?;
                }
                Ok(())
            }
            SideState::Holding { .. } => self.place_sell(state).await,
            SideState::Selling { order, buy_price } => {
                if !self.open.contains_key(&order.placed.order_id) {
                    if !self.confirm_gone(&order).await? {
                        return Ok(());
                    }
                    let profit = (order.price - buy_price) * order.shares;
                    self.ctx.log.info(format!(
                        "💰 {} SELL filled: {} @ {} (profit ${})",
                        self.side,
                        order.shares,
                        order.price,
                        profit.round_dp(4)
                    ));
                    self.record(Side::Sell, &order, Some(profit));
                    *state = SideState::Idle;
                    return Ok(());
                }

                // A cheaper qualified ask sits ahead of us
                let undercut = qualified_level(&self.book.asks, self.config.min_volume)
                    .is_some_and(|l| l.sufficient && l.price < order.price);
                if undercut {
                    let Ok(new_price) = self.ask_price() else {
                        return Ok(());
                    };
                    self.ctx.log.info(format!(
                        "🔄 Adjusting SELL {}: {} → {}",
                        self.side, order.price, new_price
                    ));
                    self.ctx.cancel_order(&order.placed).await?;
                    self.ctx.log.info("   🗑️ Cancelled old order");

                    let filled = order.filled_in(self.open);
                    if filled > Decimal::ZERO {
                        let profit = (order.price - buy_price) * filled;
                        self.ctx.log.info(format!(
                            "💰 {} SELL partially filled: {} of {} @ {} (profit ${})",
                            self.side,
                            filled,
                            order.shares,
                            order.price,
                            profit.round_dp(4)
                        ));
                        self.record(Side::Sell, &order.partial(filled), Some(profit));
                    }
                    let unsold = order.shares - filled;
                    *state = if unsold > Decimal::ZERO {
                        SideState::Holding {
                            shares: unsold,
                            buy_price,
                        }
                    } else {
                        SideState::Idle
                    };
                    self.place_sell(state).await?;
                }
                Ok(())
            }
        }
    }

    fn buy_price(&self) -> Result<Decimal, QuoteSkip> {
        buy_quote(self.book, self.config.mode, self.config.min_volume, self.ctx.settings.tick)
    }

    fn ask_price(&self) -> Result<Decimal, QuoteSkip> {
        ask_quote(self.book, self.config.mode, self.config.min_volume, self.ctx.settings.tick)
    }

    async fn place_buy(&self, state: &mut SideState) -> Result<(), StrategyError> {
        let price = match self.buy_price() {
            Ok(price) => price,
            Err(skip) => {
                self.ctx.log.info(format!("⏸️ BUY {} skipped: {}", self.side, skip));
                return Ok(());
            }
        };

        let shares = truncate_shares(self.config.amount / price);
        if shares * price < MIN_ORDER_USDT {
            self.ctx.log.warn(format!(
                "⚠️ BUY {} skipped: ${} below ${} minimum",
                self.side,
                (shares * price).round_dp(2),
                MIN_ORDER_USDT
            ));
            return Ok(());
        }

        self.ctx.log.info(format!("📥 Placing BUY {} @ {} ({} shares)", self.side, price, shares));
        let market = &self.resolved.market;
        let order = place(
            self.ctx,
            market.topic_id,
            market.token_id(self.side),
            self.side,
            Side::Buy,
            price,
            shares,
        )
        .await?;
        *state = SideState::Buying(order);
        Ok(())
    }

    async fn place_sell(&self, state: &mut SideState) -> Result<(), StrategyError> {
        let SideState::Holding { shares, buy_price } = state.clone() else {
            return Ok(());
        };

        let price = match self.ask_price() {
            Ok(price) => price,
            Err(skip) => {
                self.ctx.log.info(format!("⏸️ SELL {} waiting: {}", self.side, skip));
                return Ok(());
            }
        };

        if shares * price < MIN_ORDER_USDT {
            self.ctx.log.warn(format!(
                "⚠️ SELL {} value ${} below ${} minimum, releasing {} shares",
                self.side,
                (shares * price).round_dp(2),
                MIN_ORDER_USDT,
                shares
            ));
            *state = SideState::Idle;
            return Ok(());
        }

        self.ctx.log.info(format!("📤 Placing SELL {} @ {} ({} shares)", self.side, price, shares));
        let market = &self.resolved.market;
        let order = place(
            self.ctx,
            market.topic_id,
            market.token_id(self.side),
            self.side,
            Side::Sell,
            price,
            shares,
        )
        .await?;
        *state = SideState::Selling { order, buy_price };
        Ok(())
    }

    async fn confirm_gone(&self, order: &TrackedOrder) -> Result<bool, StrategyError> {
        self.ctx
            .verify_filled(&order.placed.order_id, Some(self.resolved.event.topic_id))
            .await
    }

    fn record(&self, action: Side, order: &TrackedOrder, profit: Option<Decimal>) {
        let market = &self.resolved.market;
        let mut trade = Trade::filled(
            &self.ctx.task_id,
            &market.event_title,
            &market.title,
            self.side,
            action,
            order.price,
            order.shares,
        )
        .with_order_id(order.placed.order_id.clone())
        .with_mode(self.config.mode.as_str());
        if let Some(profit) = profit {
            trade = trade.with_profit(profit);
        }
        self.ctx.record(trade);
    }
}
