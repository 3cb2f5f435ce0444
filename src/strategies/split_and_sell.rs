//! Split and Sell
//!
//! Phase one converts USDT into equal YES and NO shares. Phase two sells
//! both sides over `sell_steps` orders, starting at the ask and chasing the
//! bid once an order has waited out its patience.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{
    cancel_on_shutdown, index_open, place, resolve_market, truncate_shares, OpenOrders, PollOutcome, Strategy,
    TrackedOrder,
};
use crate::error::StrategyError;
use crate::exchange::EventRef;
use crate::orderbook::BookSide;
use crate::pricing::{qualified_level, sell_quote};
use crate::task::{SplitAndSellConfig, StrategyContext};
use crate::trade_db::Trade;
use crate::types::{OutcomeMarket, OutcomeSide, PricingMode, Side, MIN_ORDER_USDT};

/// Cost basis of each side of a split pair
pub const SPLIT_UNIT_PRICE: Decimal = dec!(0.5);

const PATIENCE: u32 = 3;
const AGGRESSIVE_PATIENCE: u32 = 1;

/// Shares minted per side: one pair per USDT, truncated to 2 dp
pub fn split_shares(amount: Decimal) -> Decimal {
    truncate_shares(amount)
}

/// Next step's size; the last step takes the remainder
pub fn step_size(remaining: Decimal, steps_left: u32) -> Decimal {
    if steps_left <= 1 {
        remaining
    } else {
        truncate_shares(remaining / Decimal::from(steps_left))
    }
}

/// Unfilled cycles before a step order chases the bid
pub fn patience(config: &SplitAndSellConfig) -> u32 {
    if config.aggressive && config.sell_steps >= 2 {
        AGGRESSIVE_PATIENCE
    } else {
        PATIENCE
    }
}

#[derive(Debug, Clone)]
struct StepOrder {
    order: TrackedOrder,
    waited: u32,
    chased: bool,
}

#[derive(Debug, Clone)]
struct SideProgress {
    side: OutcomeSide,
    remaining: Decimal,
    steps_left: u32,
    current: Option<StepOrder>,
}

impl SideProgress {
    fn done(&self) -> bool {
        self.remaining <= Decimal::ZERO && self.current.is_none()
    }
}

struct Split {
    event: EventRef,
    market: OutcomeMarket,
    sides: Vec<SideProgress>,
}

pub struct SplitAndSell {
    config: SplitAndSellConfig,
    patience: u32,
    split: Option<Split>,
}

impl SplitAndSell {
    pub fn new(config: SplitAndSellConfig) -> Self {
        let patience = patience(&config);
        Self {
            config,
            patience,
            split: None,
        }
    }

    async fn do_split(&mut self, ctx: &StrategyContext) -> Result<(), StrategyError> {
        ctx.log.info(format!(
            "✂️ Split {} USDT, sell in {} step(s)",
            self.config.amount, self.config.sell_steps
        ));
        if self.config.aggressive && self.config.sell_steps < 2 {
            ctx.log.warn("⚠️ Aggressive mode needs at least 2 sell steps, ignoring it");
        }

        let shares = split_shares(self.config.amount);
        if shares <= Decimal::ZERO {
            return Err(StrategyError::Fatal(format!(
                "Split amount {} too small, nothing to split",
                self.config.amount
            )));
        }

        let (event, market) = resolve_market(ctx, &self.config.url, &self.config.outcome).await?;
        let credential = ctx.credential()?;

        // No retry: a timed out split may still have gone through
        let minted = match ctx.bounded(ctx.exchange.split(&market, shares, &credential)).await {
            Ok(minted) => truncate_shares(minted),
            Err(e) if e.is_auth() => return Err(StrategyError::CredentialExpired(e.to_string())),
            Err(e) => return Err(StrategyError::Fatal(format!("Split failed: {}", e))),
        };
        ctx.log.info(format!("✅ Split done: {} YES + {} NO", minted, minted));

        for side in OutcomeSide::BOTH {
            let trade = Trade::filled(
                &ctx.task_id,
                &market.event_title,
                &market.title,
                side,
                Side::Buy,
                SPLIT_UNIT_PRICE,
                minted,
            )
            .with_mode("split");
            ctx.record(trade);
        }

        let sides = OutcomeSide::BOTH
            .iter()
            .map(|side| SideProgress {
                side: *side,
                remaining: minted,
                steps_left: self.config.sell_steps.max(1),
                current: None,
            })
            .collect();
        self.split = Some(Split { event, market, sides });
        Ok(())
    }
}

#[async_trait]
impl Strategy for SplitAndSell {
    fn name(&self) -> &'static str {
        "Split and Sell"
    }

    async fn poll(&mut self, ctx: &StrategyContext) -> Result<PollOutcome, StrategyError> {
        if self.split.is_none() {
            self.do_split(ctx).await?;
        }
        let Some(split) = self.split.as_mut() else {
            return Ok(PollOutcome::Continue);
        };

        let book = ctx.call(ctx.exchange.get_order_book(&split.market)).await?;
        let credential = ctx.credential()?;
        let open = ctx
            .call(ctx.exchange.get_open_orders(Some(split.event.topic_id), &credential))
            .await?;
        let open = index_open(open);

        for progress in split.sides.iter_mut() {
            let step = StepCycle {
                ctx,
                config: &self.config,
                patience: self.patience,
                event: split.event,
                market: &split.market,
                book: book.side(progress.side),
                open: &open,
            };
            match step.advance(progress).await {
                Ok(()) => {}
                Err(StrategyError::Recoverable(msg)) => {
                    ctx.log.warn(format!("⚠️ {}: {}", progress.side, msg));
                }
                Err(e) => return Err(e),
            }
        }

        if split.sides.iter().all(SideProgress::done) {
            return Ok(PollOutcome::Completed("All split shares sold".to_string()));
        }
        Ok(PollOutcome::Continue)
    }

    async fn shutdown(&mut self, ctx: &StrategyContext) {
        let Some(split) = &self.split else {
            return;
        };
        for progress in &split.sides {
            if let Some(current) = &progress.current {
                cancel_on_shutdown(ctx, &format!("SELL {}", progress.side), &current.order).await;
            }
        }
    }
}

struct StepCycle<'a> {
    ctx: &'a StrategyContext,
    config: &'a SplitAndSellConfig,
    patience: u32,
    event: EventRef,
    market: &'a OutcomeMarket,
    book: &'a BookSide,
    open: &'a OpenOrders,
}

impl StepCycle<'_> {
    async fn advance(&self, progress: &mut SideProgress) -> Result<(), StrategyError> {
        let Some(mut current) = progress.current.clone() else {
            return self.place_step(progress).await;
        };

        if !self.open.contains_key(&current.order.placed.order_id) {
            let filled = self
                .ctx
                .verify_filled(&current.order.placed.order_id, Some(self.event.topic_id))
                .await?;
            if filled {
                self.record_fill(progress.side, &current.order);
                progress.remaining = (progress.remaining - current.order.shares).max(Decimal::ZERO);
                progress.steps_left = progress.steps_left.saturating_sub(1);
                progress.current = None;
                self.ctx.log.info(format!(
                    "📊 {}: {} shares left, {} step(s)",
                    progress.side, progress.remaining, progress.steps_left
                ));
            }
            return Ok(());
        }

        current.waited += 1;
        if current.chased || current.waited < self.patience {
            progress.current = Some(current);
            return Ok(());
        }

        let bid = sell_quote(
            self.book,
            PricingMode::Standard,
            self.config.min_volume,
            self.ctx.settings.tick,
        );
        let price = match bid {
            Ok(price) if price < current.order.price => price,
            _ => {
                progress.current = Some(current);
                return Ok(());
            }
        };

        self.ctx.log.info(format!(
            "🏃 {} waited {} cycle(s), chasing bid: {} → {}",
            progress.side, current.waited, current.order.price, price
        ));
        self.ctx.cancel_order(&current.order.placed).await?;
        progress.current = None;

        let filled = current.order.filled_in(self.open);
        if filled > Decimal::ZERO {
            self.record_fill(progress.side, &current.order.partial(filled));
            progress.remaining = (progress.remaining - filled).max(Decimal::ZERO);
        }

        // Only the unmatched part goes back on the book
        let unfilled = current.order.shares - filled;
        if unfilled <= Decimal::ZERO {
            progress.steps_left = progress.steps_left.saturating_sub(1);
            return Ok(());
        }
        if unfilled * price < MIN_ORDER_USDT {
            self.ctx.log.warn(format!(
                "⚠️ {}: {} unfilled shares worth ${}, below ${} minimum, leaving them",
                progress.side,
                unfilled,
                (unfilled * price).round_dp(2),
                MIN_ORDER_USDT
            ));
            progress.remaining = (progress.remaining - unfilled).max(Decimal::ZERO);
            progress.steps_left = progress.steps_left.saturating_sub(1);
            return Ok(());
        }

        let order = self.submit(progress.side, price, unfilled).await?;
        progress.current = Some(StepOrder {
            order,
            waited: 0,
            chased: true,
        });
        Ok(())
    }

    async fn place_step(&self, progress: &mut SideProgress) -> Result<(), StrategyError> {
        if progress.remaining <= Decimal::ZERO {
            return Ok(());
        }

        let level = match qualified_level(&self.book.asks, self.config.min_volume) {
            Some(level) if level.sufficient => level,
            Some(level) => {
                self.ctx.log.info(format!(
                    "⏸️ SELL {} waiting: ask depth {} < min {}",
                    progress.side, level.cumulative_size, self.config.min_volume
                ));
                return Ok(());
            }
            None => {
                self.ctx.log.info(format!("⏸️ SELL {} waiting: no asks", progress.side));
                return Ok(());
            }
        };
        let price = level.price;

        let mut shares = step_size(progress.remaining, progress.steps_left);
        if shares * price < MIN_ORDER_USDT {
            // Fold a too-small step into the remainder
            shares = progress.remaining;
            progress.steps_left = 1;
        }
        if shares * price < MIN_ORDER_USDT {
            self.ctx.log.warn(format!(
                "⚠️ {}: {} shares left worth ${}, below ${} minimum, leaving them",
                progress.side,
                shares,
                (shares * price).round_dp(2),
                MIN_ORDER_USDT
            ));
            progress.remaining = Decimal::ZERO;
            progress.steps_left = 0;
            return Ok(());
        }

        let order = self.submit(progress.side, price, shares).await?;
        progress.current = Some(StepOrder {
            order,
            waited: 0,
            chased: false,
        });
        Ok(())
    }

    async fn submit(
        &self,
        side: OutcomeSide,
        price: Decimal,
        shares: Decimal,
    ) -> Result<TrackedOrder, StrategyError> {
        self.ctx
            .log
            .info(format!("📤 Placing SELL {} @ {} ({} shares)", side, price, shares));
        place(
            self.ctx,
            self.market.topic_id,
            self.market.token_id(side),
            side,
            Side::Sell,
            price,
            shares,
        )
        .await
    }

    fn record_fill(&self, side: OutcomeSide, order: &TrackedOrder) {
        let profit = (order.price - SPLIT_UNIT_PRICE) * order.shares;
        self.ctx.log.info(format!(
            "💰 SELL {} filled: {} @ {} (profit ${})",
            side,
            order.shares,
            order.price,
            profit.round_dp(4)
        ));
        let trade = Trade::filled(
            &self.ctx.task_id,
            &self.market.event_title,
            &self.market.title,
            side,
            Side::Sell,
            order.price,
            order.shares,
        )
        .with_order_id(order.placed.order_id.clone())
        .with_mode("split")
        .with_profit(profit);
        self.ctx.record(trade);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sell_steps: u32, aggressive: bool) -> SplitAndSellConfig {
        SplitAndSellConfig {
            url: "42".to_string(),
            outcome: "Trump".to_string(),
            amount: dec!(10),
            sell_steps,
            aggressive,
            interval: 5.0,
            min_volume: dec!(5),
        }
    }

    #[test]
    fn test_split_rounding() {
        assert_eq!(split_shares(dec!(10)), dec!(10));
        assert_eq!(split_shares(dec!(10.5)), dec!(10.50));
        assert_eq!(split_shares(dec!(10.555)), dec!(10.55));
        assert_eq!(split_shares(dec!(0.004)), Decimal::ZERO);
    }

    #[test]
    fn test_step_sizes() {
        assert_eq!(step_size(dec!(10), 3), dec!(3.33));
        assert_eq!(step_size(dec!(6.67), 2), dec!(3.33));
        assert_eq!(step_size(dec!(3.34), 1), dec!(3.34));
        assert_eq!(step_size(dec!(10), 0), dec!(10));
    }

    #[test]
    fn test_patience() {
        assert_eq!(patience(&config(1, false)), 3);
        assert_eq!(patience(&config(1, true)), 3);
        assert_eq!(patience(&config(3, true)), 1);
        assert_eq!(patience(&config(3, false)), 3);
    }
}
