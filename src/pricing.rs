//! Pricing engine
//!
//! Pure functions from an order-book snapshot to a target order price.
//! Nothing in here performs I/O, so every rule is covered by table tests.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::orderbook::{BookSide, PriceLevel};
use crate::types::PricingMode;

/// Price level selected after the min_volume walk
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualifiedLevel {
    pub price: Decimal,
    /// Depth accumulated from the top of book down to `price`.
    /// For an under-liquid side this is the depth of the whole side.
    pub cumulative_size: Decimal,
    pub sufficient: bool,
}

/// Walk levels best to worst and return the first whose cumulative size
/// reaches `min_volume`. If none does, the best level comes back flagged
/// as insufficient. `None` only for an empty side.
pub fn qualified_level(levels: &[PriceLevel], min_volume: Decimal) -> Option<QualifiedLevel> {
    let best = levels.first()?;
    let mut cumulative = Decimal::ZERO;

    for level in levels {
        cumulative += level.size;
        if cumulative >= min_volume {
            return Some(QualifiedLevel {
                price: level.price,
                cumulative_size: cumulative,
                sufficient: true,
            });
        }
    }

    Some(QualifiedLevel {
        price: best.price,
        cumulative_size: cumulative,
        sufficient: false,
    })
}

/// Join the top of book: the best bid
pub fn standard_price(book: &BookSide) -> Option<Decimal> {
    book.best_bid()
}

/// True when a strictly better bid fits without crossing
pub fn has_spread(book: &BookSide, tick: Decimal) -> bool {
    match (book.best_bid(), book.best_ask()) {
        (Some(bid), Some(ask)) => ask - bid > tick,
        _ => false,
    }
}

/// Best bid + one tick when a spread exists, otherwise the standard price
pub fn spread_price(book: &BookSide, tick: Decimal) -> Option<Decimal> {
    let bid = standard_price(book)?;
    if has_spread(book, tick) {
        Some(bid + tick)
    } else {
        Some(bid)
    }
}

/// Why no price could be produced for a side
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuoteSkip {
    EmptyBook,
    InsufficientLiquidity { best: Decimal, depth: Decimal, required: Decimal },
}

impl fmt::Display for QuoteSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteSkip::EmptyBook => write!(f, "empty book"),
            QuoteSkip::InsufficientLiquidity { best, depth, required } => write!(
                f,
                "insufficient liquidity (best {} depth {} < min {})",
                best, depth, required
            ),
        }
    }
}

fn require(levels: &[PriceLevel], min_volume: Decimal) -> Result<QualifiedLevel, QuoteSkip> {
    let level = qualified_level(levels, min_volume).ok_or(QuoteSkip::EmptyBook)?;
    if !level.sufficient {
        return Err(QuoteSkip::InsufficientLiquidity {
            best: level.price,
            depth: level.cumulative_size,
            required: min_volume,
        });
    }
    Ok(level)
}

/// Bid-side maker price for a buy order
pub fn buy_quote(
    book: &BookSide,
    mode: PricingMode,
    min_volume: Decimal,
    tick: Decimal,
) -> Result<Decimal, QuoteSkip> {
    let bid = require(&book.bids, min_volume)?.price;

    match (mode, book.best_ask()) {
        (PricingMode::Spread, Some(ask)) if ask - bid > tick => Ok(bid + tick),
        _ => Ok(bid),
    }
}

/// Price for liquidating a position: the qualified bid, or one tick inside
/// the best ask when spread mode finds room to be first in the ask queue
pub fn sell_quote(
    book: &BookSide,
    mode: PricingMode,
    min_volume: Decimal,
    tick: Decimal,
) -> Result<Decimal, QuoteSkip> {
    let bid = require(&book.bids, min_volume)?.price;

    match (mode, book.best_ask()) {
        (PricingMode::Spread, Some(ask)) if ask - bid > tick => Ok(ask - tick),
        _ => Ok(bid),
    }
}

/// Ask-side maker price for a resting sell order
pub fn ask_quote(
    book: &BookSide,
    mode: PricingMode,
    min_volume: Decimal,
    tick: Decimal,
) -> Result<Decimal, QuoteSkip> {
    let ask = require(&book.asks, min_volume)?.price;

    match (mode, book.best_bid()) {
        (PricingMode::Spread, Some(bid)) if ask - bid > tick => Ok(ask - tick),
        (PricingMode::Spread, None) if ask - tick >= tick => Ok(ask - tick),
        _ => Ok(ask),
    }
}
