//! Read-only order book preview for a prospective market maker task

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ExchangeError;
use crate::exchange::{find_outcome, EventRef, ExchangeClient};
use crate::orderbook::{BookSide, OrderBookSnapshot, PriceLevel};
use crate::pricing::{has_spread, qualified_level, spread_price, QualifiedLevel};
use crate::strategies::truncate_shares;
use crate::types::OutcomeMarket;

const PREVIEW_DEPTH: usize = 5;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewRequest {
    pub url: String,
    pub outcome: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
}

fn default_min_volume() -> Decimal {
    Decimal::from(5)
}

#[derive(Debug, Clone, Serialize)]
pub struct SidePreview {
    pub qualified_bid: Option<QualifiedLevel>,
    pub qualified_ask: Option<QualifiedLevel>,
    pub has_spread: bool,
    /// Spread-mode buy price, present only when a spread exists
    pub spread_price: Option<Decimal>,
    pub top_bids: Vec<PriceLevel>,
    pub top_asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub topic_id: u64,
    pub event_title: String,
    pub outcome: String,
    pub yes: SidePreview,
    pub no: SidePreview,
    /// `amount / qualified YES bid`, 2 dp
    pub estimated_shares: Option<Decimal>,
}

fn side_preview(book: &BookSide, min_volume: Decimal, tick: Decimal) -> SidePreview {
    let spread = has_spread(book, tick);
    SidePreview {
        qualified_bid: qualified_level(&book.bids, min_volume),
        qualified_ask: qualified_level(&book.asks, min_volume),
        has_spread: spread,
        spread_price: if spread { spread_price(book, tick) } else { None },
        top_bids: book.top_bids(PREVIEW_DEPTH),
        top_asks: book.top_asks(PREVIEW_DEPTH),
    }
}

pub fn build_preview(
    market: &OutcomeMarket,
    book: &OrderBookSnapshot,
    amount: Option<Decimal>,
    min_volume: Decimal,
    tick: Decimal,
) -> Preview {
    let yes = side_preview(&book.yes, min_volume, tick);
    let no = side_preview(&book.no, min_volume, tick);

    let estimated_shares = match (amount, yes.qualified_bid) {
        (Some(amount), Some(bid)) if bid.price > Decimal::ZERO => Some(truncate_shares(amount / bid.price)),
        _ => None,
    };

    Preview {
        topic_id: market.topic_id,
        event_title: market.event_title.clone(),
        outcome: market.title.clone(),
        yes,
        no,
        estimated_shares,
    }
}

/// Resolve the outcome and summarise both books; creates nothing
pub async fn preview(
    exchange: &dyn ExchangeClient,
    request: &PreviewRequest,
    tick: Decimal,
) -> Result<Preview, PreviewError> {
    if request.min_volume <= Decimal::ZERO {
        return Err(PreviewError::Invalid("min_volume must be positive".to_string()));
    }
    let event = EventRef::parse(&request.url).map_err(PreviewError::Invalid)?;
    let outcomes = exchange.get_outcomes(&event).await?;
    let market = find_outcome(&outcomes, &request.outcome).map_err(PreviewError::Invalid)?;
    let book = exchange.get_order_book(market).await?;

    Ok(build_preview(market, &book, request.amount, request.min_volume, tick))
}
