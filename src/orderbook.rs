use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::OutcomeSide;

/// Single price level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book for one outcome token
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookSide {
    pub bids: Vec<PriceLevel>, // sorted desc
    pub asks: Vec<PriceLevel>, // sorted asc
}

impl BookSide {
    /// Build from raw levels in any order, dropping empty levels
    pub fn from_levels(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> Self {
        let collect = |levels: &[(Decimal, Decimal)]| -> Vec<PriceLevel> {
            levels
                .iter()
                .filter(|(_, s)| *s > Decimal::ZERO)
                .map(|(p, s)| PriceLevel::new(*p, *s))
                .collect()
        };

        let mut bids = collect(bids);
        let mut asks = collect(asks);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        Self { bids, asks }
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Get spread
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Get top N bid levels (highest prices first)
    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids.iter().take(n).copied().collect()
    }

    /// Get top N ask levels (lowest prices first)
    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks.iter().take(n).copied().collect()
    }
}

/// YES and NO books of one outcome, fetched together
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderBookSnapshot {
    pub yes: BookSide,
    pub no: BookSide,
}

impl OrderBookSnapshot {
    pub fn side(&self, side: OutcomeSide) -> &BookSide {
        match side {
            OutcomeSide::Yes => &self.yes,
            OutcomeSide::No => &self.no,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_levels_are_sorted_and_cleaned() {
        let book = BookSide::from_levels(
            &[(dec!(0.48), dec!(5)), (dec!(0.50), dec!(3)), (dec!(0.49), dec!(0))],
            &[(dec!(0.55), dec!(2)), (dec!(0.53), dec!(7))],
        );

        assert_eq!(book.best_bid(), Some(dec!(0.50)));
        assert_eq!(book.best_ask(), Some(dec!(0.53)));
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.spread(), Some(dec!(0.03)));
        assert_eq!(book.top_asks(1), vec![PriceLevel::new(dec!(0.53), dec!(7))]);
    }

    #[test]
    fn test_empty_book() {
        let book = BookSide::default();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.spread(), None);
    }
}
