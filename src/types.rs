use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest order notional the exchange accepts (USDT)
pub const MIN_ORDER_USDT: Decimal = dec!(1);

/// Binary outcome token side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeSide {
    Yes,
    No,
}

impl OutcomeSide {
    pub const BOTH: [OutcomeSide; 2] = [OutcomeSide::Yes, OutcomeSide::No];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSide::Yes => "YES",
            OutcomeSide::No => "NO",
        }
    }
}

impl fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Competing pricing policies for maker orders
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PricingMode {
    /// Join the top of book
    #[default]
    Standard,
    /// Improve the top of book by one tick when a gap exists
    Spread,
}

impl PricingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingMode::Standard => "standard",
            PricingMode::Spread => "spread",
        }
    }
}

/// One tradable outcome of a multi-outcome event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeMarket {
    /// Parent event title
    pub event_title: String,
    pub title: String,
    /// Child topic the orders are placed against
    pub topic_id: u64,
    pub question_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
}

impl OutcomeMarket {
    pub fn token_id(&self, side: OutcomeSide) -> &str {
        match side {
            OutcomeSide::Yes => &self.yes_token_id,
            OutcomeSide::No => &self.no_token_id,
        }
    }

    /// Case-insensitive match in either direction
    pub fn matches(&self, name: &str) -> bool {
        let title = self.title.to_lowercase();
        let name = name.to_lowercase();
        title.contains(&name) || name.contains(&title)
    }
}

/// Held outcome tokens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub topic_id: u64,
    pub parent_topic_id: u64,
    pub title: String,
    pub side: OutcomeSide,
    pub token_id: String,
    pub shares: Decimal,
    /// Shares locked in open sell orders
    pub frozen: Decimal,
    pub last_price: Decimal,
}

impl Position {
    pub fn available(&self) -> Decimal {
        (self.shares - self.frozen).max(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.shares * self.last_price
    }

    /// Stable key for per-position order tracking
    pub fn key(&self) -> String {
        format!("{}_{}", self.topic_id, self.side)
    }
}

/// Limit order to submit
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub topic_id: u64,
    pub token_id: String,
    pub outcome: OutcomeSide,
    pub side: Side,
    pub price: Decimal,
    pub shares: Decimal,
}

impl OrderRequest {
    pub fn notional(&self) -> Decimal {
        self.price * self.shares
    }
}

/// Exchange acknowledgement of a placed order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    /// Handle used for cancellation
    pub trans_no: String,
}

/// Order still resting on the book
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub trans_no: String,
    pub price: Decimal,
    /// Shares already matched against this order
    #[serde(default)]
    pub filled: Decimal,
}
